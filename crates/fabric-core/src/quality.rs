//! Quality gate over specialist output.
//!
//! Outputs are free-form JSON records; the gate only looks at a handful of
//! well-known fields and never fails, it classifies.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Pass,
    BlockedUncited,
    BlockedNeedsEvidence,
    BlockedReview,
    BlockedInvalid,
}

impl GateStatus {
    pub const ALL: [GateStatus; 5] = [
        GateStatus::Pass,
        GateStatus::BlockedUncited,
        GateStatus::BlockedNeedsEvidence,
        GateStatus::BlockedReview,
        GateStatus::BlockedInvalid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GateStatus::Pass => "PASS",
            GateStatus::BlockedUncited => "BLOCKED_UNCITED",
            GateStatus::BlockedNeedsEvidence => "BLOCKED_NEEDS_EVIDENCE",
            GateStatus::BlockedReview => "BLOCKED_REVIEW",
            GateStatus::BlockedInvalid => "BLOCKED_INVALID",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, GateStatus::Pass)
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub status: GateStatus,
    pub reasons: Vec<String>,
}

impl GateOutcome {
    fn new(status: GateStatus, reasons: Vec<String>) -> Self {
        Self { status, reasons }
    }
}

/// Classify `output`.
///
/// Evidence gaps win over everything else; otherwise any citation problem
/// yields `BLOCKED_UNCITED` and any other problem `BLOCKED_REVIEW`.
pub fn gate_specialist_output(
    output: &Value,
    citation_required: bool,
    web_available: bool,
) -> GateOutcome {
    let Some(record) = output.as_object() else {
        return GateOutcome::new(
            GateStatus::BlockedInvalid,
            vec!["output must be a map".to_string()],
        );
    };

    let mut reasons = Vec::new();
    let mut uncited = false;

    if citation_required {
        match record.get("claims_with_citations").and_then(Value::as_array) {
            Some(claims) if !claims.is_empty() => {
                for (idx, claim) in claims.iter().enumerate() {
                    let cited = claim
                        .get("citation")
                        .map(is_truthy)
                        .unwrap_or(false);
                    if !cited {
                        uncited = true;
                        reasons.push(format!("claim[{idx}] missing citation"));
                    }
                }
            }
            _ => {
                uncited = true;
                reasons.push("missing claims_with_citations".to_string());
            }
        }
    }

    if record.get("needs_web_evidence").is_some_and(is_truthy) && !web_available {
        reasons.push("required web evidence unavailable".to_string());
        return GateOutcome::new(GateStatus::BlockedNeedsEvidence, reasons);
    }

    if record.get("contradictions").is_some_and(is_truthy) {
        reasons.push("internal contradictions detected".to_string());
    }
    if record.get("scope_violation").is_some_and(is_truthy) {
        reasons.push("scope violation".to_string());
    }
    if !record.get("repro_steps").is_some_and(is_truthy) {
        reasons.push("missing reproducibility steps".to_string());
    }

    let status = if reasons.is_empty() {
        GateStatus::Pass
    } else if uncited {
        GateStatus::BlockedUncited
    } else {
        GateStatus::BlockedReview
    };
    GateOutcome::new(status, reasons)
}

/// JSON truthiness: null, false, zero and empty containers are falsy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Deterministic specialist output used by the simulator.
///
/// With `uncited` set the single claim carries no citation, which the gate
/// must block.
pub fn synthetic_output(
    group_id: &str,
    specialist_id: &str,
    internal_artifact: &str,
    cycle: u32,
    phase_id: u32,
    uncited: bool,
) -> Value {
    let claims = if uncited {
        json!([{ "claim": "intentionally uncited claim" }])
    } else {
        json!([{
            "claim": format!(
                "{group_id}/{specialist_id} synthesized claim for cycle {cycle} phase {phase_id}"
            ),
            "citation": format!("local:references/{specialist_id}-core.md"),
        }])
    };
    json!({
        "assumptions": ["Synthetic simulation run", "Deterministic local mode"],
        "claims_with_citations": claims,
        "repro_steps": [
            format!("Acquire lease for {group_id}/{specialist_id}"),
            "Write internal artifact",
            "Return gated output",
        ],
        "artifact_paths": [internal_artifact],
        "confidence": "medium",
        "unresolved_assumptions": [],
    })
}
