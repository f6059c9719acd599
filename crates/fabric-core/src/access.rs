//! Artifact access policy.
//!
//! Artifact paths are relative to the project's group-artifact root and
//! always have the shape `<group>/<section>/...` with `section` one of
//! `internal` or `exposed`. [`evaluate_access`] is the pure decision
//! function; [`AccessPolicyEngine`] wraps it with an append-only ledger.
//!
//! | Role       | Write                          | Read                                             |
//! |------------|--------------------------------|--------------------------------------------------|
//! | specialist | own group `internal/<self>/..` | own `internal/<self>/..`, any group's `exposed/` |
//! | head       | own group `exposed/..`         | anything in own group, other groups' `exposed/`  |

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const SECTION_INTERNAL: &str = "internal";
pub const SECTION_EXPOSED: &str = "exposed";

pub const REASON_OK: &str = "ok";
pub const REASON_OUT_OF_SCOPE: &str = "target outside group artifact scope";
pub const REASON_SPECIALIST_WRITE: &str = "specialist write must stay in own internal subtree";
pub const REASON_SPECIALIST_READ: &str = "specialist cross-group internal read denied";
pub const REASON_HEAD_WRITE: &str = "head write must stay in own exposed subtree";
pub const REASON_HEAD_READ: &str = "head cross-group internal read denied";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Head,
    Specialist,
}

impl ActorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorRole::Head => "head",
            ActorRole::Specialist => "specialist",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessOp {
    Read,
    Write,
}

impl AccessOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessOp::Read => "read",
            AccessOp::Write => "write",
        }
    }
}

/// Identity behind every access and lease decision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub role: ActorRole,
    pub group_id: String,
    pub agent_id: String,
}

impl Actor {
    pub fn head(group_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            role: ActorRole::Head,
            group_id: group_id.into(),
            agent_id: agent_id.into(),
        }
    }

    pub fn specialist(group_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            role: ActorRole::Specialist,
            group_id: group_id.into(),
            agent_id: agent_id.into(),
        }
    }

    /// `role:group:agent`, the form used in ledgers and ownership records.
    pub fn tag(&self) -> String {
        format!("{}:{}:{}", self.role.as_str(), self.group_id, self.agent_id)
    }

    /// Identity presented to the lease backend.
    pub fn lease_agent_id(&self) -> String {
        format!("{}--{}", self.group_id, self.agent_id)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// A target path split into its policy-relevant parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactPath<'a> {
    pub group_id: &'a str,
    pub section: Section,
    /// First segment below the section (the agent id under `internal`).
    pub owner_segment: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Internal,
    Exposed,
}

impl<'a> ArtifactPath<'a> {
    /// Parse `<group>/<section>/<rest..>`. Returns `None` for any other
    /// shape, including empty or `..` segments.
    pub fn parse(target: &'a str) -> Option<Self> {
        let parts: Vec<&str> = target.split('/').collect();
        if parts.len() < 3 || parts.iter().any(|p| p.is_empty() || *p == "." || *p == "..") {
            return None;
        }
        let section = match parts[1] {
            SECTION_INTERNAL => Section::Internal,
            SECTION_EXPOSED => Section::Exposed,
            _ => return None,
        };
        Some(Self {
            group_id: parts[0],
            section,
            owner_segment: parts[2],
        })
    }
}

/// Outcome of one access decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
}

impl AccessDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: REASON_OK.to_string(),
        }
    }

    fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: reason.to_string(),
        }
    }
}

/// Decide whether `actor` may perform `op` on `target`. Default-deny.
pub fn evaluate_access(actor: &Actor, op: AccessOp, target: &str) -> AccessDecision {
    let Some(path) = ArtifactPath::parse(target) else {
        return AccessDecision::deny(REASON_OUT_OF_SCOPE);
    };
    let own_group = path.group_id == actor.group_id;
    let own_internal =
        own_group && path.section == Section::Internal && path.owner_segment == actor.agent_id;

    let allowed = match (actor.role, op) {
        (ActorRole::Specialist, AccessOp::Write) => own_internal,
        (ActorRole::Specialist, AccessOp::Read) => own_internal || path.section == Section::Exposed,
        (ActorRole::Head, AccessOp::Write) => own_group && path.section == Section::Exposed,
        (ActorRole::Head, AccessOp::Read) => own_group || path.section == Section::Exposed,
    };
    if allowed {
        return AccessDecision::allow();
    }

    AccessDecision::deny(match (actor.role, op) {
        (ActorRole::Specialist, AccessOp::Write) => REASON_SPECIALIST_WRITE,
        (ActorRole::Specialist, AccessOp::Read) => REASON_SPECIALIST_READ,
        (ActorRole::Head, AccessOp::Write) => REASON_HEAD_WRITE,
        (ActorRole::Head, AccessOp::Read) => REASON_HEAD_READ,
    })
}

/// Actor tag that must have last written `target`, derived from its shape.
///
/// `head_by_group` supplies head agent ids; groups missing from it use
/// [`crate::manifest::DEFAULT_HEAD_AGENT`].
pub fn expected_owner(target: &str, head_by_group: &BTreeMap<String, String>) -> Option<String> {
    let path = ArtifactPath::parse(target)?;
    match path.section {
        Section::Internal => Some(Actor::specialist(path.group_id, path.owner_segment).tag()),
        Section::Exposed => {
            let head = head_by_group
                .get(path.group_id)
                .map(String::as_str)
                .unwrap_or(crate::manifest::DEFAULT_HEAD_AGENT);
            Some(Actor::head(path.group_id, head).tag())
        }
    }
}

/// A changed path whose last writer differs from its expected owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerMismatch {
    pub path: String,
    pub expected_owner: String,
    pub actual_owner: Option<String>,
}

/// Compare expected and actual owners for every changed path, in path
/// order. Paths without an expected owner are skipped.
pub fn detect_owner_mismatches<'a>(
    changed: impl IntoIterator<Item = &'a str>,
    expected: &BTreeMap<String, String>,
    actual: &BTreeMap<String, String>,
) -> Vec<OwnerMismatch> {
    let mut paths: Vec<&str> = changed.into_iter().collect();
    paths.sort_unstable();
    paths.dedup();

    paths
        .into_iter()
        .filter_map(|path| {
            let expected_owner = expected.get(path)?;
            let actual_owner = actual.get(path);
            (actual_owner != Some(expected_owner)).then(|| OwnerMismatch {
                path: path.to_string(),
                expected_owner: expected_owner.clone(),
                actual_owner: actual_owner.cloned(),
            })
        })
        .collect()
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub seq: u64,
    pub actor: String,
    pub op: AccessOp,
    pub target: String,
    pub allowed: bool,
    pub reason: String,
}

/// Policy evaluation plus an audit ledger of every decision.
#[derive(Debug, Default)]
pub struct AccessPolicyEngine {
    ledger: Vec<AccessRecord>,
}

impl AccessPolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate and record. Allowed and denied decisions are both logged.
    pub fn check(&mut self, actor: &Actor, op: AccessOp, target: &str) -> AccessDecision {
        let decision = evaluate_access(actor, op, target);
        self.ledger.push(AccessRecord {
            seq: self.ledger.len() as u64 + 1,
            actor: actor.tag(),
            op,
            target: target.to_string(),
            allowed: decision.allowed,
            reason: decision.reason.clone(),
        });
        if !decision.allowed {
            tracing::debug!(actor = %actor, op = op.as_str(), target, reason = %decision.reason, "access denied");
        }
        decision
    }

    pub fn ledger(&self) -> &[AccessRecord] {
        &self.ledger
    }

    pub fn denied_count(&self) -> usize {
        self.ledger.iter().filter(|r| !r.allowed).count()
    }
}
