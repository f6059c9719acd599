//! Terminal run outcomes and process exit codes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Process exit code of a long run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExitCode {
    Ok,
    Config,
    IsolationViolation,
    LeaseUnresolved,
    CoverageInsufficient,
    QualityGate,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Ok => 0,
            ExitCode::Config => 1,
            ExitCode::IsolationViolation => 2,
            ExitCode::LeaseUnresolved => 3,
            ExitCode::CoverageInsufficient => 4,
            ExitCode::QualityGate => 5,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ExitCode::Ok
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for ExitCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for ExitCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match i32::deserialize(deserializer)? {
            0 => Ok(ExitCode::Ok),
            1 => Ok(ExitCode::Config),
            2 => Ok(ExitCode::IsolationViolation),
            3 => Ok(ExitCode::LeaseUnresolved),
            4 => Ok(ExitCode::CoverageInsufficient),
            5 => Ok(ExitCode::QualityGate),
            other => Err(serde::de::Error::custom(format!("unknown exit code {other}"))),
        }
    }
}

/// Class of invariant a run violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    IsolationViolation,
    /// Changed artifact written by someone other than its structural owner.
    OwnershipMismatch,
    LeaseUnresolved,
    CoverageInsufficient,
    QualityGateError,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::IsolationViolation => "isolation_violation",
            ViolationKind::OwnershipMismatch => "ownership_mismatch",
            ViolationKind::LeaseUnresolved => "lease_unresolved",
            ViolationKind::CoverageInsufficient => "coverage_insufficient",
            ViolationKind::QualityGateError => "quality_gate_error",
        }
    }

    pub fn exit_code(self) -> ExitCode {
        match self {
            ViolationKind::IsolationViolation | ViolationKind::OwnershipMismatch => {
                ExitCode::IsolationViolation
            }
            ViolationKind::LeaseUnresolved => ExitCode::LeaseUnresolved,
            ViolationKind::CoverageInsufficient => ExitCode::CoverageInsufficient,
            ViolationKind::QualityGateError => ExitCode::QualityGate,
        }
    }

    pub fn is_isolation(self) -> bool {
        self.exit_code() == ExitCode::IsolationViolation
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub code: ExitCode,
    pub kind: ViolationKind,
    pub reason: String,
    pub detail: Value,
}

impl ViolationRecord {
    pub fn new(kind: ViolationKind, reason: impl Into<String>, detail: Value) -> Self {
        Self {
            code: kind.exit_code(),
            kind,
            reason: reason.into(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ownership_mismatch_exits_as_isolation() {
        let v = ViolationRecord::new(ViolationKind::OwnershipMismatch, "Owner attribution mismatch", json!({}));
        assert_eq!(v.code.code(), 2);
        assert!(v.kind.is_isolation());
    }

    #[test]
    fn test_record_serializes_numeric_code() {
        let v = ViolationRecord::new(ViolationKind::LeaseUnresolved, "Lease contention unresolved", json!({"attempts": 3}));
        let value = serde_json::to_value(&v).unwrap();
        assert_eq!(value["code"], 3);
        assert_eq!(value["kind"], "lease_unresolved");
        let back: ViolationRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, v);
    }
}
