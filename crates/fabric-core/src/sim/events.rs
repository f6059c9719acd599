//! Driver event log.
//!
//! Events carry only simulated quantities (cycle, phase, attempt, paths),
//! never wall-clock time, so identical seeds and configs produce identical
//! logs.

use serde::{Deserialize, Serialize};

use super::violation::{ExitCode, ViolationRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    RunStart {
        cycles: u32,
        seed: u64,
    },
    CycleStart {
        cycle: u32,
    },
    LeaseConflictInjected {
        workdir: String,
        deadlock: bool,
    },
    LeaseConflictInjectionFailed {
        workdir: String,
        error: String,
    },
    LeaseAcquired {
        workdir: String,
        attempt: u32,
        agent: String,
    },
    LeaseConflict {
        workdir: String,
        attempt: u32,
        agent: String,
        error: String,
    },
    ArtifactWrite {
        actor: String,
        target: String,
    },
    BlockedResultsFiltered {
        group_id: String,
        cycle: u32,
        phase: u32,
        blocked_count: usize,
    },
    EdgeConsumed {
        cycle: u32,
        from: String,
        to: String,
        source: String,
    },
    CheckpointWriteFailed {
        stage: String,
        error: String,
    },
    Failure(ViolationRecord),
    CycleEnd {
        cycle: u32,
    },
    RunEnd {
        exit_code: ExitCode,
        reason: String,
    },
}

impl SimEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SimEvent::RunStart { .. } => "run_start",
            SimEvent::CycleStart { .. } => "cycle_start",
            SimEvent::LeaseConflictInjected { .. } => "lease_conflict_injected",
            SimEvent::LeaseConflictInjectionFailed { .. } => "lease_conflict_injection_failed",
            SimEvent::LeaseAcquired { .. } => "lease_acquired",
            SimEvent::LeaseConflict { .. } => "lease_conflict",
            SimEvent::ArtifactWrite { .. } => "artifact_write",
            SimEvent::BlockedResultsFiltered { .. } => "blocked_results_filtered",
            SimEvent::EdgeConsumed { .. } => "edge_consumed",
            SimEvent::CheckpointWriteFailed { .. } => "checkpoint_write_failed",
            SimEvent::Failure(_) => "failure",
            SimEvent::CycleEnd { .. } => "cycle_end",
            SimEvent::RunEnd { .. } => "run_end",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    #[serde(flatten)]
    pub event: SimEvent,
}

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `event` and return its sequence number (1-based).
    pub fn push(&mut self, event: SimEvent) -> u64 {
        let seq = self.records.len() as u64 + 1;
        tracing::trace!(seq, kind = event.kind(), "sim event");
        self.records.push(EventRecord { seq, event });
        seq
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn count(&self, kind: &str) -> usize {
        self.records.iter().filter(|r| r.event.kind() == kind).count()
    }

    pub fn into_records(self) -> Vec<EventRecord> {
        self.records
    }
}

/// Render rows as newline-delimited JSON.
pub fn to_ndjson<T: Serialize>(rows: &[T]) -> serde_json::Result<String> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::violation::ViolationKind;
    use serde_json::json;

    #[test]
    fn test_records_are_flat_and_sequenced() {
        let mut log = EventLog::new();
        log.push(SimEvent::RunStart { cycles: 2, seed: 7 });
        log.push(SimEvent::CycleStart { cycle: 1 });
        let rows = log.records();
        assert_eq!(rows[1].seq, 2);

        let value = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(value, json!({"seq": 1, "event": "run_start", "cycles": 2, "seed": 7}));
    }

    #[test]
    fn test_failure_event_embeds_violation() {
        let mut log = EventLog::new();
        log.push(SimEvent::Failure(ViolationRecord::new(
            ViolationKind::QualityGateError,
            "Blocked specialist output was published to exposed artifact",
            json!({"blocked_count": 1}),
        )));
        let value = serde_json::to_value(&log.records()[0]).unwrap();
        assert_eq!(value["event"], "failure");
        assert_eq!(value["code"], 5);
        assert_eq!(value["detail"]["blocked_count"], 1);
        assert_eq!(log.count("failure"), 1);

        let back: EventRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, log.records()[0]);
    }

    #[test]
    fn test_ndjson_has_one_line_per_row() {
        let mut log = EventLog::new();
        log.push(SimEvent::CycleStart { cycle: 1 });
        log.push(SimEvent::CycleEnd { cycle: 1 });
        let text = to_ndjson(log.records()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
        assert!(to_ndjson::<EventRecord>(&[]).unwrap().is_empty());
    }
}
