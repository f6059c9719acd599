//! Long-run driver scenarios: clean runs, each injected fault, retry
//! boundaries, determinism and checkpoint failure handling.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use fabric_core::coverage::InteractionEdge;
use fabric_core::manifest::{GroupManifest, Specialist};
use fabric_core::sim::events::to_ndjson;
use fabric_core::sim::{
    CheckpointPayload, CheckpointWriter, ExitCode, FaultInjection, RunOutcome, SimEvent,
    SimulationConfig, SimulationDriver, SimulationInput, ViolationKind, LEASE_BLOCKER,
};
use fabric_core::lease::{DirectoryLeaseBackend, LeaseBackend, SimClock};
use fabric_core::schedule::task_workdir;
use fabric_core::LeaseBackendKind;

fn two_groups() -> SimulationInput {
    SimulationInput {
        project_id: "demo".to_string(),
        groups: vec![
            (
                "alpha".to_string(),
                GroupManifest::new("alpha")
                    .with_specialist(Specialist::new("a1"))
                    .with_specialist(Specialist::new("a2").with_dependency("a1")),
            ),
            (
                "beta".to_string(),
                GroupManifest::new("beta").with_specialist(Specialist::new("b1")),
            ),
        ],
        interaction_table: vec![InteractionEdge::new("alpha", "beta")],
    }
}

fn base_config() -> SimulationConfig {
    SimulationConfig {
        project_id: "demo".to_string(),
        duration_min: 15,
        conflict_rate: 0.0,
        max_retries: 3,
        retry_backoff_ms: 1,
        ..Default::default()
    }
}

fn with_faults(faults: FaultInjection) -> SimulationConfig {
    SimulationConfig {
        faults,
        ..base_config()
    }
}

async fn run(config: SimulationConfig, input: SimulationInput) -> RunOutcome {
    SimulationDriver::new(config, input)
        .unwrap()
        .run()
        .await
        .unwrap()
}

fn count(outcome: &RunOutcome, kind: &str) -> usize {
    outcome.events.iter().filter(|e| e.event.kind() == kind).count()
}

#[tokio::test]
async fn test_clean_run_exits_zero_with_full_coverage() {
    let outcome = run(base_config(), two_groups()).await;
    assert_eq!(outcome.exit_code(), ExitCode::Ok);
    assert_eq!(outcome.report.exit_reason, "");
    assert_eq!(outcome.coverage.coverage_percent, 100.0);
    assert_eq!(outcome.report.violation_count, 0);
    assert_eq!(outcome.report.isolation.violation_count, 0);
    assert_eq!(count(&outcome, "cycle_end"), 3);
    assert_eq!(count(&outcome, "edge_consumed"), 3);
    assert_eq!(outcome.report.quality_gates.stats["PASS"], 9);
    assert_eq!(outcome.report.quality_gates.blocked_total, 0);
    assert_eq!(outcome.access_ledger.iter().filter(|r| !r.allowed).count(), 0);
}

#[tokio::test]
async fn test_isolation_injection_exits_two() {
    let outcome = run(
        with_faults(FaultInjection {
            isolation_violation: true,
            ..Default::default()
        }),
        two_groups(),
    )
    .await;

    assert_eq!(outcome.exit_code(), ExitCode::IsolationViolation);
    assert_eq!(outcome.violations.len(), 1);
    let violation = &outcome.violations[0];
    assert_eq!(violation.kind, ViolationKind::IsolationViolation);
    assert!(violation.reason.contains("internal read"), "{}", violation.reason);
    assert_eq!(violation.detail["actor"], "head:beta:head-controller");
    assert_eq!(violation.detail["target"], "alpha/internal/a1/cycle-001-phase-01.json");
    assert_eq!(outcome.report.isolation.violation_count, 1);

    // Fail-fast: nothing after the denied read of cycle 1.
    assert_eq!(count(&outcome, "cycle_end"), 0);
    assert_eq!(count(&outcome, "cycle_start"), 1);
    let denied = outcome.access_ledger.last().unwrap();
    assert!(!denied.allowed);
}

#[tokio::test]
async fn test_lease_deadlock_exits_three_after_max_retries() {
    let outcome = run(
        with_faults(FaultInjection {
            lease_deadlock: true,
            ..Default::default()
        }),
        two_groups(),
    )
    .await;

    assert_eq!(outcome.exit_code(), ExitCode::LeaseUnresolved);
    let conflicts: Vec<_> = outcome
        .events
        .iter()
        .filter_map(|e| match &e.event {
            SimEvent::LeaseConflict { workdir, attempt, .. } => Some((workdir.clone(), *attempt)),
            _ => None,
        })
        .collect();
    assert_eq!(conflicts.len(), 3);
    assert_eq!(
        conflicts.iter().map(|(_, a)| *a).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(conflicts.iter().all(|(w, _)| w.ends_with("/work/alpha/a1")));
    assert_eq!(outcome.violations[0].detail["attempts"], 3);
    assert_eq!(count(&outcome, "lease_acquired"), 0);
    assert_eq!(count(&outcome, "artifact_write"), 0);
    assert_eq!(outcome.report.lease.conflicts, 3);

    // The blocker was kept alive between attempts and released at the end.
    let blocker_events: Vec<_> = outcome
        .lease_events
        .iter()
        .filter(|e| e.agent_id == LEASE_BLOCKER)
        .map(|e| serde_json::to_value(e.event).unwrap())
        .collect();
    assert_eq!(
        blocker_events,
        vec!["acquire", "heartbeat", "heartbeat", "release"]
    );
}

#[tokio::test]
async fn test_gate_expose_injection_exits_five_with_blocked_result() {
    let outcome = run(
        with_faults(FaultInjection {
            gate_expose_failure: true,
            ..Default::default()
        }),
        two_groups(),
    )
    .await;

    assert_eq!(outcome.exit_code(), ExitCode::QualityGate);
    let violation = &outcome.violations[0];
    assert_eq!(violation.kind, ViolationKind::QualityGateError);
    let blocked = &violation.detail["blocked_results"];
    assert_eq!(blocked.as_array().unwrap().len(), 1);
    assert_eq!(blocked[0]["specialist"], "a1");
    assert_eq!(blocked[0]["gate"]["status"], "BLOCKED_UNCITED");

    // The leaked summary really was written before the run halted.
    let summary: serde_json::Value = serde_json::from_slice(
        outcome
            .artifacts
            .read("alpha/exposed/cycle-001-phase-01-summary.json"),
    )
    .unwrap();
    assert_eq!(summary["blocked_results"][0]["specialist"], "a1");
    assert_eq!(outcome.report.quality_gates.stats["BLOCKED_UNCITED"], 1);
}

#[tokio::test]
async fn test_gate_injection_is_spent_on_a_group_without_citation_gate() {
    // The uncited payload goes to the first task; a group that does not
    // require citations passes it, and the one-shot injection is used up.
    let mut input = two_groups();
    input.groups[0].1.quality_gates.citation_required = false;
    let outcome = run(
        with_faults(FaultInjection {
            gate_expose_failure: true,
            ..Default::default()
        }),
        input,
    )
    .await;
    assert_eq!(outcome.exit_code(), ExitCode::Ok);
    assert_eq!(outcome.report.quality_gates.blocked_total, 0);
    assert_eq!(count(&outcome, "blocked_results_filtered"), 0);
}

#[tokio::test]
async fn test_conflicts_resolve_on_second_attempt() {
    let config = SimulationConfig {
        conflict_rate: 1.0,
        ..base_config()
    };
    let outcome = run(config, two_groups()).await;

    assert_eq!(outcome.exit_code(), ExitCode::Ok);
    let tasks = 3 * 3;
    assert_eq!(count(&outcome, "lease_conflict_injected"), tasks);
    assert_eq!(count(&outcome, "lease_conflict"), tasks);
    let attempts: Vec<u32> = outcome
        .events
        .iter()
        .filter_map(|e| match &e.event {
            SimEvent::LeaseAcquired { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts.len(), tasks);
    assert!(attempts.iter().all(|a| *a == 2));
    assert_eq!(outcome.report.lease.retry_attempts, tasks);
}

#[tokio::test]
async fn test_same_seed_yields_identical_event_logs() {
    let config = SimulationConfig {
        conflict_rate: 0.5,
        seed: 42,
        ..base_config()
    };
    let first = run(config.clone(), two_groups()).await;
    let second = run(config, two_groups()).await;
    assert_eq!(
        to_ndjson(&first.events).unwrap(),
        to_ndjson(&second.events).unwrap()
    );
    assert_eq!(
        to_ndjson(&first.lease_events).unwrap(),
        to_ndjson(&second.lease_events).unwrap()
    );
    assert_eq!(
        to_ndjson(&first.access_ledger).unwrap(),
        to_ndjson(&second.access_ledger).unwrap()
    );
}

#[tokio::test]
async fn test_removing_a_group_drops_its_edges() {
    let mut input = two_groups();
    input.groups.push((
        "gamma".to_string(),
        GroupManifest::new("gamma").with_specialist(Specialist::new("g1")),
    ));
    input.interaction_table = vec![
        InteractionEdge::new("alpha", "beta"),
        InteractionEdge::new("beta", "gamma"),
        InteractionEdge::new("gamma", "alpha"),
    ];
    let full = run(base_config(), input.clone()).await;
    assert_eq!(full.coverage.total_edges, 3);
    assert_eq!(full.coverage.coverage_percent, 100.0);

    input.groups.retain(|(id, _)| id != "gamma");
    let reduced = run(base_config(), input).await;
    assert_eq!(reduced.coverage.total_edges, 1);
    assert_eq!(reduced.coverage.defined_edges, vec![InteractionEdge::new("alpha", "beta")]);
    assert_eq!(reduced.exit_code(), ExitCode::Ok);
}

#[tokio::test]
async fn test_no_edges_means_full_coverage() {
    let mut input = two_groups();
    input.interaction_table.clear();
    let outcome = run(base_config(), input).await;
    assert_eq!(outcome.coverage.total_edges, 0);
    assert_eq!(outcome.coverage.coverage_percent, 100.0);
    assert_eq!(outcome.exit_code(), ExitCode::Ok);
}

struct FailingWriter;

#[async_trait]
impl CheckpointWriter for FailingWriter {
    async fn write(&self, payload: &CheckpointPayload) -> anyhow::Result<()> {
        Err(anyhow!("session store offline at {}", payload.stage))
    }
}

#[tokio::test]
async fn test_checkpoint_failures_never_change_the_outcome() {
    let outcome = SimulationDriver::new(base_config(), two_groups())
        .unwrap()
        .with_checkpoint_writer(Arc::new(FailingWriter))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.exit_code(), ExitCode::Ok);
    // run-start, three cycles, run-end
    assert_eq!(count(&outcome, "checkpoint_write_failed"), 5);
}

#[tokio::test]
async fn test_directory_backend_run_matches_memory_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = SimulationConfig {
        lease_backend: LeaseBackendKind::Directory,
        lease_dir: Some(dir.path().to_path_buf()),
        conflict_rate: 0.5,
        ..base_config()
    };
    let directory = run(config.clone(), two_groups()).await;
    let memory = run(
        SimulationConfig {
            lease_backend: LeaseBackendKind::Memory,
            lease_dir: None,
            ..config
        },
        two_groups(),
    )
    .await;

    assert_eq!(directory.report.lease_backend, "directory");
    assert!(dir.path().join("leases.json").exists());
    assert_eq!(directory.exit_code(), memory.exit_code());
    assert_eq!(
        to_ndjson(&directory.events).unwrap(),
        to_ndjson(&memory.events).unwrap()
    );
}

#[tokio::test]
async fn test_reused_lease_dir_starts_from_an_empty_table() {
    let dir = tempfile::tempdir().unwrap();

    // A lease left behind by an earlier process on the first task's workdir.
    let workdir = task_workdir("demo", "alpha", "a1");
    let leftover = DirectoryLeaseBackend::open(dir.path(), Arc::new(SimClock::new())).unwrap();
    leftover.register_agent("stale-holder").await.unwrap();
    leftover.register_resource(&workdir, false).await.unwrap();
    leftover.acquire("stale-holder", &workdir, 86_400).await.unwrap();

    let config = SimulationConfig {
        lease_backend: LeaseBackendKind::Directory,
        lease_dir: Some(dir.path().to_path_buf()),
        conflict_rate: 0.0,
        ..base_config()
    };
    let first = run(config.clone(), two_groups()).await;
    let second = run(config, two_groups()).await;

    for outcome in [&first, &second] {
        assert_eq!(outcome.exit_code(), ExitCode::Ok);
        assert_eq!(count(outcome, "lease_conflict"), 0);
        assert_eq!(outcome.report.lease.conflicts, 0);
    }
    assert_eq!(
        to_ndjson(&first.lease_events).unwrap(),
        to_ndjson(&second.lease_events).unwrap()
    );
    assert_eq!(
        to_ndjson(&first.events).unwrap(),
        to_ndjson(&second.events).unwrap()
    );
}
