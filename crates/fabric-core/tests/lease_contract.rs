//! The lease contract, run against every backend.
//!
//! Each check builds its backend through `open_backend` so both
//! implementations are held to identical observable behavior.

use std::sync::Arc;

use fabric_core::lease::{
    open_backend, AuditedLeases, LeaseBackend, LeaseBackendKind, LeaseError, LeaseOp,
    LeaseOutcome, SimClock,
};
use tempfile::TempDir;

struct Fixture {
    backend: Arc<dyn LeaseBackend>,
    clock: Arc<SimClock>,
    _dir: TempDir,
}

async fn fixture(kind: LeaseBackendKind) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(SimClock::new());
    let backend = open_backend(kind, dir.path(), clock.clone()).unwrap();
    for agent in ["a", "b"] {
        backend.register_agent(agent).await.unwrap();
    }
    backend.register_resource("/w", false).await.unwrap();
    backend.register_resource("/shared", true).await.unwrap();
    Fixture {
        backend,
        clock,
        _dir: dir,
    }
}

const KINDS: [LeaseBackendKind; 2] = [LeaseBackendKind::Memory, LeaseBackendKind::Directory];

#[tokio::test]
async fn test_exclusive_until_expiry() {
    for kind in KINDS {
        let f = fixture(kind).await;
        let lease = f.backend.acquire("a", "/w", 10).await.unwrap();
        assert_eq!(lease.holder_agent_id, "a");
        assert_eq!(lease.expires_at_ms, 10_000);

        let err = f.backend.acquire("b", "/w", 10).await.unwrap_err();
        assert!(err.is_conflict(), "{kind:?}");

        f.clock.advance(10_000);
        let taken = f.backend.acquire("b", "/w", 10).await.unwrap();
        assert_eq!(taken.holder_agent_id, "b", "{kind:?}");
    }
}

#[tokio::test]
async fn test_heartbeat_extends_and_unknown_token_is_not_found() {
    for kind in KINDS {
        let f = fixture(kind).await;
        let lease = f.backend.acquire("a", "/w", 10).await.unwrap();
        f.clock.advance(8_000);
        let renewed = f.backend.heartbeat(&lease.token, 10).await.unwrap();
        assert_eq!(renewed.expires_at_ms, 18_000);

        f.clock.advance(5_000);
        assert!(f.backend.acquire("b", "/w", 10).await.unwrap_err().is_conflict());

        let err = f.backend.heartbeat("no-such-token", 10).await.unwrap_err();
        assert!(matches!(err, LeaseError::TokenNotFound { .. }), "{kind:?}");
    }
}

#[tokio::test]
async fn test_release_by_non_holder_is_a_false_no_op() {
    for kind in KINDS {
        let f = fixture(kind).await;
        let lease = f.backend.acquire("a", "/w", 10).await.unwrap();
        assert!(!f.backend.release("b", "/w", None).await.unwrap());
        assert!(!f.backend.release("a", "/w", Some("wrong")).await.unwrap());
        assert!(f.backend.release("a", "/w", Some(&lease.token)).await.unwrap());
        assert!(!f.backend.release("a", "/w", None).await.unwrap(), "{kind:?}");
        f.backend.acquire("b", "/w", 10).await.unwrap();
    }
}

#[tokio::test]
async fn test_shared_resources_and_self_reacquire() {
    for kind in KINDS {
        let f = fixture(kind).await;
        f.backend.acquire("a", "/shared", 10).await.unwrap();
        f.backend.acquire("b", "/shared", 10).await.unwrap();

        let first = f.backend.acquire("a", "/w", 10).await.unwrap();
        let second = f.backend.acquire("a", "/w", 10).await.unwrap();
        assert_ne!(first.token, second.token, "{kind:?}");
    }
}

#[tokio::test]
async fn test_unregistered_identities_are_config_errors() {
    for kind in KINDS {
        let f = fixture(kind).await;
        let err = f.backend.acquire("stranger", "/w", 10).await.unwrap_err();
        assert!(matches!(err, LeaseError::UnknownAgent { .. }));
        assert!(err.is_config());

        let err = f.backend.acquire("a", "/elsewhere", 10).await.unwrap_err();
        assert!(matches!(err, LeaseError::UnknownResource { .. }), "{kind:?}");
        assert!(fabric_core::FabricError::from(err).is_config());
    }
}

#[tokio::test]
async fn test_backends_issue_identical_tokens_for_identical_calls() {
    let mut tokens = Vec::new();
    for kind in KINDS {
        let f = fixture(kind).await;
        let lease = f.backend.acquire("a", "/w", 10).await.unwrap();
        tokens.push(lease.token);
    }
    assert_eq!(tokens[0], tokens[1]);
    assert_eq!(tokens[0].len(), 20);
}

#[tokio::test]
async fn test_backends_differ_only_by_name() {
    let memory = fixture(LeaseBackendKind::Memory).await;
    let directory = fixture(LeaseBackendKind::Directory).await;
    assert_eq!(memory.backend.backend_name(), "in-memory");
    assert_eq!(directory.backend.backend_name(), "directory");
}

#[tokio::test]
async fn test_audit_log_records_every_call_in_order() {
    for kind in KINDS {
        let f = fixture(kind).await;
        let leases = AuditedLeases::new(f.backend.clone());

        let lease = leases.acquire("a", "/w", 10).await.unwrap();
        leases.acquire("b", "/w", 10).await.unwrap_err();
        leases.heartbeat("a", "/w", &lease.token, 10).await.unwrap();
        leases.release("b", "/w", None).await.unwrap();
        leases.release("a", "/w", Some(&lease.token)).await.unwrap();

        let events = leases.events();
        let summary: Vec<(LeaseOp, LeaseOutcome)> =
            events.iter().map(|e| (e.event, e.outcome)).collect();
        assert_eq!(
            summary,
            vec![
                (LeaseOp::Acquire, LeaseOutcome::Ok),
                (LeaseOp::Acquire, LeaseOutcome::Conflict),
                (LeaseOp::Heartbeat, LeaseOutcome::Ok),
                (LeaseOp::Release, LeaseOutcome::NotHeld),
                (LeaseOp::Release, LeaseOutcome::Released),
            ],
            "{kind:?}"
        );
        assert!(events.iter().enumerate().all(|(i, e)| e.seq == i as u64 + 1));
        assert!(events.iter().all(|e| e.backend == leases.backend_name()));
        assert_eq!(events[1].detail.as_deref(), Some("a"));
        assert_eq!(leases.count(LeaseOp::Acquire, LeaseOutcome::Conflict), 1);
    }
}
