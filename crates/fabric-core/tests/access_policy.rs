//! Exhaustive access-policy matrix checks.

use fabric_core::access::{
    evaluate_access, AccessOp, AccessPolicyEngine, Actor, ActorRole, REASON_OUT_OF_SCOPE,
};

/// Structural class of a target relative to the acting agent `g/me`.
#[derive(Debug, Clone, Copy)]
enum Target {
    OwnInternalSelf,
    OwnInternalPeer,
    OwnExposed,
    OtherInternal,
    OtherExposed,
}

impl Target {
    const ALL: [Target; 5] = [
        Target::OwnInternalSelf,
        Target::OwnInternalPeer,
        Target::OwnExposed,
        Target::OtherInternal,
        Target::OtherExposed,
    ];

    fn path(self) -> &'static str {
        match self {
            Target::OwnInternalSelf => "g/internal/me/cycle-001-phase-01.json",
            Target::OwnInternalPeer => "g/internal/peer/cycle-001-phase-01.json",
            Target::OwnExposed => "g/exposed/latest-summary.json",
            Target::OtherInternal => "h/internal/me/cycle-001-phase-01.json",
            Target::OtherExposed => "h/exposed/latest-summary.json",
        }
    }
}

/// The allow table, written out independently of the engine.
fn allowed(role: ActorRole, op: AccessOp, target: Target) -> bool {
    use Target::*;
    match (role, op) {
        (ActorRole::Specialist, AccessOp::Write) => matches!(target, OwnInternalSelf),
        (ActorRole::Specialist, AccessOp::Read) => {
            matches!(target, OwnInternalSelf | OwnExposed | OtherExposed)
        }
        (ActorRole::Head, AccessOp::Write) => matches!(target, OwnExposed),
        (ActorRole::Head, AccessOp::Read) => {
            matches!(target, OwnInternalSelf | OwnInternalPeer | OwnExposed | OtherExposed)
        }
    }
}

fn actor(role: ActorRole) -> Actor {
    match role {
        ActorRole::Head => Actor::head("g", "me"),
        ActorRole::Specialist => Actor::specialist("g", "me"),
    }
}

#[test]
fn test_policy_matches_table_for_every_combination() {
    for role in [ActorRole::Head, ActorRole::Specialist] {
        for op in [AccessOp::Read, AccessOp::Write] {
            for target in Target::ALL {
                let decision = evaluate_access(&actor(role), op, target.path());
                assert_eq!(
                    decision.allowed,
                    allowed(role, op, target),
                    "{:?} {:?} {:?}",
                    role,
                    op,
                    target
                );
                if decision.allowed {
                    assert_eq!(decision.reason, "ok");
                } else {
                    assert_ne!(decision.reason, REASON_OUT_OF_SCOPE);
                }
            }
        }
    }
}

#[test]
fn test_out_of_shape_paths_are_denied_for_everyone() {
    let targets = [
        "g",
        "g/internal",
        "g/scratch/me/x.json",
        "/g/internal/me/x.json",
        "g/internal/../exposed/x.json",
        "./g/exposed/x.json",
    ];
    for role in [ActorRole::Head, ActorRole::Specialist] {
        for op in [AccessOp::Read, AccessOp::Write] {
            for target in targets {
                let decision = evaluate_access(&actor(role), op, target);
                assert!(!decision.allowed, "{role:?} {op:?} {target}");
                assert_eq!(decision.reason, REASON_OUT_OF_SCOPE);
            }
        }
    }
}

#[test]
fn test_ledger_sequence_is_monotonic_and_complete() {
    let mut engine = AccessPolicyEngine::new();
    let head = actor(ActorRole::Head);
    for target in Target::ALL {
        engine.check(&head, AccessOp::Read, target.path());
        engine.check(&head, AccessOp::Write, target.path());
    }
    let ledger = engine.ledger();
    assert_eq!(ledger.len(), 10);
    assert!(ledger.iter().enumerate().all(|(i, r)| r.seq == i as u64 + 1));
    assert!(ledger.iter().all(|r| r.actor == "head:g:me"));
    // Head may read 4 targets and write 1.
    assert_eq!(engine.denied_count(), 10 - 5);
}
