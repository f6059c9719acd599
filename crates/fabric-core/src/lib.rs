//! Agent Fabric Core Library
//!
//! Dependency-phase scheduling for multi-group agent workflows and a
//! lease-based concurrency and isolation simulator that replays the
//! resulting plans under induced contention.

pub mod access;
pub mod coverage;
pub mod error;
pub mod lease;
pub mod manifest;
pub mod metrics;
pub mod obs;
pub mod quality;
pub mod schedule;
pub mod sim;
pub mod telemetry;

pub use access::{
    detect_owner_mismatches, evaluate_access, expected_owner, AccessDecision, AccessOp,
    AccessPolicyEngine, AccessRecord, Actor, ActorRole, OwnerMismatch,
};
pub use coverage::{
    active_edges, canonical_edges, CoverageReport, CoverageTracker, InteractionEdge,
    InteractionGraph,
};
pub use error::{FabricError, Result};
pub use lease::{
    open_backend, AuditedLeases, DirectoryLeaseBackend, Lease, LeaseBackend, LeaseBackendKind,
    LeaseError, LeaseEvent, MemoryLeaseBackend, SimClock,
};
pub use manifest::{GroupManifest, ProjectManifest, Specialist, SpecialistRole};
pub use quality::{gate_specialist_output, GateOutcome, GateStatus};
pub use schedule::{
    build_dispatch_plan, lock_plan, schedule_phases, DispatchPlan, Phase, PhaseLocks, PhaseMode,
    Task,
};
pub use sim::{
    run_long_validation, write_run_artifacts, ExitCode, FaultInjection, RunOutcome,
    SimulationConfig, SimulationDriver, SimulationInput, ViolationKind, ViolationRecord,
};
pub use telemetry::init_tracing;

/// Crate version, as reported by `fabric --version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
