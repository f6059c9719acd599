//! Long-run concurrency and isolation simulation.
//!
//! - [`config`]: `SimulationConfig`, run modes, fault toggles
//! - [`driver`]: `SimulationDriver`, the cycle/phase/task state machine
//! - [`store`]: simulated artifact filesystem with last-writer tracking
//! - [`events`]: driver event log
//! - [`violation`]: exit codes and violation records
//! - [`checkpoint`]: progress checkpoints for the session collaborator
//! - [`report`]: final report and on-disk run artifacts

pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod events;
pub mod report;
pub mod store;
pub mod violation;

use std::sync::Arc;

pub use checkpoint::{
    CheckpointPayload, CheckpointWriter, FileCheckpointWriter, LongRunSummary,
    NoopCheckpointWriter,
};
pub use config::{
    FaultInjection, GroupSelection, IsolationMode, RunMode, SimulationConfig, CANONICAL_TASK,
};
pub use driver::{RunOutcome, SimulationDriver, SimulationInput, LEASE_BLOCKER};
pub use events::{EventRecord, SimEvent};
pub use report::{render_report_md, write_run_artifacts, FinalReport, GroupStats};
pub use store::{ArtifactSnapshot, ArtifactStore};
pub use violation::{ExitCode, ViolationKind, ViolationRecord};

use crate::coverage::canonical_edges;
use crate::error::Result;
use crate::manifest::ProjectManifest;

/// Resolve manifests for `config`, run the simulation, and leave
/// checkpoints under `<output_dir>/checkpoints`.
///
/// The returned outcome carries the resolved `output_dir`; writing the
/// report files there is left to [`write_run_artifacts`].
pub async fn run_long_validation(mut config: SimulationConfig) -> Result<RunOutcome> {
    config.validate()?;
    let (project_dir, project) = ProjectManifest::load(&config.fabric_root, &config.project_id)?;
    let groups = project.resolve_groups(&config.groups.to_string())?;
    let manifests = project.load_group_manifests(&project_dir, &groups)?;

    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let output_dir = config.resolve_output_dir(&project_dir, &stamp);
    if config.lease_dir.is_none() {
        config.lease_dir = Some(output_dir.join("leases"));
    }
    config.output_dir = Some(output_dir.clone());

    tracing::info!(
        project_id = %config.project_slug(),
        groups = ?groups,
        output_dir = %output_dir.display(),
        "starting long-run validation"
    );

    let input = SimulationInput {
        project_id: project.project_id.clone(),
        groups: manifests,
        interaction_table: project.interaction_edges.clone().unwrap_or_else(canonical_edges),
    };
    let writer = FileCheckpointWriter::new(output_dir.join("checkpoints"));
    SimulationDriver::new(config, input)?
        .with_checkpoint_writer(Arc::new(writer))
        .run()
        .await
}
