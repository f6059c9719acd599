//! Progress checkpoints handed to the session-persistence collaborator.
//!
//! The driver calls the writer at run start, after every cycle and at run
//! end. Writer failures are recorded as `checkpoint_write_failed` events
//! and never change the run outcome.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const CHECKPOINT_SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConstraints {
    pub run_mode: String,
    pub duration_min: u32,
    pub strict_isolation: String,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    pub stats: BTreeMap<String, u64>,
    pub blocked_total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationSummary {
    pub violation_count: usize,
    pub hard_fail: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongRunSummary {
    pub exit_code: i32,
    pub exit_reason: String,
    pub coverage_percent: f64,
    pub isolation_violations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    pub schema_version: String,
    pub project_id: String,
    pub task: String,
    /// `run-start`, `cycle-NNN` or `run-end`.
    pub stage: String,
    pub constraints: CheckpointConstraints,
    pub selected_groups: Vec<String>,
    pub quality_summary: QualitySummary,
    pub isolation_summary: IsolationSummary,
    pub pending_actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_run_summary: Option<LongRunSummary>,
}

impl CheckpointPayload {
    pub fn pending_actions_for(summary: Option<&LongRunSummary>) -> Vec<String> {
        let lines: [&str; 2] = match summary {
            Some(s) if s.exit_code == 0 => [
                "Proceed with router-guided group execution using exposed group summaries.",
                "Run targeted dispatch dry-runs for next specialist-heavy objectives.",
            ],
            _ => [
                "Inspect long-run final report for coverage, quality, and isolation outcomes.",
                "If failures exist, rerun with injections disabled and compare checkpoint timelines.",
            ],
        };
        lines.iter().map(|s| s.to_string()).collect()
    }
}

#[async_trait]
pub trait CheckpointWriter: Send + Sync {
    async fn write(&self, payload: &CheckpointPayload) -> Result<()>;
}

/// Discards every checkpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCheckpointWriter;

#[async_trait]
impl CheckpointWriter for NoopCheckpointWriter {
    async fn write(&self, _payload: &CheckpointPayload) -> Result<()> {
        Ok(())
    }
}

/// Writes `checkpoint-<stage>.json` and `latest.json` into a directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointWriter {
    dir: PathBuf,
}

impl FileCheckpointWriter {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl CheckpointWriter for FileCheckpointWriter {
    async fn write(&self, payload: &CheckpointPayload) -> Result<()> {
        let json = serde_json::to_string_pretty(payload).context("serialize checkpoint")?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("create {:?}", self.dir))?;
        let path = self.dir.join(format!("checkpoint-{}.json", payload.stage));
        tokio::fs::write(&path, &json)
            .await
            .with_context(|| format!("write {:?}", path))?;
        let latest = self.dir.join("latest.json");
        tokio::fs::write(&latest, &json)
            .await
            .with_context(|| format!("write {:?}", latest))?;
        Ok(())
    }
}
