//! Error taxonomy for Agent Fabric.
//!
//! Terminal simulation outcomes (isolation violations, unresolved leases,
//! coverage gaps, gate leaks) are *not* errors: they are recorded as
//! [`crate::sim::ViolationRecord`]s and surface through the exit code. The
//! types here cover everything that prevents a run from being set up or
//! carried out at all.

use crate::lease::LeaseError;

/// Crate-wide errors.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// Invalid run parameters, unsupported modes, or missing manifest data.
    #[error("configuration error: {0}")]
    Config(String),

    /// The phase scheduler cannot make progress.
    #[error("cyclic or unsatisfied specialist dependencies in group '{group_id}': {}", agents.join(", "))]
    DependencyCycle {
        group_id: String,
        agents: Vec<String>,
    },

    #[error("lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl FabricError {
    /// Shorthand for a [`FabricError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        FabricError::Config(msg.into())
    }

    /// Whether this error is a configuration problem (process exit code 1).
    ///
    /// Lease registry misses count as configuration problems: they mean the
    /// caller never registered the agent or resource it is using.
    pub fn is_config(&self) -> bool {
        match self {
            FabricError::Config(_) | FabricError::DependencyCycle { .. } => true,
            FabricError::Lease(err) => err.is_config(),
            _ => false,
        }
    }
}

/// Result type for Agent Fabric operations.
pub type Result<T> = std::result::Result<T, FabricError>;
