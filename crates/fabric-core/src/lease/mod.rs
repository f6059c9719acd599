//! Directory-scoped mutual exclusion with expiry.
//!
//! [`LeaseBackend`] is the contract; [`MemoryLeaseBackend`] and
//! [`DirectoryLeaseBackend`] implement it over the same lease-table state
//! machine and differ only in [`LeaseBackend::backend_name`]. Callers pick
//! one through [`open_backend`] and wrap it in [`AuditedLeases`] so that
//! every call lands in the lease event log.
//!
//! Time is simulated: both backends read a shared [`SimClock`] that the
//! simulation driver advances explicitly.

pub mod audit;
pub mod directory;
pub mod memory;
mod table;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use audit::{AuditedLeases, LeaseEvent, LeaseOp, LeaseOutcome};
pub use directory::DirectoryLeaseBackend;
pub use memory::MemoryLeaseBackend;

/// Errors produced by lease backends.
#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("unknown agent: {agent_id}")]
    UnknownAgent { agent_id: String },

    #[error("unknown resource: {path}")]
    UnknownResource { path: String },

    #[error("lease conflict on {path}: held by {holder} until {expires_at_ms}ms")]
    Conflict {
        path: String,
        holder: String,
        expires_at_ms: u64,
    },

    #[error("lease token not found: {token}")]
    TokenNotFound { token: String },

    #[error("lease storage error: {0}")]
    Storage(String),
}

impl LeaseError {
    /// Registry misses mean the caller is misconfigured.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            LeaseError::UnknownAgent { .. } | LeaseError::UnknownResource { .. }
        )
    }

    /// Conflicts are transient and worth retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LeaseError::Conflict { .. })
    }
}

/// Result type for lease operations.
pub type LeaseResult<T> = std::result::Result<T, LeaseError>;

/// A time-bounded exclusive claim on a resource path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub token: String,
    pub resource_path: String,
    pub holder_agent_id: String,
    /// Simulated-clock instant (ms) at which the lease stops being valid.
    pub expires_at_ms: u64,
}

impl Lease {
    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms > now_ms
    }
}

/// Monotonic simulated clock in milliseconds.
#[derive(Debug, Default)]
pub struct SimClock {
    now_ms: AtomicU64,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    /// Move the clock forward and return the new instant.
    pub fn advance(&self, ms: u64) -> u64 {
        let previous = self
            .now_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                Some(t.saturating_add(ms))
            })
            .unwrap_or_else(|t| t);
        previous.saturating_add(ms)
    }
}

/// Mutual-exclusion primitive over named resource paths.
///
/// Guarantees:
/// - registration is idempotent;
/// - `acquire` fails with [`LeaseError::Conflict`] only while a different
///   agent holds an unexpired lease on a non-shared path, and otherwise
///   replaces any self-held or expired lease;
/// - `release` by anyone but the holder (or with a stale token) is a no-op
///   returning `false`.
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Short name reported in lease events and the final report.
    fn backend_name(&self) -> &'static str;

    async fn register_agent(&self, agent_id: &str) -> LeaseResult<()>;

    async fn register_resource(&self, path: &str, shared: bool) -> LeaseResult<()>;

    async fn acquire(&self, agent_id: &str, path: &str, ttl_secs: u64) -> LeaseResult<Lease>;

    async fn heartbeat(&self, token: &str, ttl_secs: u64) -> LeaseResult<Lease>;

    async fn release(&self, agent_id: &str, path: &str, token: Option<&str>) -> LeaseResult<bool>;
}

/// Which [`LeaseBackend`] implementation a run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseBackendKind {
    #[default]
    Memory,
    Directory,
}

impl std::str::FromStr for LeaseBackendKind {
    type Err = crate::error::FabricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "memory" | "in-memory" => Ok(LeaseBackendKind::Memory),
            "directory" => Ok(LeaseBackendKind::Directory),
            other => Err(crate::error::FabricError::config(format!(
                "unsupported lease backend: {other}"
            ))),
        }
    }
}

/// Construct the backend selected by `kind`, starting from an empty table.
///
/// `root` is only consulted by the directory backend, whose state file is
/// reset so a run never inherits leases from a previous one.
pub fn open_backend(
    kind: LeaseBackendKind,
    root: &Path,
    clock: Arc<SimClock>,
) -> LeaseResult<Arc<dyn LeaseBackend>> {
    Ok(match kind {
        LeaseBackendKind::Memory => Arc::new(MemoryLeaseBackend::new(clock)),
        LeaseBackendKind::Directory => Arc::new(DirectoryLeaseBackend::open_fresh(root, clock)?),
    })
}
