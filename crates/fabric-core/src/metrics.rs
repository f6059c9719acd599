//! Global atomic counters for long-run observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run). They are process-wide
//! and never feed any run ledger.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters: no allocations, no locking.
pub struct Metrics {
    leases_acquired: AtomicU64,
    lease_conflicts: AtomicU64,
    artifacts_written: AtomicU64,
    violations: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            leases_acquired: AtomicU64::new(0),
            lease_conflicts: AtomicU64::new(0),
            artifacts_written: AtomicU64::new(0),
            violations: AtomicU64::new(0),
        }
    }

    pub fn inc_leases_acquired(&self) {
        self.leases_acquired.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "leases_acquired", "counter incremented");
    }

    pub fn inc_lease_conflicts(&self) {
        self.lease_conflicts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "lease_conflicts", "counter incremented");
    }

    pub fn inc_artifacts_written(&self) {
        self.artifacts_written.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "artifacts_written", "counter incremented");
    }

    pub fn inc_violations(&self) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "violations", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            leases_acquired = self.leases_acquired(),
            lease_conflicts = self.lease_conflicts(),
            artifacts_written = self.artifacts_written(),
            violations = self.violations(),
        );
    }

    pub fn leases_acquired(&self) -> u64 {
        self.leases_acquired.load(Ordering::Relaxed)
    }

    pub fn lease_conflicts(&self) -> u64 {
        self.lease_conflicts.load(Ordering::Relaxed)
    }

    pub fn artifacts_written(&self) -> u64 {
        self.artifacts_written.load(Ordering::Relaxed)
    }

    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.leases_acquired.store(0, Ordering::Relaxed);
        self.lease_conflicts.store(0, Ordering::Relaxed);
        self.artifacts_written.store(0, Ordering::Relaxed);
        self.violations.store(0, Ordering::Relaxed);
    }
}
