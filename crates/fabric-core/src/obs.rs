//! Structured observability hooks for long-run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`]
//! - Emission functions for run start/finish, cycles, violations and lease
//!   conflicts
//!
//! These are diagnostics only. The audit ledgers a run produces are kept in
//! memory by the driver and never depend on the subscriber configuration.

use tracing::info;

/// Run-scoped span; every event emitted while a run future is polled carries
/// its `run_id`.
///
/// # Example
///
/// ```ignore
/// driver.execute(run_id).instrument(run_span("run-12345")).await
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("fabric.run", run_id = %run_id)
}

/// Emit event: simulation started.
pub fn emit_run_started(run_id: &str, project_id: &str, groups: usize, cycles: u32, seed: u64) {
    info!(
        event = "sim.run_started",
        run_id = %run_id,
        project_id = %project_id,
        groups = groups,
        cycles = cycles,
        seed = seed,
    );
}

/// Emit event: a new simulated cycle began.
pub fn emit_cycle_started(cycle: u32, sim_clock_ms: u64) {
    info!(event = "sim.cycle_started", cycle = cycle, sim_clock_ms = sim_clock_ms);
}

/// Emit event: a lease acquisition attempt hit a conflict.
pub fn emit_lease_conflict(agent: &str, workdir: &str, attempt: u32, max_retries: u32) {
    tracing::debug!(
        event = "lease.conflict",
        agent = %agent,
        workdir = %workdir,
        attempt = attempt,
        max_retries = max_retries,
    );
}

/// Emit event: the run recorded its terminal violation (warning level).
pub fn emit_violation(code: i32, kind: &str, reason: &str) {
    tracing::warn!(event = "sim.violation", code = code, kind = %kind, reason = %reason);
}

/// Emit event: run finished with duration, exit code and coverage.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, exit_code: i32, coverage_percent: f64) {
    info!(
        event = "sim.run_finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        exit_code = exit_code,
        coverage_percent = coverage_percent,
        success = exit_code == 0,
    );
}

/// Emit event: a checkpoint could not be written (warning level).
pub fn emit_checkpoint_failed(stage: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "sim.checkpoint_failed", stage = %stage, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id");
        let _guard = span.enter();
        emit_cycle_started(1, 0);
    }
}
