//! Long-run simulation driver.
//!
//! Replays every group's dispatch plan for `cycles` simulated cycles against
//! an in-memory artifact store. Each task takes a lease on its workdir
//! (optionally against an injected competing holder), produces a synthetic
//! output, has it scored by the quality gate and writes its internal
//! artifact. After each phase the group head publishes an exposed summary
//! and artifact ownership is verified. After each cycle every active
//! interaction edge is exercised by a cross-group read.
//!
//! The first violated invariant is recorded and the run stops immediately;
//! the halt travels up the call stack as [`Interrupt::Halted`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::Instrument;
use uuid::Uuid;

use crate::access::{
    detect_owner_mismatches, expected_owner, AccessOp, AccessPolicyEngine, AccessRecord, Actor,
};
use crate::coverage::{
    active_edges, CoverageReport, CoverageTracker, InteractionEdge, InteractionGraph,
};
use crate::error::{FabricError, Result};
use crate::lease::{open_backend, AuditedLeases, Lease, LeaseError, LeaseEvent, SimClock};
use crate::manifest::GroupManifest;
use crate::metrics::METRICS;
use crate::obs;
use crate::quality::{gate_specialist_output, synthetic_output, GateOutcome, GateStatus};
use crate::schedule::{build_dispatch_plan, DispatchPlan, Phase, Task};

use super::checkpoint::{
    CheckpointConstraints, CheckpointPayload, CheckpointWriter, IsolationSummary as CheckpointIsolation,
    LongRunSummary, NoopCheckpointWriter, QualitySummary, CHECKPOINT_SCHEMA_VERSION,
};
use super::config::{validate_group_list, SimulationConfig, CYCLE_MINUTES};
use super::events::{EventLog, EventRecord, SimEvent};
use super::report::{
    FinalReport, GroupStats, InteractionSummary, IsolationSummary, LeaseSummary, QualityGateSummary,
};
use super::store::{changed_paths, ArtifactSnapshot, ArtifactStore};
use super::violation::{ExitCode, ViolationKind, ViolationRecord};

/// Lease identity of the synthetic competing holder.
pub const LEASE_BLOCKER: &str = "lease-blocker";

const CYCLE_MS: u64 = CYCLE_MINUTES as u64 * 60 * 1000;

/// Manifests and interaction table a run is built from.
#[derive(Debug, Clone)]
pub struct SimulationInput {
    pub project_id: String,
    /// Active groups in iteration order.
    pub groups: Vec<(String, GroupManifest)>,
    /// Interaction table before restriction to the active groups.
    pub interaction_table: Vec<InteractionEdge>,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub config: SimulationConfig,
    pub report: FinalReport,
    pub events: Vec<EventRecord>,
    pub access_ledger: Vec<AccessRecord>,
    pub lease_events: Vec<LeaseEvent>,
    pub violations: Vec<ViolationRecord>,
    pub coverage: CoverageReport,
    pub interaction_graph: InteractionGraph,
    pub dispatch_plans: Vec<DispatchPlan>,
    pub artifacts: ArtifactStore,
}

impl RunOutcome {
    pub fn exit_code(&self) -> ExitCode {
        self.report.exit_code
    }
}

/// Why the driver stopped early.
enum Interrupt {
    /// A violation was recorded; unwind without further side effects.
    Halted,
    /// The run could not be carried out at all.
    Fatal(FabricError),
}

impl From<FabricError> for Interrupt {
    fn from(err: FabricError) -> Self {
        Interrupt::Fatal(err)
    }
}

impl From<LeaseError> for Interrupt {
    fn from(err: LeaseError) -> Self {
        Interrupt::Fatal(err.into())
    }
}

impl From<serde_json::Error> for Interrupt {
    fn from(err: serde_json::Error) -> Self {
        Interrupt::Fatal(err.into())
    }
}

type Step<T = ()> = std::result::Result<T, Interrupt>;

struct GroupRuntime {
    group_id: String,
    head: Actor,
    specialists: BTreeMap<String, Actor>,
    citation_required: bool,
    plan: DispatchPlan,
}

#[derive(Debug, Default)]
struct Injected {
    isolation: bool,
    deadlock: bool,
    gate_payload: bool,
    gate_publish: bool,
}

#[derive(Debug, Clone, Serialize)]
struct PhaseResult {
    specialist: String,
    gate: GateOutcome,
    internal_artifact: String,
}

pub struct SimulationDriver {
    config: SimulationConfig,
    project_id: String,
    groups: Vec<GroupRuntime>,
    head_by_group: BTreeMap<String, String>,
    active_edges: Vec<InteractionEdge>,
    clock: Arc<SimClock>,
    leases: AuditedLeases,
    checkpoint: Arc<dyn CheckpointWriter>,
    rng: fastrand::Rng,
    access: AccessPolicyEngine,
    store: ArtifactStore,
    events: EventLog,
    coverage: CoverageTracker,
    violations: Vec<ViolationRecord>,
    gate_stats: BTreeMap<String, u64>,
    group_stats: BTreeMap<String, GroupStats>,
    injected: Injected,
}

impl SimulationDriver {
    /// Validate `config` against `input`, build every dispatch plan and open
    /// the configured lease backend.
    pub fn new(config: SimulationConfig, input: SimulationInput) -> Result<Self> {
        config.validate()?;
        let group_ids: Vec<String> = input.groups.iter().map(|(id, _)| id.clone()).collect();
        validate_group_list(&group_ids)?;

        let mut groups = Vec::with_capacity(input.groups.len());
        let mut head_by_group = BTreeMap::new();
        let mut group_stats = BTreeMap::new();
        for (group_id, manifest) in &input.groups {
            let plan = build_dispatch_plan(&input.project_id, group_id, &config.task, manifest)?;
            let head = Actor::head(group_id.as_str(), manifest.head_agent());
            let specialists = plan
                .tasks()
                .map(|t| {
                    let actor = Actor::specialist(group_id.as_str(), t.agent_id.as_str());
                    (t.agent_id.clone(), actor)
                })
                .collect();
            head_by_group.insert(group_id.clone(), head.agent_id.clone());
            group_stats.insert(
                group_id.clone(),
                GroupStats {
                    phases: plan.phases.len(),
                    ..Default::default()
                },
            );
            groups.push(GroupRuntime {
                group_id: group_id.clone(),
                head,
                specialists,
                citation_required: manifest.quality_gates.citation_required,
                plan,
            });
        }

        let active_edges = active_edges(&input.interaction_table, &group_ids);
        if config.faults.isolation_violation && !active_edges.iter().any(|e| e.from != e.to) {
            return Err(FabricError::config(
                "isolation-violation injection needs at least one active cross-group interaction edge",
            ));
        }

        let lease_root = match (config.lease_backend, &config.lease_dir) {
            (crate::lease::LeaseBackendKind::Directory, None) => {
                return Err(FabricError::config(
                    "the directory lease backend needs a lease directory",
                ))
            }
            (_, dir) => dir.clone().unwrap_or_default(),
        };
        let clock = Arc::new(SimClock::new());
        let backend = open_backend(config.lease_backend, &lease_root, clock.clone())?;

        let gate_stats = [
            GateStatus::Pass,
            GateStatus::BlockedUncited,
            GateStatus::BlockedNeedsEvidence,
            GateStatus::BlockedReview,
        ]
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();

        Ok(Self {
            rng: fastrand::Rng::with_seed(config.seed),
            project_id: input.project_id,
            groups,
            head_by_group,
            coverage: CoverageTracker::new(active_edges.clone()),
            active_edges,
            clock,
            leases: AuditedLeases::new(backend),
            checkpoint: Arc::new(NoopCheckpointWriter),
            access: AccessPolicyEngine::new(),
            store: ArtifactStore::new(),
            events: EventLog::new(),
            violations: Vec::new(),
            gate_stats,
            group_stats,
            injected: Injected::default(),
            config,
        })
    }

    pub fn with_checkpoint_writer(mut self, writer: Arc<dyn CheckpointWriter>) -> Self {
        self.checkpoint = writer;
        self
    }

    pub fn active_edges(&self) -> &[InteractionEdge] {
        &self.active_edges
    }

    pub fn group_ids(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.group_id.clone()).collect()
    }

    /// Execute the run to completion or to its first violation.
    ///
    /// Violations are part of the returned outcome; `Err` means the run
    /// could not be carried out (configuration or lease storage failure).
    pub async fn run(self) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        self.execute(run_id).instrument(span).await
    }

    async fn execute(mut self, run_id: String) -> Result<RunOutcome> {
        let started = Instant::now();
        let cycles = self.config.cycles();
        obs::emit_run_started(&run_id, &self.project_id, self.groups.len(), cycles, self.config.seed);

        self.register_leases().await?;
        self.events.push(SimEvent::RunStart {
            cycles,
            seed: self.config.seed,
        });
        self.checkpoint("run-start", None).await;

        match self.run_cycles(cycles).await {
            Ok(()) | Err(Interrupt::Halted) => {}
            Err(Interrupt::Fatal(err)) => return Err(err),
        }

        let coverage = self.coverage.report();
        if self.exit_code().is_ok() && !coverage.is_complete() {
            self.fail(
                ViolationKind::CoverageInsufficient,
                "Interaction edge coverage below 100%",
                json!({ "coverage_percent": coverage.coverage_percent }),
            );
        }
        self.events.push(SimEvent::RunEnd {
            exit_code: self.exit_code(),
            reason: self.exit_reason(),
        });

        let report = self.final_report(&run_id, &coverage);
        let summary = LongRunSummary {
            exit_code: report.exit_code.code(),
            exit_reason: report.exit_reason.clone(),
            coverage_percent: coverage.coverage_percent,
            isolation_violations: report.isolation.violation_count,
        };
        self.checkpoint("run-end", Some(summary)).await;

        METRICS.flush();
        obs::emit_run_finished(
            &run_id,
            started.elapsed().as_millis() as u64,
            report.exit_code.code(),
            coverage.coverage_percent,
        );

        let interaction_graph = InteractionGraph {
            task: self.config.task.clone(),
            groups: self.group_ids(),
            edges: self.active_edges.clone(),
            coverage_target_percent: 100,
        };
        Ok(RunOutcome {
            report,
            events: self.events.into_records(),
            access_ledger: self.access.ledger().to_vec(),
            lease_events: self.leases.events(),
            violations: self.violations,
            coverage,
            interaction_graph,
            dispatch_plans: self.groups.into_iter().map(|g| g.plan).collect(),
            artifacts: self.store,
            config: self.config,
        })
    }

    fn exit_code(&self) -> ExitCode {
        self.violations
            .first()
            .map(|v| v.code)
            .unwrap_or(ExitCode::Ok)
    }

    fn exit_reason(&self) -> String {
        self.violations
            .first()
            .map(|v| v.reason.clone())
            .unwrap_or_default()
    }

    /// Record the run's terminal violation. Only the first one counts.
    fn fail(&mut self, kind: ViolationKind, reason: impl Into<String>, detail: Value) {
        if !self.violations.is_empty() {
            return;
        }
        let violation = ViolationRecord::new(kind, reason, detail);
        obs::emit_violation(violation.code.code(), kind.as_str(), &violation.reason);
        METRICS.inc_violations();
        self.events.push(SimEvent::Failure(violation.clone()));
        self.violations.push(violation);
    }

    async fn register_leases(&mut self) -> Result<()> {
        self.leases.register_agent(LEASE_BLOCKER).await?;
        for group in &self.groups {
            for task in group.plan.tasks() {
                let actor = &group.specialists[&task.agent_id];
                self.leases.register_agent(&actor.lease_agent_id()).await?;
                self.leases.register_resource(&task.workdir, false).await?;
            }
        }
        Ok(())
    }

    async fn run_cycles(&mut self, cycles: u32) -> Step {
        for cycle in 1..=cycles {
            self.events.push(SimEvent::CycleStart { cycle });
            obs::emit_cycle_started(cycle, self.clock.now_ms());

            for idx in 0..self.groups.len() {
                let phases = self.groups[idx].plan.phases.clone();
                for phase in &phases {
                    self.run_phase(idx, cycle, phase).await?;
                }
            }

            self.consume_edges(cycle)?;
            if self.config.faults.isolation_violation && !self.injected.isolation {
                self.injected.isolation = true;
                self.inject_isolation_violation()?;
            }

            self.events.push(SimEvent::CycleEnd { cycle });
            self.clock.advance(CYCLE_MS);
            self.checkpoint(&format!("cycle-{cycle:03}"), None).await;
        }
        Ok(())
    }

    async fn run_phase(&mut self, idx: usize, cycle: u32, phase: &Phase) -> Step {
        let before = self.store.snapshot();
        let mut results = Vec::with_capacity(phase.tasks.len());
        for task in &phase.tasks {
            results.push(self.run_task(idx, cycle, phase.phase_id, task).await?);
        }
        self.publish(idx, cycle, phase.phase_id, results)?;
        let after = self.store.snapshot();
        self.verify_ownership(&before, &after, cycle, phase.phase_id)
    }

    async fn run_task(&mut self, idx: usize, cycle: u32, phase_id: u32, task: &Task) -> Step<PhaseResult> {
        let group_id = self.groups[idx].group_id.clone();
        let citation_required = self.groups[idx].citation_required;
        let actor = self.groups[idx].specialists[&task.agent_id].clone();
        let lease_agent = actor.lease_agent_id();
        let ttl = self.config.ttl_secs;

        // Drawn for every task so the random sequence does not depend on faults.
        let mut conflict_now = self.rng.f64() < self.config.conflict_rate;
        let mut deadlock_now = false;
        if self.config.faults.lease_deadlock && !self.injected.deadlock {
            self.injected.deadlock = true;
            deadlock_now = true;
            conflict_now = true;
        }

        let lease = self
            .acquire_with_retry(&lease_agent, &task.workdir, conflict_now, deadlock_now)
            .await?;
        self.leases
            .heartbeat(&lease_agent, &task.workdir, &lease.token, ttl)
            .await?;

        let internal = format!(
            "{group_id}/internal/{}/cycle-{cycle:03}-phase-{phase_id:02}.json",
            actor.agent_id
        );
        let uncited = self.config.faults.gate_expose_failure && !self.injected.gate_payload;
        if uncited {
            self.injected.gate_payload = true;
        }
        let output = synthetic_output(&group_id, &actor.agent_id, &internal, cycle, phase_id, uncited);
        // Local simulation has no web evidence source.
        let gate = gate_specialist_output(&output, citation_required, false);
        *self.gate_stats.entry(gate.status.as_str().to_string()).or_insert(0) += 1;

        let body = json!({
            "cycle": cycle,
            "phase": phase_id,
            "task": self.config.task,
            "group_id": group_id,
            "specialist_id": actor.agent_id,
            "gate": gate,
            "output": output,
        });
        self.write_artifact(&actor, &internal, &body)?;
        if let Some(stats) = self.group_stats.get_mut(&group_id) {
            stats.specialist_tasks += 1;
        }

        self.leases
            .release(&lease_agent, &task.workdir, Some(&lease.token))
            .await?;

        Ok(PhaseResult {
            specialist: actor.agent_id,
            gate,
            internal_artifact: internal,
        })
    }

    async fn acquire_with_retry(
        &mut self,
        agent: &str,
        workdir: &str,
        conflict_now: bool,
        deadlock_now: bool,
    ) -> Step<Lease> {
        let ttl = self.config.ttl_secs;
        let max_retries = self.config.max_retries;

        let mut blocker: Option<Lease> = None;
        if conflict_now {
            match self.leases.acquire(LEASE_BLOCKER, workdir, ttl).await {
                Ok(lease) => {
                    self.events.push(SimEvent::LeaseConflictInjected {
                        workdir: workdir.to_string(),
                        deadlock: deadlock_now,
                    });
                    blocker = Some(lease);
                }
                Err(err) => {
                    self.events.push(SimEvent::LeaseConflictInjectionFailed {
                        workdir: workdir.to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            if deadlock_now && attempt > 1 {
                if let Some(held) = &blocker {
                    // Keep the deadlock alive across backoff.
                    self.leases
                        .heartbeat(LEASE_BLOCKER, workdir, &held.token, ttl)
                        .await?;
                }
            }

            let err = match self.leases.acquire(agent, workdir, ttl).await {
                Ok(lease) => {
                    self.events.push(SimEvent::LeaseAcquired {
                        workdir: workdir.to_string(),
                        attempt,
                        agent: agent.to_string(),
                    });
                    METRICS.inc_leases_acquired();
                    return Ok(lease);
                }
                Err(err) if err.is_conflict() => err,
                Err(err) => return Err(err.into()),
            };

            self.events.push(SimEvent::LeaseConflict {
                workdir: workdir.to_string(),
                attempt,
                agent: agent.to_string(),
                error: err.to_string(),
            });
            METRICS.inc_lease_conflicts();
            obs::emit_lease_conflict(agent, workdir, attempt, max_retries);

            if attempt == 1 && !deadlock_now {
                if let Some(held) = blocker.take() {
                    self.leases
                        .release(LEASE_BLOCKER, workdir, Some(&held.token))
                        .await?;
                }
            }

            if attempt >= max_retries {
                if let Some(held) = blocker.take() {
                    self.leases
                        .release(LEASE_BLOCKER, workdir, Some(&held.token))
                        .await?;
                }
                self.fail(
                    ViolationKind::LeaseUnresolved,
                    "Lease contention unresolved",
                    json!({ "workdir": workdir, "agent": agent, "attempts": max_retries }),
                );
                return Err(Interrupt::Halted);
            }

            self.backoff(attempt).await;
        }
    }

    /// Linear backoff: attempt `k` waits `retry_backoff_ms * k`, in real
    /// and simulated time.
    async fn backoff(&self, attempt: u32) {
        let wait_ms = self
            .config
            .retry_backoff_ms
            .saturating_mul(u64::from(attempt));
        if wait_ms > 0 {
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            self.clock.advance(wait_ms);
        }
    }

    fn publish(&mut self, idx: usize, cycle: u32, phase_id: u32, results: Vec<PhaseResult>) -> Step {
        let group_id = self.groups[idx].group_id.clone();
        let head = self.groups[idx].head.clone();
        let (accepted, blocked): (Vec<PhaseResult>, Vec<PhaseResult>) =
            results.into_iter().partition(|r| r.gate.status.is_pass());

        // One-shot: the first blocked phase under gate-expose injection is
        // published unfiltered.
        let leak = !blocked.is_empty()
            && self.config.faults.gate_expose_failure
            && !self.injected.gate_publish;
        if leak {
            self.injected.gate_publish = true;
        } else if !blocked.is_empty() {
            tracing::info!(
                group_id = %group_id,
                cycle,
                phase = phase_id,
                blocked = blocked.len(),
                "blocked results filtered"
            );
            self.events.push(SimEvent::BlockedResultsFiltered {
                group_id: group_id.clone(),
                cycle,
                phase: phase_id,
                blocked_count: blocked.len(),
            });
        }

        let published_blocked: &[PhaseResult] = if leak { &blocked[..] } else { &[] };
        let summary = json!({
            "cycle": cycle,
            "phase": phase_id,
            "group_id": group_id,
            "task": self.config.task,
            "accepted_results": accepted,
            "blocked_results": published_blocked,
        });
        let exposed = format!("{group_id}/exposed/cycle-{cycle:03}-phase-{phase_id:02}-summary.json");
        self.write_artifact(&head, &exposed, &summary)?;
        let latest = format!("{group_id}/exposed/latest-summary.json");
        self.write_artifact(&head, &latest, &summary)?;
        if let Some(stats) = self.group_stats.get_mut(&group_id) {
            stats.head_publications += 1;
        }

        if leak {
            self.fail(
                ViolationKind::QualityGateError,
                "Blocked specialist output was published to exposed artifact",
                json!({
                    "group_id": group_id,
                    "cycle": cycle,
                    "phase": phase_id,
                    "target": exposed,
                    "blocked_count": blocked.len(),
                    "blocked_results": blocked,
                }),
            );
            return Err(Interrupt::Halted);
        }
        Ok(())
    }

    fn verify_ownership(
        &mut self,
        before: &ArtifactSnapshot,
        after: &ArtifactSnapshot,
        cycle: u32,
        phase_id: u32,
    ) -> Step {
        let changed = changed_paths(before, after);
        let expected: BTreeMap<String, String> = changed
            .iter()
            .filter_map(|p| expected_owner(p, &self.head_by_group).map(|o| (p.clone(), o)))
            .collect();
        let mismatches = detect_owner_mismatches(
            changed.iter().map(String::as_str),
            &expected,
            self.store.last_writers(),
        );
        let Some(first) = mismatches.into_iter().next() else {
            return Ok(());
        };
        self.fail(
            ViolationKind::OwnershipMismatch,
            "Owner attribution mismatch",
            json!({
                "cycle": cycle,
                "phase": phase_id,
                "path": first.path,
                "expected_owner": first.expected_owner,
                "actual_owner": first.actual_owner.unwrap_or_else(|| "<unknown>".to_string()),
            }),
        );
        Err(Interrupt::Halted)
    }

    fn consume_edges(&mut self, cycle: u32) -> Step {
        for edge in self.active_edges.clone() {
            let consumer = self.head_of(&edge.to)?;
            let source = format!("{}/exposed/latest-summary.json", edge.from);
            self.read_artifact(&consumer, &source)?;
            self.coverage.mark_covered(&edge);
            self.events.push(SimEvent::EdgeConsumed {
                cycle,
                from: edge.from.clone(),
                to: edge.to.clone(),
                source,
            });
        }
        Ok(())
    }

    /// The consumer head of the first cross-group edge reads the producer's
    /// first specialist internal artifact. Policy must deny it.
    fn inject_isolation_violation(&mut self) -> Step {
        let Some(edge) = self.active_edges.iter().find(|e| e.from != e.to).cloned() else {
            return Err(FabricError::config("no cross-group edge for isolation injection").into());
        };
        let consumer = self.head_of(&edge.to)?;
        let producer_specialist = self
            .groups
            .iter()
            .find(|g| g.group_id == edge.from)
            .and_then(|g| g.specialists.keys().next().cloned())
            .ok_or_else(|| FabricError::config(format!("group '{}' has no specialists", edge.from)))?;
        let target = format!(
            "{}/internal/{producer_specialist}/cycle-001-phase-01.json",
            edge.from
        );
        self.read_artifact(&consumer, &target)?;
        Ok(())
    }

    fn head_of(&self, group_id: &str) -> Step<Actor> {
        self.groups
            .iter()
            .find(|g| g.group_id == group_id)
            .map(|g| g.head.clone())
            .ok_or_else(|| {
                Interrupt::Fatal(FabricError::config(format!("unknown group '{group_id}'")))
            })
    }

    fn write_artifact(&mut self, actor: &Actor, target: &str, body: &Value) -> Step {
        self.authorize(actor, AccessOp::Write, target)?;
        let mut bytes = serde_json::to_vec_pretty(body)?;
        bytes.push(b'\n');
        let tag = actor.tag();
        self.store.write(target, bytes, &tag);
        self.events.push(SimEvent::ArtifactWrite {
            actor: tag,
            target: target.to_string(),
        });
        METRICS.inc_artifacts_written();
        Ok(())
    }

    fn read_artifact(&mut self, actor: &Actor, target: &str) -> Step<Vec<u8>> {
        self.authorize(actor, AccessOp::Read, target)?;
        Ok(self.store.read(target).to_vec())
    }

    /// Gate one access. A denial is terminal.
    fn authorize(&mut self, actor: &Actor, op: AccessOp, target: &str) -> Step {
        let decision = self.access.check(actor, op, target);
        if decision.allowed {
            return Ok(());
        }
        self.fail(
            ViolationKind::IsolationViolation,
            format!(
                "Isolation policy violation on {}: {}",
                op.as_str(),
                decision.reason
            ),
            json!({
                "actor": actor.tag(),
                "op": op.as_str(),
                "target": target,
                "reason": decision.reason,
            }),
        );
        Err(Interrupt::Halted)
    }

    async fn checkpoint(&mut self, stage: &str, summary: Option<LongRunSummary>) {
        let isolation_violations = self.isolation_violation_count();
        let payload = CheckpointPayload {
            schema_version: CHECKPOINT_SCHEMA_VERSION.to_string(),
            project_id: self.project_id.clone(),
            task: self.config.task.clone(),
            stage: stage.to_string(),
            constraints: CheckpointConstraints {
                run_mode: self.config.run_mode.as_str().to_string(),
                duration_min: self.config.duration_min,
                strict_isolation: self.config.strict_isolation.as_str().to_string(),
                seed: self.config.seed,
            },
            selected_groups: self.group_ids(),
            quality_summary: QualitySummary {
                stats: self.gate_stats.clone(),
                blocked_total: self.blocked_total(),
            },
            isolation_summary: CheckpointIsolation {
                violation_count: isolation_violations,
                hard_fail: true,
                coverage_percent: summary.as_ref().map(|s| s.coverage_percent),
            },
            pending_actions: CheckpointPayload::pending_actions_for(summary.as_ref()),
            long_run_summary: summary,
        };
        if let Err(err) = self.checkpoint.write(&payload).await {
            obs::emit_checkpoint_failed(stage, &format!("{err:#}"));
            self.events.push(SimEvent::CheckpointWriteFailed {
                stage: stage.to_string(),
                error: format!("{err:#}"),
            });
        }
    }

    fn isolation_violation_count(&self) -> usize {
        self.violations.iter().filter(|v| v.kind.is_isolation()).count()
    }

    fn blocked_total(&self) -> u64 {
        self.gate_stats
            .iter()
            .filter(|(status, _)| status.as_str() != GateStatus::Pass.as_str())
            .map(|(_, count)| count)
            .sum()
    }

    fn final_report(&self, run_id: &str, coverage: &CoverageReport) -> FinalReport {
        let conflicts = self.events.count("lease_conflict");
        let groups = self.group_ids();
        FinalReport {
            run_id: run_id.to_string(),
            project_id: self.project_id.clone(),
            task: self.config.task.clone(),
            run_mode: self.config.run_mode.as_str().to_string(),
            strict_isolation: self.config.strict_isolation.as_str().to_string(),
            seed: self.config.seed,
            duration_min: self.config.duration_min,
            lease_backend: self.leases.backend_name().to_string(),
            group_completion_matrix: self.group_stats.clone(),
            interaction: InteractionSummary {
                edges_defined: coverage.total_edges,
                edges_covered: coverage.covered_edges,
                coverage_percent: coverage.coverage_percent,
            },
            isolation: IsolationSummary {
                violation_count: self.isolation_violation_count(),
                hard_fail: true,
            },
            lease: LeaseSummary {
                events: self.leases.events().len(),
                conflicts,
                retry_attempts: conflicts,
            },
            quality_gates: QualityGateSummary {
                stats: self.gate_stats.clone(),
                blocked_total: self.blocked_total(),
            },
            top_failed_invariants: self.violations.iter().take(5).cloned().collect(),
            violation_count: self.violations.len(),
            exit_code: self.exit_code(),
            exit_reason: self.exit_reason(),
            output_dir: self
                .config
                .output_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            reproduction_command: self.config.reproduction_command(&groups),
            groups,
            created_at: chrono::Utc::now(),
        }
    }
}
