//! Dependency-phase scheduling.
//!
//! Turns a group's specialist dependency graph into an ordered list of
//! barrier-synchronised [`Phase`]s. Each phase holds every not-yet-scheduled
//! specialist whose dependencies were all scheduled in earlier phases, sorted
//! by agent id, so identical manifests always yield identical plans.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};
use crate::manifest::{
    DependencyRecord, ExecutionDefaults, ExecutionOverride, GroupManifest, Specialist,
    SpecialistRole,
};

/// Version tag carried by every dispatch plan document.
pub const DISPATCH_SCHEMA_VERSION: &str = "2.0";

/// Whether a phase holds one task or several concurrently runnable ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseMode {
    Sequential,
    Parallel,
}

impl PhaseMode {
    fn for_len(len: usize) -> Self {
        if len > 1 {
            PhaseMode::Parallel
        } else {
            PhaseMode::Sequential
        }
    }
}

/// Resolved execution metadata for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub transport: String,
    pub scheduler: String,
    pub hardware: String,
    pub requires_gpu: bool,
}

impl Default for TaskExecution {
    fn default() -> Self {
        Self {
            transport: "local".to_string(),
            scheduler: "local".to_string(),
            hardware: "cpu".to_string(),
            requires_gpu: false,
        }
    }
}

/// Merge group execution defaults with a specialist's overrides.
pub fn resolve_task_execution(
    defaults: &ExecutionDefaults,
    overrides: &ExecutionOverride,
) -> TaskExecution {
    let mut exec = TaskExecution::default();

    if defaults.remote_transport.as_deref() == Some("ssh") {
        exec.transport = "ssh".to_string();
    }
    if let Some(first) = defaults.schedulers.first() {
        exec.scheduler = first.clone();
    }
    if let Some(first) = defaults.hardware.first() {
        exec.hardware = first.clone();
        exec.requires_gpu = defaults.hardware.iter().any(|h| {
            let h = h.to_ascii_lowercase();
            h.contains("gpu") || h.contains("cuda")
        });
    }

    if let Some(transport) = overrides.remote_transport.as_ref().filter(|s| !s.is_empty()) {
        exec.transport = transport.clone();
    }
    if let Some(scheduler) = overrides.scheduler.as_ref().filter(|s| !s.is_empty()) {
        exec.scheduler = scheduler.clone();
    }
    if let Some(hardware) = overrides.hardware.as_ref().filter(|s| !s.is_empty()) {
        exec.hardware = hardware.clone();
    }
    if let Some(requires_gpu) = overrides.requires_gpu {
        exec.requires_gpu = requires_gpu;
    }
    exec
}

/// Lease-guarded working directory of a specialist.
pub fn task_workdir(project_id: &str, group_id: &str, agent_id: &str) -> String {
    format!("generated/projects/{project_id}/work/{group_id}/{agent_id}")
}

/// Per-specialist execution unit within a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub agent_id: String,
    pub role: SpecialistRole,
    pub focus: String,
    pub workdir: String,
    #[serde(flatten)]
    pub execution: TaskExecution,
    /// Sorted agent ids this task waits for.
    pub depends_on: Vec<String>,
    pub dependency_checks: Vec<DependencyRecord>,
}

/// A barrier-synchronised batch of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// 1-based, strictly increasing.
    pub phase_id: u32,
    pub mode: PhaseMode,
    pub tasks: Vec<Task>,
}

/// Deterministic dispatch plan for one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchPlan {
    pub project_id: String,
    pub group_id: String,
    pub objective: String,
    pub dispatch_mode: String,
    pub session_mode: String,
    pub schema_version: String,
    pub head_agent: String,
    pub phases: Vec<Phase>,
    pub quality_gates: crate::manifest::QualityGates,
}

impl DispatchPlan {
    /// Total number of tasks across all phases.
    pub fn task_count(&self) -> usize {
        self.phases.iter().map(|p| p.tasks.len()).sum()
    }

    /// Every task in phase order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.phases.iter().flat_map(|p| p.tasks.iter())
    }
}

/// Level-by-level topological ordering of `specialists`.
///
/// Returns the agent ids of each phase, in phase order and sorted within a
/// phase. Fails with [`FabricError::DependencyCycle`] naming every agent
/// that can never become ready, which also covers dependencies on agents
/// that do not exist.
pub fn schedule_phases(group_id: &str, specialists: &[Specialist]) -> Result<Vec<Vec<String>>> {
    let deps: BTreeMap<&str, BTreeSet<&str>> = specialists
        .iter()
        .map(|s| {
            (
                s.agent_id.as_str(),
                s.depends_on.iter().map(|d| d.agent_id.as_str()).collect(),
            )
        })
        .collect();

    let mut remaining: BTreeSet<&str> = deps.keys().copied().collect();
    let mut completed: BTreeSet<&str> = BTreeSet::new();
    let mut phases = Vec::new();

    while !remaining.is_empty() {
        // BTreeSet iteration keeps the ready set sorted by agent id.
        let ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| deps[id].is_subset(&completed))
            .collect();

        if ready.is_empty() {
            return Err(FabricError::DependencyCycle {
                group_id: group_id.to_string(),
                agents: remaining.iter().map(|s| s.to_string()).collect(),
            });
        }

        for id in &ready {
            remaining.remove(id);
            completed.insert(*id);
        }
        phases.push(ready.into_iter().map(str::to_string).collect());
    }

    Ok(phases)
}

/// Build the dispatch plan of `group_id` from its manifest.
pub fn build_dispatch_plan(
    project_id: &str,
    group_id: &str,
    objective: &str,
    manifest: &GroupManifest,
) -> Result<DispatchPlan> {
    manifest.validate(group_id)?;
    let ordering = schedule_phases(group_id, &manifest.specialists)?;

    let phases = ordering
        .into_iter()
        .enumerate()
        .map(|(idx, agent_ids)| {
            let tasks: Vec<Task> = agent_ids
                .iter()
                .filter_map(|aid| manifest.specialist(aid))
                .map(|specialist| build_task(project_id, group_id, manifest, specialist))
                .collect();
            Phase {
                phase_id: idx as u32 + 1,
                mode: PhaseMode::for_len(tasks.len()),
                tasks,
            }
        })
        .collect();

    Ok(DispatchPlan {
        project_id: project_id.to_string(),
        group_id: group_id.to_string(),
        objective: objective.to_string(),
        dispatch_mode: "hybrid".to_string(),
        session_mode: manifest
            .interaction
            .mode
            .clone()
            .unwrap_or_else(|| "interactive-separated".to_string()),
        schema_version: DISPATCH_SCHEMA_VERSION.to_string(),
        head_agent: manifest.head_agent().to_string(),
        phases,
        quality_gates: manifest.quality_gates.clone(),
    })
}

fn build_task(
    project_id: &str,
    group_id: &str,
    manifest: &GroupManifest,
    specialist: &Specialist,
) -> Task {
    let mut depends_on: Vec<String> = specialist
        .depends_on
        .iter()
        .map(|d| d.agent_id.clone())
        .collect();
    depends_on.sort();

    Task {
        agent_id: specialist.agent_id.clone(),
        role: specialist.role.clone(),
        focus: specialist.focus.clone(),
        workdir: task_workdir(project_id, group_id, &specialist.agent_id),
        execution: resolve_task_execution(&manifest.execution_defaults, &specialist.execution),
        depends_on,
        dependency_checks: specialist.depends_on.clone(),
    }
}

/// Lease commands a worker runs around one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockCommands {
    pub workdir: String,
    pub acquire: String,
    pub heartbeat: String,
    pub release: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseLocks {
    pub phase_id: u32,
    pub locks: Vec<LockCommands>,
}

/// Per-phase acquire/heartbeat/release commands for every task workdir.
///
/// `lease_cli` is the command prefix of the external lock service,
/// including any root argument it needs.
pub fn lock_plan(plan: &DispatchPlan, lease_cli: &str, ttl_secs: u64) -> Vec<PhaseLocks> {
    plan.phases
        .iter()
        .map(|phase| PhaseLocks {
            phase_id: phase.phase_id,
            locks: phase
                .tasks
                .iter()
                .map(|task| LockCommands {
                    workdir: task.workdir.clone(),
                    acquire: format!(
                        "{lease_cli} acquire {} {} --ttl {ttl_secs}",
                        task.agent_id, task.workdir
                    ),
                    heartbeat: format!("{lease_cli} heartbeat <lease_token> --ttl {ttl_secs}"),
                    release: format!("{lease_cli} release {} {}", task.agent_id, task.workdir),
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> GroupManifest {
        GroupManifest::new("g")
            .with_specialist(Specialist::new("sink").with_dependency("left").with_dependency("right"))
            .with_specialist(Specialist::new("right").with_dependency("root"))
            .with_specialist(Specialist::new("left").with_dependency("root"))
            .with_specialist(Specialist::new("root"))
    }

    #[test]
    fn test_diamond_yields_three_phases() {
        let plan = build_dispatch_plan("p", "g", "obj", &diamond()).unwrap();
        let ids: Vec<Vec<&str>> = plan
            .phases
            .iter()
            .map(|p| p.tasks.iter().map(|t| t.agent_id.as_str()).collect())
            .collect();
        assert_eq!(ids, vec![vec!["root"], vec!["left", "right"], vec!["sink"]]);
        assert_eq!(plan.phases[0].mode, PhaseMode::Sequential);
        assert_eq!(plan.phases[1].mode, PhaseMode::Parallel);
        assert_eq!(plan.phases[2].phase_id, 3);
        assert_eq!(plan.phases[2].tasks[0].depends_on, vec!["left", "right"]);
        assert_eq!(plan.task_count(), 4);
    }

    #[test]
    fn test_cycle_names_all_unschedulable_agents() {
        let manifest = GroupManifest::new("g")
            .with_specialist(Specialist::new("free"))
            .with_specialist(Specialist::new("a").with_dependency("b"))
            .with_specialist(Specialist::new("b").with_dependency("a"))
            .with_specialist(Specialist::new("c").with_dependency("a"));
        match build_dispatch_plan("p", "g", "obj", &manifest).unwrap_err() {
            FabricError::DependencyCycle { group_id, agents } => {
                assert_eq!(group_id, "g");
                assert_eq!(agents, vec!["a", "b", "c"]);
            }
            other => panic!("expected DependencyCycle, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_dependency_is_reported_as_cycle() {
        let manifest =
            GroupManifest::new("g").with_specialist(Specialist::new("a").with_dependency("ghost"));
        assert!(matches!(
            build_dispatch_plan("p", "g", "obj", &manifest),
            Err(FabricError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_execution_resolution_merges_defaults_and_overrides() {
        let defaults = ExecutionDefaults {
            remote_transport: Some("ssh".to_string()),
            schedulers: vec!["slurm".to_string(), "pbs".to_string()],
            hardware: vec!["cpu-node".to_string(), "A100-GPU".to_string()],
        };
        let exec = resolve_task_execution(&defaults, &ExecutionOverride::default());
        assert_eq!(exec.transport, "ssh");
        assert_eq!(exec.scheduler, "slurm");
        assert_eq!(exec.hardware, "cpu-node");
        assert!(exec.requires_gpu);

        let overrides = ExecutionOverride {
            scheduler: Some("local".to_string()),
            requires_gpu: Some(false),
            ..Default::default()
        };
        let exec = resolve_task_execution(&defaults, &overrides);
        assert_eq!(exec.scheduler, "local");
        assert!(!exec.requires_gpu);
    }

    #[test]
    fn test_plan_serializes_flat_execution_fields() {
        let plan = build_dispatch_plan("p", "g", "obj", &diamond()).unwrap();
        let json = serde_json::to_value(&plan).unwrap();
        let task = &json["phases"][0]["tasks"][0];
        assert_eq!(task["transport"], "local");
        assert_eq!(task["workdir"], "generated/projects/p/work/g/root");
        assert_eq!(json["phases"][1]["mode"], "parallel");
        assert_eq!(json["schema_version"], DISPATCH_SCHEMA_VERSION);
    }

    #[test]
    fn test_lock_plan_follows_phases() {
        let plan = build_dispatch_plan("p", "g", "obj", &diamond()).unwrap();
        let locks = lock_plan(&plan, "lockctl --root /ws", 900);
        assert_eq!(locks.len(), 3);
        assert_eq!(locks[1].phase_id, 2);
        assert_eq!(locks[1].locks.len(), 2);
        let root = &locks[0].locks[0];
        assert_eq!(root.workdir, "generated/projects/p/work/g/root");
        assert_eq!(
            root.acquire,
            "lockctl --root /ws acquire root generated/projects/p/work/g/root --ttl 900"
        );
        assert!(root.heartbeat.contains("<lease_token> --ttl 900"));
        assert!(root.release.ends_with("release root generated/projects/p/work/g/root"));
    }
}
