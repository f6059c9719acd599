//! Long-run simulation configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};
use crate::lease::LeaseBackendKind;
use crate::manifest::slugify;

pub const CANONICAL_TASK: &str =
    "Film thickness dependent polymorphism stability of metastable phase";

/// Simulated minutes covered by one cycle.
pub const CYCLE_MINUTES: u32 = 5;

pub const DEFAULT_DURATION_MIN: u32 = 75;
pub const DEFAULT_SEED: u64 = 20260301;
pub const DEFAULT_CONFLICT_RATE: f64 = 0.1;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 10;
pub const DEFAULT_TTL_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    #[default]
    LocalSim,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::LocalSim => "local-sim",
        }
    }
}

impl FromStr for RunMode {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "local-sim" => Ok(RunMode::LocalSim),
            other => Err(FabricError::config(format!(
                "only --run-mode local-sim is supported (got '{other}')"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    #[default]
    HardFail,
}

impl IsolationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationMode::HardFail => "hard-fail",
        }
    }
}

impl FromStr for IsolationMode {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "hard-fail" => Ok(IsolationMode::HardFail),
            other => Err(FabricError::config(format!(
                "only --strict-isolation hard-fail is supported (got '{other}')"
            ))),
        }
    }
}

/// `all` or an explicit ordered group list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GroupSelection {
    #[default]
    All,
    Named(Vec<String>),
}

impl FromStr for GroupSelection {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(GroupSelection::All);
        }
        let groups: Vec<String> = s
            .split(',')
            .map(slugify)
            .filter(|g| !g.is_empty())
            .collect();
        if groups.is_empty() {
            return Err(FabricError::config(
                "--groups must be 'all' or comma-separated group ids",
            ));
        }
        Ok(GroupSelection::Named(groups))
    }
}

impl TryFrom<String> for GroupSelection {
    type Error = FabricError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<GroupSelection> for String {
    fn from(value: GroupSelection) -> Self {
        value.to_string()
    }
}

impl fmt::Display for GroupSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupSelection::All => f.write_str("all"),
            GroupSelection::Named(groups) => f.write_str(&groups.join(",")),
        }
    }
}

/// One-shot fault injections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultInjection {
    /// A consumer head reads a producer's internal artifact.
    pub isolation_violation: bool,
    /// The first task's synthetic lease holder is never released.
    pub lease_deadlock: bool,
    /// The first specialist output is uncited and its blocked result is
    /// published anyway.
    pub gate_expose_failure: bool,
}

impl FaultInjection {
    pub fn any(&self) -> bool {
        self.isolation_violation || self.lease_deadlock || self.gate_expose_failure
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub fabric_root: PathBuf,
    pub project_id: String,
    pub task: String,
    pub groups: GroupSelection,
    pub duration_min: u32,
    pub strict_isolation: IsolationMode,
    pub run_mode: RunMode,
    pub seed: u64,
    /// Defaults to `<project>/long-run/run-<stamp>-seed-<seed>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    pub conflict_rate: f64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub ttl_secs: u64,
    pub lease_backend: LeaseBackendKind,
    /// Directory lease backend state; defaults to `<output_dir>/leases`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_dir: Option<PathBuf>,
    #[serde(default)]
    pub faults: FaultInjection,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fabric_root: PathBuf::from("."),
            project_id: String::new(),
            task: CANONICAL_TASK.to_string(),
            groups: GroupSelection::All,
            duration_min: DEFAULT_DURATION_MIN,
            strict_isolation: IsolationMode::HardFail,
            run_mode: RunMode::LocalSim,
            seed: DEFAULT_SEED,
            output_dir: None,
            conflict_rate: DEFAULT_CONFLICT_RATE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            ttl_secs: DEFAULT_TTL_SECS,
            lease_backend: LeaseBackendKind::Memory,
            lease_dir: None,
            faults: FaultInjection::default(),
        }
    }
}

impl SimulationConfig {
    /// Range checks that do not need manifests.
    pub fn validate(&self) -> Result<()> {
        if slugify(&self.project_id).is_empty() {
            return Err(FabricError::config("--project-id must not be empty"));
        }
        if self.duration_min < 1 {
            return Err(FabricError::config("--duration-min must be >= 1"));
        }
        if self.max_retries < 1 {
            return Err(FabricError::config("--max-retries must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.conflict_rate) {
            return Err(FabricError::config("--conflict-rate must be between 0 and 1"));
        }
        if let GroupSelection::Named(groups) = &self.groups {
            validate_group_list(groups)?;
        }
        Ok(())
    }

    pub fn project_slug(&self) -> String {
        slugify(&self.project_id)
    }

    pub fn cycles(&self) -> u32 {
        (self.duration_min / CYCLE_MINUTES).max(1)
    }

    pub fn resolve_output_dir(&self, project_dir: &Path, stamp: &str) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| {
            project_dir
                .join("long-run")
                .join(format!("run-{stamp}-seed-{}", self.seed))
        })
    }

    /// Command line that replays this configuration.
    pub fn reproduction_command(&self, groups: &[String]) -> String {
        let mut parts = vec![
            "fabric long-run".to_string(),
            format!("--fabric-root {}", self.fabric_root.display()),
            format!("--project-id {}", self.project_slug()),
            format!("--task \"{}\"", self.task),
            format!("--groups {}", groups.join(",")),
            format!("--duration-min {}", self.duration_min),
            format!("--strict-isolation {}", self.strict_isolation.as_str()),
            format!("--run-mode {}", self.run_mode.as_str()),
            format!("--seed {}", self.seed),
            format!("--conflict-rate {}", self.conflict_rate),
            format!("--max-retries {}", self.max_retries),
            format!("--retry-backoff-ms {}", self.retry_backoff_ms),
            format!("--ttl {}", self.ttl_secs),
        ];
        if self.lease_backend != LeaseBackendKind::Memory {
            parts.push("--lease-backend directory".to_string());
        }
        if self.faults.isolation_violation {
            parts.push("--inject-isolation-violation".to_string());
        }
        if self.faults.lease_deadlock {
            parts.push("--inject-lease-deadlock".to_string());
        }
        if self.faults.gate_expose_failure {
            parts.push("--inject-gate-expose-failure".to_string());
        }
        parts.join(" ")
    }
}

/// A resolved group list must be non-empty and free of duplicates.
pub fn validate_group_list(groups: &[String]) -> Result<()> {
    if groups.is_empty() {
        return Err(FabricError::config("at least one group is required"));
    }
    let mut seen = std::collections::BTreeSet::new();
    for group in groups {
        if !seen.insert(group.as_str()) {
            return Err(FabricError::config(format!("duplicate group '{group}'")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimulationConfig {
        SimulationConfig {
            project_id: "Demo Project".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_validate() {
        let cfg = config();
        cfg.validate().unwrap();
        assert_eq!(cfg.cycles(), 15);
        assert_eq!(cfg.project_slug(), "demo-project");
    }

    #[test]
    fn test_short_duration_still_runs_one_cycle() {
        let cfg = SimulationConfig {
            duration_min: 3,
            ..config()
        };
        assert_eq!(cfg.cycles(), 1);
    }

    #[test]
    fn test_out_of_range_values_are_config_errors() {
        let bad = [
            SimulationConfig { duration_min: 0, ..config() },
            SimulationConfig { max_retries: 0, ..config() },
            SimulationConfig { conflict_rate: 1.5, ..config() },
            SimulationConfig { conflict_rate: -0.1, ..config() },
            SimulationConfig {
                groups: GroupSelection::Named(vec!["a".into(), "a".into()]),
                ..config()
            },
        ];
        for cfg in bad {
            assert!(cfg.validate().unwrap_err().is_config());
        }
    }

    #[test]
    fn test_modes_reject_unsupported_values() {
        assert!("local-sim".parse::<RunMode>().is_ok());
        assert!("cluster".parse::<RunMode>().unwrap_err().is_config());
        assert!("hard-fail".parse::<IsolationMode>().is_ok());
        assert!("warn".parse::<IsolationMode>().is_err());
    }

    #[test]
    fn test_group_selection_parsing() {
        assert_eq!("ALL".parse::<GroupSelection>().unwrap(), GroupSelection::All);
        assert_eq!(
            "Developer, designer".parse::<GroupSelection>().unwrap(),
            GroupSelection::Named(vec!["developer".into(), "designer".into()])
        );
        assert!(" , ".parse::<GroupSelection>().is_err());
    }

    #[test]
    fn test_config_round_trips_through_yaml() {
        let cfg = config();
        let text = serde_yaml::to_string(&cfg).unwrap();
        assert!(text.contains("run_mode: local-sim"));
        assert!(text.contains("groups: all"));
        let back: SimulationConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_reproduction_command_lists_injections() {
        let cfg = SimulationConfig {
            faults: FaultInjection {
                lease_deadlock: true,
                ..Default::default()
            },
            ..config()
        };
        let cmd = cfg.reproduction_command(&["a".to_string(), "b".to_string()]);
        assert!(cmd.starts_with("fabric long-run"));
        assert!(cmd.contains("--groups a,b"));
        assert!(cmd.contains("--seed 20260301"));
        assert!(cmd.contains("--inject-lease-deadlock"));
        assert!(!cmd.contains("--inject-isolation-violation"));
    }
}
