//! Final report model and on-disk run artifacts.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::SimulationConfig;
use super::driver::RunOutcome;
use super::events::to_ndjson;
use super::violation::{ExitCode, ViolationRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStats {
    pub specialist_tasks: u64,
    pub head_publications: u64,
    pub phases: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionSummary {
    pub edges_defined: usize,
    pub edges_covered: usize,
    pub coverage_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationSummary {
    pub violation_count: usize,
    pub hard_fail: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSummary {
    /// Lease backend calls recorded.
    pub events: usize,
    pub conflicts: usize,
    pub retry_attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGateSummary {
    pub stats: BTreeMap<String, u64>,
    pub blocked_total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub run_id: String,
    pub project_id: String,
    pub task: String,
    pub run_mode: String,
    pub strict_isolation: String,
    pub seed: u64,
    pub duration_min: u32,
    pub lease_backend: String,
    pub groups: Vec<String>,
    pub group_completion_matrix: BTreeMap<String, GroupStats>,
    pub interaction: InteractionSummary,
    pub isolation: IsolationSummary,
    pub lease: LeaseSummary,
    pub quality_gates: QualityGateSummary,
    pub top_failed_invariants: Vec<ViolationRecord>,
    pub violation_count: usize,
    pub exit_code: ExitCode,
    pub exit_reason: String,
    pub output_dir: String,
    pub reproduction_command: String,
    pub created_at: DateTime<Utc>,
}

/// Markdown rendering of `report`.
pub fn render_report_md(report: &FinalReport) -> String {
    let mut out = String::new();
    out.push_str("# Long-Run Validation Report\n\n");
    out.push_str(&format!("- Project: `{}`\n", report.project_id));
    out.push_str(&format!("- Task: {}\n", report.task));
    let reason = if report.exit_reason.is_empty() {
        "pass"
    } else {
        report.exit_reason.as_str()
    };
    out.push_str(&format!("- Exit: `{}` ({})\n", report.exit_code, reason));
    out.push_str(&format!("- Seed: `{}`\n", report.seed));
    out.push_str(&format!("- Duration (sim): `{} min`\n", report.duration_min));
    out.push_str(&format!("- Run mode: `{}`\n", report.run_mode));
    out.push_str(&format!("- Strict isolation: `{}`\n", report.strict_isolation));
    out.push_str(&format!("- Lease backend: `{}`\n\n", report.lease_backend));

    out.push_str("## Group Completion Matrix\n");
    out.push_str("| Group | Specialist Tasks | Head Publications | Phases |\n");
    out.push_str("|---|---:|---:|---:|\n");
    for (group_id, stat) in &report.group_completion_matrix {
        out.push_str(&format!(
            "| `{}` | {} | {} | {} |\n",
            group_id, stat.specialist_tasks, stat.head_publications, stat.phases
        ));
    }

    out.push_str("\n## Interaction Coverage\n");
    out.push_str(&format!(
        "- Coverage: `{}%`\n- Edges covered: `{}/{}`\n",
        report.interaction.coverage_percent,
        report.interaction.edges_covered,
        report.interaction.edges_defined
    ));

    out.push_str("\n## Isolation\n");
    out.push_str(&format!("- Violations: `{}`\n", report.isolation.violation_count));

    out.push_str("\n## Lease Stats\n");
    out.push_str(&format!(
        "- Events: `{}`\n- Conflicts: `{}`\n- Retry attempts: `{}`\n",
        report.lease.events, report.lease.conflicts, report.lease.retry_attempts
    ));

    out.push_str("\n## Quality Gates\n");
    for (status, count) in &report.quality_gates.stats {
        out.push_str(&format!("- {status}: `{count}`\n"));
    }

    out.push_str("\n## Reproduction\n```bash\n");
    out.push_str(&report.reproduction_command);
    out.push_str("\n```\n");

    if !report.top_failed_invariants.is_empty() {
        out.push_str("\n## Top Failed Invariants\n");
        for item in &report.top_failed_invariants {
            out.push_str(&format!("- `{}`: `{}`\n", item.reason, item.detail));
        }
    }
    out
}

#[derive(Serialize)]
struct RunConfigRecord<'a> {
    #[serde(flatten)]
    config: &'a SimulationConfig,
    resolved_groups: &'a [String],
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ViolationsDocument<'a> {
    violations: &'a [ViolationRecord],
}

/// Write every run artifact below `dir`:
///
/// - `run-config.yaml`, `dispatch-plans/<group>.json`
/// - `interaction-graph.{yaml,json}`, `coverage.{yaml,json}`
/// - `events.ndjson`, `access-ledger.ndjson`, `lease-events.ndjson`
/// - `violations.json`, `final-report.{json,md}`
/// - `artifacts/<group>/...`, the simulated artifact tree
pub fn write_run_artifacts(outcome: &RunOutcome, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {:?}", dir))?;

    let run_config = RunConfigRecord {
        config: &outcome.config,
        resolved_groups: &outcome.report.groups,
        created_at: outcome.report.created_at,
    };
    write_yaml(&dir.join("run-config.yaml"), &run_config)?;

    let plan_dir = dir.join("dispatch-plans");
    std::fs::create_dir_all(&plan_dir).with_context(|| format!("create {:?}", plan_dir))?;
    for plan in &outcome.dispatch_plans {
        write_json(&plan_dir.join(format!("{}.json", plan.group_id)), plan)?;
    }

    write_yaml(&dir.join("interaction-graph.yaml"), &outcome.interaction_graph)?;
    write_json(&dir.join("interaction-graph.json"), &outcome.interaction_graph)?;
    write_yaml(&dir.join("coverage.yaml"), &outcome.coverage)?;
    write_json(&dir.join("coverage.json"), &outcome.coverage)?;

    write_text(&dir.join("events.ndjson"), &to_ndjson(&outcome.events)?)?;
    write_text(&dir.join("access-ledger.ndjson"), &to_ndjson(&outcome.access_ledger)?)?;
    write_text(&dir.join("lease-events.ndjson"), &to_ndjson(&outcome.lease_events)?)?;
    write_json(
        &dir.join("violations.json"),
        &ViolationsDocument {
            violations: &outcome.violations,
        },
    )?;

    write_json(&dir.join("final-report.json"), &outcome.report)?;
    write_text(&dir.join("final-report.md"), &render_report_md(&outcome.report))?;

    let artifacts = dir.join("artifacts");
    outcome
        .artifacts
        .export(&artifacts)
        .with_context(|| format!("export artifacts to {:?}", artifacts))?;
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut content = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {:?}", path))?;
    content.push('\n');
    write_text(path, &content)
}

fn write_yaml<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_yaml::to_string(value).with_context(|| format!("serialize {:?}", path))?;
    write_text(path, &content)
}

fn write_text(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
