//! Agent Fabric CLI
//!
//! The `fabric` command validates multi-group agent workflows.
//!
//! ## Commands
//!
//! - `long-run`: replay every selected group's dispatch plan through the
//!   lease and isolation simulator and write the run artifacts
//! - `dispatch-plan`: dry-run one group's dispatch plan with its lock plan

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};

use fabric_core::manifest::ProjectManifest;
use fabric_core::schedule::{build_dispatch_plan, lock_plan, DispatchPlan, PhaseLocks};
use fabric_core::sim::config::{
    DEFAULT_CONFLICT_RATE, DEFAULT_DURATION_MIN, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF_MS,
    DEFAULT_SEED, DEFAULT_TTL_SECS,
};
use fabric_core::sim::{
    run_long_validation, write_run_artifacts, FaultInjection, GroupSelection, IsolationMode,
    RunMode, SimulationConfig, CANONICAL_TASK,
};
use fabric_core::{FabricError, LeaseBackendKind};

/// Exit code for configuration errors.
const EXIT_CONFIG: i32 = 1;

#[derive(Parser)]
#[command(name = "fabric")]
#[command(author = "Agent Fabric Maintainers")]
#[command(version = fabric_core::VERSION)]
#[command(about = "Multi-group agent workflow validation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Fabric root holding `generated/projects/<project>`
    #[arg(long, global = true, env = "FABRIC_ROOT", default_value = ".")]
    fabric_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the long-run concurrency and isolation simulation
    LongRun(LongRunArgs),

    /// Print a group's dispatch plan and the lease commands of every task
    DispatchPlan {
        /// Project id
        #[arg(long)]
        project_id: String,

        /// Group id
        #[arg(long)]
        group: String,

        /// Objective recorded in the plan
        #[arg(long)]
        objective: String,

        /// Lease TTL used in the lock commands (seconds)
        #[arg(long, default_value = "900")]
        ttl: u64,

        /// Command prefix of the external lock service
        #[arg(long, default_value = "multi-agent-dirs")]
        lease_cli: String,

        /// Workspace root passed to the lock service (default: fabric root parent)
        #[arg(long)]
        lease_root: Option<PathBuf>,

        /// Also write the plan to this file
        #[arg(long)]
        json_out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct LongRunArgs {
    /// Project id
    #[arg(long)]
    project_id: String,

    /// Task statement carried into every synthetic output
    #[arg(long, default_value = CANONICAL_TASK)]
    task: String,

    /// `all` or a comma-separated group list
    #[arg(long, default_value = "all")]
    groups: String,

    /// Simulated duration in minutes (one cycle per 5 minutes)
    #[arg(long, default_value_t = DEFAULT_DURATION_MIN)]
    duration_min: u32,

    /// Isolation enforcement mode
    #[arg(long, default_value = "hard-fail")]
    strict_isolation: String,

    /// Run mode
    #[arg(long, default_value = "local-sim")]
    run_mode: String,

    /// Seed for conflict injection
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Output directory (default: <project>/long-run/run-<stamp>-seed-<seed>)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Probability of injecting a competing lease holder per task
    #[arg(long, default_value_t = DEFAULT_CONFLICT_RATE)]
    conflict_rate: f64,

    /// Lease acquisition attempts per task
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Linear backoff step between attempts (ms)
    #[arg(long, default_value_t = DEFAULT_RETRY_BACKOFF_MS)]
    retry_backoff_ms: u64,

    /// Lease TTL (seconds)
    #[arg(long, default_value_t = DEFAULT_TTL_SECS)]
    ttl: u64,

    /// Lease backend: memory or directory
    #[arg(long, default_value = "memory")]
    lease_backend: String,

    /// State directory of the directory lease backend (default: <output>/leases)
    #[arg(long)]
    lease_dir: Option<PathBuf>,

    /// Make a consumer head read a producer's internal artifact once
    #[arg(long)]
    inject_isolation_violation: bool,

    /// Never release the first task's competing lease holder
    #[arg(long)]
    inject_lease_deadlock: bool,

    /// Publish the first blocked specialist result once
    #[arg(long)]
    inject_gate_expose_failure: bool,
}

impl LongRunArgs {
    fn into_config(self, fabric_root: PathBuf) -> fabric_core::Result<SimulationConfig> {
        Ok(SimulationConfig {
            fabric_root,
            project_id: self.project_id,
            task: self.task,
            groups: self.groups.parse::<GroupSelection>()?,
            duration_min: self.duration_min,
            strict_isolation: self.strict_isolation.parse::<IsolationMode>()?,
            run_mode: self.run_mode.parse::<RunMode>()?,
            seed: self.seed,
            output_dir: self.output_dir,
            conflict_rate: self.conflict_rate,
            max_retries: self.max_retries,
            retry_backoff_ms: self.retry_backoff_ms,
            ttl_secs: self.ttl,
            lease_backend: self.lease_backend.parse::<LeaseBackendKind>()?,
            lease_dir: self.lease_dir,
            faults: FaultInjection {
                isolation_violation: self.inject_isolation_violation,
                lease_deadlock: self.inject_lease_deadlock,
                gate_expose_failure: self.inject_gate_expose_failure,
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fabric_core::init_tracing(cli.json, level);

    let code = match cli.command {
        Commands::LongRun(args) => cmd_long_run(args, cli.fabric_root).await?,
        Commands::DispatchPlan {
            project_id,
            group,
            objective,
            ttl,
            lease_cli,
            lease_root,
            json_out,
        } => cmd_dispatch_plan(
            &cli.fabric_root,
            &project_id,
            &group,
            &objective,
            ttl,
            &lease_cli,
            lease_root.as_deref(),
            json_out.as_deref(),
        )?,
    };
    std::process::exit(code);
}

/// Print `err` and map it to the configuration exit code.
fn config_failure(err: &FabricError) -> i32 {
    println!("error: {err}");
    EXIT_CONFIG
}

async fn cmd_long_run(args: LongRunArgs, fabric_root: PathBuf) -> Result<i32> {
    let config = match args.into_config(fabric_root) {
        Ok(config) => config,
        Err(e) => return Ok(config_failure(&e)),
    };

    let outcome = match run_long_validation(config).await {
        Ok(outcome) => outcome,
        Err(e) => return Ok(config_failure(&e)),
    };

    let output_dir = outcome
        .config
        .output_dir
        .clone()
        .context("run finished without an output directory")?;
    write_run_artifacts(&outcome, &output_dir)
        .with_context(|| format!("Failed to write run artifacts to {:?}", output_dir))?;

    let report = &outcome.report;
    info!(
        exit_code = report.exit_code.code(),
        output_dir = %output_dir.display(),
        "long-run finished"
    );
    println!("exit_code: {}", report.exit_code);
    println!("exit_reason: {}", report.exit_reason);
    println!("output_dir: {}", output_dir.display());
    println!("coverage_percent: {}", report.interaction.coverage_percent);
    println!("isolation_violations: {}", report.isolation.violation_count);
    Ok(report.exit_code.code())
}

#[derive(Serialize)]
struct DispatchDryRun {
    #[serde(flatten)]
    plan: DispatchPlan,
    lock_plan: Vec<PhaseLocks>,
}

#[allow(clippy::too_many_arguments)]
fn cmd_dispatch_plan(
    fabric_root: &Path,
    project_id: &str,
    group_id: &str,
    objective: &str,
    ttl: u64,
    lease_cli: &str,
    lease_root: Option<&Path>,
    json_out: Option<&Path>,
) -> Result<i32> {
    let plan = match load_dispatch_plan(fabric_root, project_id, group_id, objective) {
        Ok(plan) => plan,
        Err(e) => return Ok(config_failure(&e)),
    };

    let root = lease_root
        .map(Path::to_path_buf)
        .or_else(|| fabric_root.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    let prefix = format!("{lease_cli} --root {}", root.display());
    let dry_run = DispatchDryRun {
        lock_plan: lock_plan(&plan, &prefix, ttl),
        plan,
    };

    let text = serde_json::to_string_pretty(&dry_run).context("Failed to serialize dispatch plan")?;
    println!("{text}");
    if let Some(path) = json_out {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        std::fs::write(path, format!("{text}\n"))
            .with_context(|| format!("Failed to write {:?}", path))?;
        println!("written: {}", path.display());
    }
    Ok(0)
}

fn load_dispatch_plan(
    fabric_root: &Path,
    project_id: &str,
    group_id: &str,
    objective: &str,
) -> fabric_core::Result<DispatchPlan> {
    let (project_dir, project) = ProjectManifest::load(fabric_root, project_id)?;
    let group = [group_id.to_string()];
    let (_, manifest) = project
        .load_group_manifests(&project_dir, &group)?
        .into_iter()
        .next()
        .ok_or_else(|| FabricError::config(format!("group '{group_id}' has no manifest")))?;
    build_dispatch_plan(&project.project_id, group_id, objective, &manifest)
}
