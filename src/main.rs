use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use task_orchestrator::cli::{Args, Commands, ConfigDiscovery, OrchestratorConfig};
use task_orchestrator::execution::{CapabilityRegistry, ExecutionEngine, JsonReportWriter, ReportSink};
use task_orchestrator::env;
use task_orchestrator::task::ExecutionPlan;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt, reload};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging before config discovery so its messages are visible
    let env_filter = EnvFilter::try_from_default_env().ok();
    let filter_from_env = env_filter.is_some();
    let bootstrap = env_filter
        .unwrap_or_else(|| EnvFilter::new(args.log_directive(env::DEFAULT_LOG_LEVEL)));
    let (filter, filter_handle) = reload::Layer::new(bootstrap);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    info!("Starting task orchestrator");

    let config = ConfigDiscovery::load(args.config.as_deref())?;
    if !filter_from_env {
        filter_handle
            .reload(EnvFilter::new(args.log_directive(&config.execution.log_level)))
            .context("Failed to apply configured log level")?;
    }

    match args.command {
        Commands::Plan {
            file,
            optimize,
            max_parallel,
            output,
        } => run_plan(&config, &file, optimize, max_parallel, output.as_deref()),
        Commands::Run {
            file,
            optimize,
            max_parallel,
            strict,
            report_dir,
        } => run_execute(&config, &file, optimize, max_parallel, strict, report_dir).await,
        Commands::Validate { file } => run_validate(&file),
        Commands::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            println!();
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_plan(
    config: &OrchestratorConfig,
    file: &Path,
    optimize: bool,
    max_parallel: Option<usize>,
) -> Result<ExecutionPlan> {
    let plan = ExecutionPlan::load(file)?
        .prepare()
        .with_context(|| format!("Invalid execution plan: {}", file.display()))?;

    if !optimize {
        return Ok(plan);
    }
    let cap = max_parallel.unwrap_or(config.framework.max_parallel_tasks);
    plan.optimize(cap)
        .with_context(|| format!("Failed to optimize plan with max parallelism {}", cap))
}

fn run_plan(
    config: &OrchestratorConfig,
    file: &Path,
    optimize: bool,
    max_parallel: Option<usize>,
    output: Option<&Path>,
) -> Result<()> {
    let plan = load_plan(config, file, optimize, max_parallel)?;

    println!("Execution plan '{}': {}", plan.project_name, plan.summary());
    match &plan.metadata.parallel_groups {
        Some(groups) => {
            for (i, group) in groups.iter().enumerate() {
                println!("  Group {}: {}", i + 1, group.join(", "));
            }
        }
        None => {
            for (i, task_id) in plan.execution_order.iter().enumerate() {
                println!("  {}. {}", i + 1, task_id);
            }
        }
    }
    println!("Estimated duration: {}s", plan.estimated_total_duration);

    if let Some(path) = output {
        plan.save(path)?;
        println!("Plan saved to {}", path.display());
    }
    Ok(())
}

async fn run_execute(
    config: &OrchestratorConfig,
    file: &Path,
    optimize: bool,
    max_parallel: Option<usize>,
    strict: bool,
    report_dir: Option<PathBuf>,
) -> Result<()> {
    let plan = load_plan(config, file, optimize, max_parallel)?;

    let registry = if strict {
        warn!("Strict mode: no capability handlers registered");
        CapabilityRegistry::new()
    } else {
        CapabilityRegistry::simulated_for(&plan.tasks)
    };

    let engine = ExecutionEngine::new(config.engine_config(), Arc::new(registry));
    let report = engine.execute_plan(&plan).await?;

    let writer = match report_dir {
        Some(dir) => JsonReportWriter::in_directory(dir),
        None => JsonReportWriter::new(),
    };
    let report_path = writer.persist(&report).await?;

    println!("{}", report);
    println!("Report written to {}", report_path.display());

    let code = report.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn run_validate(file: &Path) -> Result<()> {
    let plan = ExecutionPlan::load(file)?;
    plan.validate()
        .with_context(|| format!("Invalid execution plan: {}", file.display()))?;
    println!("Plan '{}' is valid: {}", plan.project_name, plan.summary());
    Ok(())
}
