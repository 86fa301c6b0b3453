//! Command line argument parsing
//!
//! Subcommands:
//! - `plan`: Resolve a task file into an execution plan, optionally optimized
//! - `run`: Execute a plan and write the run report
//! - `validate`: Check a plan file without executing it
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "orchestrator")]
#[command(author = "Task Orchestrator Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dependency-aware task planning and execution")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Resolve the execution order of a plan file (TOML or JSON)
    Plan {
        /// Path to the plan file
        file: PathBuf,
        /// Partition the order into parallel groups
        #[arg(long = "optimize")]
        optimize: bool,
        /// Concurrency cap for --optimize (defaults to framework.max_parallel_tasks)
        #[arg(long = "max-parallel", value_name = "N")]
        max_parallel: Option<usize>,
        /// Save the resolved plan (JSON or TOML format based on extension)
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Execute a plan file and write the run report
    Run {
        /// Path to the plan file
        file: PathBuf,
        /// Partition the order into parallel groups before executing
        #[arg(long = "optimize")]
        optimize: bool,
        /// Concurrency cap for --optimize (defaults to framework.max_parallel_tasks)
        #[arg(long = "max-parallel", value_name = "N")]
        max_parallel: Option<usize>,
        /// Do not register simulated handlers for the plan's capabilities
        #[arg(long = "strict")]
        strict: bool,
        /// Write the report here instead of the project output directory
        #[arg(long = "report-dir", value_name = "DIR")]
        report_dir: Option<PathBuf>,
    },
    /// Validate a plan file without executing it
    Validate {
        /// Path to the plan file
        file: PathBuf,
    },
    /// Show configuration discovery information
    ShowConfig,
}

impl Args {
    /// Log filter directive for the subscriber
    pub fn log_directive(&self, configured_level: &str) -> String {
        let level = if self.verbose { "debug" } else { configured_level };
        format!("task_orchestrator={level},orchestrator={level}")
    }
}
