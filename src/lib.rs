//! # Task Orchestrator
//!
//! Plans and executes a set of interdependent tasks. Tasks declare the
//! capabilities they need (document skills, service integrations,
//! documentation lookups); capabilities are supplied at runtime through a
//! registry of pluggable handlers.
//!
//! ## Architecture Overview
//!
//! - **[`task`]**: Task model, dependency resolution, parallel grouping and
//!   the persisted [`ExecutionPlan`]
//! - **[`execution`]**: Execution context, capability registry, task-type
//!   dispatch, the [`ExecutionEngine`] and run reports
//! - **[`cli`]**: Argument parsing and configuration discovery for the
//!   `orchestrator` binary
//! - **[`env`]**: File names, default directories and path helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use task_orchestrator::execution::{
//!     CapabilityRegistry, EngineConfig, ExecutionEngine, SimulatedHandler,
//! };
//! use task_orchestrator::task::{ExecutionPlan, Task, TaskRequirement, TaskType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let tasks = vec![
//!         Task::new("setup", "Project setup", TaskType::FileOperation),
//!         Task::new("report", "Write report", TaskType::DocumentGeneration)
//!             .with_dependency("setup")
//!             .with_requirement(TaskRequirement::skill("docx")),
//!     ];
//!     let plan = ExecutionPlan::build("demo", "Demo project", tasks)?.optimize(5)?;
//!
//!     let registry = CapabilityRegistry::new()
//!         .with_handler("docx", Arc::new(SimulatedHandler::new()));
//!     let engine = ExecutionEngine::new(EngineConfig::default(), Arc::new(registry));
//!
//!     let report = engine.execute_plan(&plan).await?;
//!     println!("Success rate: {:.1}%", report.summary.success_percentage());
//!     Ok(())
//! }
//! ```

/// Task model and planning.
///
/// Dependency resolution into a deterministic order, grouping into parallel
/// batches under a concurrency cap, and plan persistence.
pub mod task;

/// Plan execution.
///
/// Runs a plan against a capability registry, tracks per-task results and
/// assembles the run report.
pub mod execution;

/// Environment constants and path utilities.
pub mod env;

// CLI module for command-line interface
pub mod cli;

// Re-export main task types
pub use task::{ConfigurationError, ExecutionPlan, Priority, Task, TaskId, TaskRequirement, TaskType};

// Re-export main execution types
pub use execution::{
    CapabilityHandler, CapabilityRegistry, EngineConfig, ExecutionEngine, ExecutionResult,
    ExecutionStatus, RunReport,
};
