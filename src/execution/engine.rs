//! Plan execution.
//!
//! The engine validates a plan, prepares per-run directories and context,
//! then drives the tasks either one by one (sequential mode) or group by
//! group (parallel mode, used whenever the plan carries `parallel_groups`).
//!
//! ## Task state machine
//!
//! ```text
//! PENDING ──deps completed──▶ IN_PROGRESS ──▶ COMPLETED | FAILED
//!    │
//!    ├──deps not completed──▶ SKIPPED
//!    └──run halted─────────▶ NOT_ATTEMPTED
//! ```
//!
//! A FAILED task whose priority halts the run (CRITICAL or HIGH) stops
//! further dispatch. Nothing already running is cancelled: in parallel mode
//! the failing task's group is joined as usual, and every task in later
//! groups is recorded as NOT_ATTEMPTED.

use crate::env;
use crate::execution::context::{CapabilityCache, ExecutionContext, LedgerError};
use crate::execution::dispatch::Dispatcher;
use crate::execution::registry::{CapabilityRegistry, HandlerError};
use crate::execution::report::{RunMode, RunReport};
use crate::execution::result::ExecutionResult;
use crate::task::{ConfigurationError, ExecutionPlan, Task, TaskId};
use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs as async_fs;
use tracing::{debug, error, info, warn};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Root under which each project's work directory is created
    pub work_directory: PathBuf,
    /// Root under which each project's output directory is created
    pub output_directory: PathBuf,
    /// Stop dispatching after a CRITICAL or HIGH task fails
    pub stop_on_critical_failure: bool,
    /// Expiry for memoized capability results; `None` keeps them for the whole run
    pub cache_ttl_seconds: Option<u64>,
    /// Extra project variables exposed to handlers
    pub variables: BTreeMap<String, Value>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_directory: PathBuf::from(env::DEFAULT_WORK_DIR),
            output_directory: PathBuf::from(env::DEFAULT_OUTPUT_DIR),
            stop_on_critical_failure: true,
            cache_ttl_seconds: None,
            variables: BTreeMap::new(),
        }
    }
}

/// Errors that prevent a run from starting
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The plan is structurally invalid; nothing was dispatched
    #[error("Invalid execution plan: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Work or output directories could not be created
    #[error("Failed to prepare directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The result ledger rejected an entry
    #[error("Result ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Drives a plan to completion and assembles its report
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    config: EngineConfig,
    dispatcher: Dispatcher,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig, registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            config,
            dispatcher: Dispatcher::new(registry),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        self.dispatcher.registry()
    }

    /// Execute a plan. Every task in the plan appears in the report with a
    /// terminal status.
    pub async fn execute_plan(&self, plan: &ExecutionPlan) -> Result<RunReport, EngineError> {
        plan.validate()?;

        let started_at = Utc::now();
        info!(
            "Starting execution of plan '{}' ({})",
            plan.project_name,
            plan.summary()
        );

        let mut context = self.initialize_context(plan).await?;

        let mode = match &plan.metadata.parallel_groups {
            Some(groups) => {
                self.execute_parallel(plan, groups, &mut context).await?;
                RunMode::Parallel
            }
            None => {
                self.execute_sequential(plan, &mut context).await?;
                RunMode::Sequential
            }
        };

        let output_directory = context.output_directory.clone();
        let report = RunReport::assemble(
            plan,
            context.execution_results,
            mode,
            started_at,
            output_directory,
        );

        info!(
            "Plan execution completed. Success rate: {:.1}% ({} completed, {} failed, {} skipped, {} not attempted)",
            report.summary.success_percentage(),
            report.summary.completed,
            report.summary.failed,
            report.summary.skipped,
            report.summary.not_attempted
        );
        Ok(report)
    }

    /// Create the project's directories and a fresh context for one run
    pub async fn initialize_context(&self, plan: &ExecutionPlan) -> Result<ExecutionContext, EngineError> {
        let work_directory = env::project_work_dir(&self.config.work_directory, &plan.project_name);
        let output_directory =
            env::project_output_dir(&self.config.output_directory, &plan.project_name);

        for dir in [&work_directory, &output_directory] {
            async_fs::create_dir_all(dir)
                .await
                .map_err(|source| EngineError::Directory {
                    path: dir.clone(),
                    source,
                })?;
        }

        let cache = match self.config.cache_ttl_seconds {
            Some(seconds) => CapabilityCache::with_ttl(Duration::from_secs(seconds)),
            None => CapabilityCache::new(),
        };

        let mut context = ExecutionContext::new(work_directory, output_directory)
            .with_cache(cache)
            .with_variables(self.config.variables.clone());
        context.set_variable("project_name", json!(plan.project_name));
        context.set_variable("description", json!(plan.description));
        context.set_variable("created_at", json!(Utc::now().to_rfc3339()));

        debug!(
            "Initialized context: work={}, output={}, cache ttl={:?}",
            context.work_directory.display(),
            context.output_directory.display(),
            context.cache.ttl()
        );
        Ok(context)
    }

    async fn execute_sequential(
        &self,
        plan: &ExecutionPlan,
        context: &mut ExecutionContext,
    ) -> Result<(), EngineError> {
        let mut halted_by: Option<TaskId> = None;

        for task_id in &plan.execution_order {
            let task = lookup(plan, task_id)?;

            if let Some(failed) = &halted_by {
                context.record(not_attempted(task, failed))?;
                continue;
            }

            if let Some(skipped) = skip_if_blocked(task, context) {
                context.record(skipped)?;
                continue;
            }

            let completed = context.execution_results.completed_ids();
            let result = self.execute_task(task, context, &completed).await;

            if result.is_failed() {
                error!(
                    "Task {} failed: {}",
                    task.id,
                    result.error.as_deref().unwrap_or("unknown error")
                );
                if self.halts_run(task) {
                    error!("Task {} has {} priority. Stopping execution.", task.id, task.priority);
                    halted_by = Some(task.id.clone());
                }
            }
            context.record(result)?;
        }

        Ok(())
    }

    async fn execute_parallel(
        &self,
        plan: &ExecutionPlan,
        groups: &[Vec<TaskId>],
        context: &mut ExecutionContext,
    ) -> Result<(), EngineError> {
        let mut halted_by: Option<TaskId> = None;

        for (index, group) in groups.iter().enumerate() {
            let tasks = group
                .iter()
                .map(|id| lookup(plan, id))
                .collect::<Result<Vec<_>, _>>()?;

            if let Some(failed) = &halted_by {
                for task in tasks {
                    context.record(not_attempted(task, failed))?;
                }
                continue;
            }

            let mut runnable = Vec::with_capacity(tasks.len());
            for task in tasks {
                match skip_if_blocked(task, context) {
                    Some(skipped) => context.record(skipped)?,
                    None => runnable.push(task),
                }
            }

            if runnable.is_empty() {
                debug!("Group {} has no runnable tasks", index + 1);
                continue;
            }

            info!(
                "Executing group {}/{} with {} concurrent tasks",
                index + 1,
                groups.len(),
                runnable.len()
            );

            let completed = context.execution_results.completed_ids();
            let results = {
                let shared: &ExecutionContext = context;
                join_all(
                    runnable
                        .iter()
                        .map(|task| self.execute_task(task, shared, &completed)),
                )
                .await
            };

            for (task, result) in runnable.iter().zip(results) {
                if result.is_failed() {
                    error!(
                        "Task {} failed: {}",
                        task.id,
                        result.error.as_deref().unwrap_or("unknown error")
                    );
                    if halted_by.is_none() && self.halts_run(task) {
                        error!(
                            "Task {} has {} priority. Remaining groups will not be dispatched.",
                            task.id, task.priority
                        );
                        halted_by = Some(task.id.clone());
                    }
                }
                context.record(result)?;
            }
        }

        Ok(())
    }

    /// Run a single task whose dependencies are already satisfied.
    ///
    /// Never returns an error: handler failures, missing capabilities and
    /// handler panics all become a FAILED result.
    pub async fn execute_task(
        &self,
        task: &Task,
        context: &ExecutionContext,
        completed: &[TaskId],
    ) -> ExecutionResult {
        info!("Executing task: {} ({})", task.name, task.id);

        let mut result = ExecutionResult::pending(task.id.clone());
        if let Err(e) = result.start() {
            warn!("{}", e);
        }

        let dispatched = AssertUnwindSafe(self.dispatcher.dispatch(task, context, completed))
            .catch_unwind()
            .await;

        let outcome = match dispatched {
            Ok(outcome) => outcome,
            Err(panic) => Err(HandlerError::Panicked(panic_message(panic))),
        };

        let transition = match outcome {
            Ok(outcome) => {
                result
                    .metadata
                    .insert("handler".to_string(), json!(outcome.kind.as_str()));
                result
                    .metadata
                    .insert("capabilities".to_string(), json!(outcome.invoked));
                if !outcome.skipped_optional.is_empty() {
                    result
                        .metadata
                        .insert("skipped_capabilities".to_string(), json!(outcome.skipped_optional));
                }
                if outcome.cache_hits > 0 {
                    result
                        .metadata
                        .insert("cache_hits".to_string(), json!(outcome.cache_hits));
                }
                result.complete(outcome.output)
            }
            Err(e) => {
                result
                    .metadata
                    .insert("error_kind".to_string(), json!(e.kind()));
                result.fail(e.to_string())
            }
        };
        if let Err(e) = transition {
            warn!("{}", e);
        }

        debug!(
            "Task {} finished as {} in {:.3}s",
            task.id, result.status, result.duration
        );
        result
    }

    fn halts_run(&self, task: &Task) -> bool {
        self.config.stop_on_critical_failure && task.priority.halts_run()
    }
}

fn lookup<'p>(plan: &'p ExecutionPlan, task_id: &str) -> Result<&'p Task, ConfigurationError> {
    plan.task(task_id)
        .ok_or_else(|| ConfigurationError::UnknownTaskInOrder(task_id.to_string()))
}

/// A SKIPPED result if any dependency lacks a COMPLETED result
fn skip_if_blocked(task: &Task, context: &ExecutionContext) -> Option<ExecutionResult> {
    let unsatisfied = context.unsatisfied_dependencies(&task.dependencies);
    if unsatisfied.is_empty() {
        return None;
    }

    warn!(
        "Skipping task {}: dependencies not satisfied ({})",
        task.id,
        unsatisfied.join(", ")
    );
    let mut result = ExecutionResult::pending(task.id.clone())
        .with_metadata("unsatisfied_dependencies", json!(unsatisfied));
    if let Err(e) = result.skip(format!("Dependencies not satisfied: {}", unsatisfied.join(", "))) {
        warn!("{}", e);
    }
    Some(result)
}

fn not_attempted(task: &Task, failed_task: &str) -> ExecutionResult {
    let mut result = ExecutionResult::pending(task.id.clone())
        .with_metadata("halted_by", json!(failed_task));
    if let Err(e) = result.mark_not_attempted(format!(
        "Not attempted: execution stopped after task {} failed",
        failed_task
    )) {
        warn!("{}", e);
    }
    result
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::registry::SimulatedHandler;
    use crate::execution::result::ExecutionStatus;
    use crate::task::{Priority, TaskRequirement, TaskType};
    use tempfile::TempDir;

    fn engine(temp_dir: &TempDir, registry: CapabilityRegistry) -> ExecutionEngine {
        let config = EngineConfig {
            work_directory: temp_dir.path().join("workspace"),
            output_directory: temp_dir.path().join("output"),
            ..EngineConfig::default()
        };
        ExecutionEngine::new(config, Arc::new(registry))
    }

    fn registry() -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        registry.register("docx", Arc::new(SimulatedHandler::new()));
        registry.register_fn("broken", |_task, req| async move {
            Err(HandlerError::failed(req.name, "service unavailable"))
        });
        registry.register_fn("explodes", |_task, _req| async move {
            if true {
                panic!("handler bug");
            }
            Ok(Value::Null)
        });
        registry
    }

    #[tokio::test]
    async fn test_sequential_success_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let plan = ExecutionPlan::build(
            "my app",
            "Demo",
            vec![
                Task::new("setup", "Setup", TaskType::FileOperation),
                Task::new("docs", "Docs", TaskType::DocumentGeneration)
                    .with_dependency("setup")
                    .with_requirement(TaskRequirement::skill("docx")),
            ],
        )
        .unwrap();

        let report = engine(&temp_dir, registry()).execute_plan(&plan).await.unwrap();

        assert_eq!(report.mode, RunMode::Sequential);
        assert_eq!(report.summary.completed, 2);
        assert!(report.is_success());
        assert!(temp_dir.path().join("workspace").join("my-app").is_dir());
        assert!(temp_dir.path().join("output").join("my-app").is_dir());

        let docs = report.result("docs").unwrap();
        assert_eq!(docs.output.as_ref().unwrap()["status"], "simulated");
        assert_eq!(docs.metadata["capabilities"], json!(["docx"]));
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependent() {
        let temp_dir = TempDir::new().unwrap();
        let plan = ExecutionPlan::build(
            "skips",
            "",
            vec![
                Task::new("a", "A", TaskType::ApiIntegration)
                    .with_priority(Priority::Low)
                    .with_requirement(TaskRequirement::mcp("broken")),
                Task::new("b", "B", TaskType::Testing).with_dependency("a"),
                Task::new("c", "C", TaskType::Testing),
            ],
        )
        .unwrap();

        let report = engine(&temp_dir, registry()).execute_plan(&plan).await.unwrap();

        assert_eq!(report.status_of("a"), Some(ExecutionStatus::Failed));
        assert_eq!(report.status_of("b"), Some(ExecutionStatus::Skipped));
        assert_eq!(report.status_of("c"), Some(ExecutionStatus::Completed));

        let failed = report.result("a").unwrap();
        assert_eq!(
            failed.error.as_deref(),
            Some("Capability 'broken' failed: service unavailable")
        );
        assert_eq!(failed.metadata["error_kind"], "handler_failure");

        let skipped = report.result("b").unwrap();
        assert!(skipped.error.is_none());
        assert!(skipped.start_time.is_none());
        assert_eq!(skipped.metadata["unsatisfied_dependencies"], json!(["a"]));
    }

    #[tokio::test]
    async fn test_unknown_capability_fails_only_that_task() {
        let temp_dir = TempDir::new().unwrap();
        let plan = ExecutionPlan::build(
            "unknown",
            "",
            vec![
                Task::new("db", "DB", TaskType::DatabaseOperation)
                    .with_requirement(TaskRequirement::mcp("mongodb")),
                Task::new("other", "Other", TaskType::Testing),
            ],
        )
        .unwrap();

        let report = engine(&temp_dir, registry()).execute_plan(&plan).await.unwrap();

        let db = report.result("db").unwrap();
        assert_eq!(db.status, ExecutionStatus::Failed);
        assert_eq!(db.metadata["error_kind"], "unknown_capability");
        assert_eq!(report.status_of("other"), Some(ExecutionStatus::Completed));
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_failure() {
        let temp_dir = TempDir::new().unwrap();
        let plan = ExecutionPlan::build(
            "panics",
            "",
            vec![
                Task::new("p", "P", TaskType::CodeGeneration)
                    .with_requirement(TaskRequirement::skill("explodes")),
            ],
        )
        .unwrap();

        let report = engine(&temp_dir, registry()).execute_plan(&plan).await.unwrap();
        let result = report.result("p").unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.metadata["error_kind"], "handler_panic");
        assert!(result.error.as_deref().unwrap().contains("handler bug"));
    }

    #[tokio::test]
    async fn test_critical_failure_halts_remaining_tasks() {
        let temp_dir = TempDir::new().unwrap();
        let plan = ExecutionPlan::build(
            "halt",
            "",
            vec![
                Task::new("a", "A", TaskType::CodeGeneration)
                    .with_priority(Priority::Critical)
                    .with_requirement(TaskRequirement::skill("broken")),
                Task::new("b", "B", TaskType::Testing),
                Task::new("c", "C", TaskType::Testing).with_dependency("b"),
            ],
        )
        .unwrap();
        assert_eq!(plan.execution_order[0], "a");

        let report = engine(&temp_dir, registry()).execute_plan(&plan).await.unwrap();

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.status_of("a"), Some(ExecutionStatus::Failed));
        for id in ["b", "c"] {
            let result = report.result(id).unwrap();
            assert_eq!(result.status, ExecutionStatus::NotAttempted);
            assert_eq!(result.metadata["halted_by"], "a");
        }
        assert_eq!(report.summary.not_attempted, 2);
    }

    #[tokio::test]
    async fn test_short_circuit_can_be_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig {
            work_directory: temp_dir.path().join("w"),
            output_directory: temp_dir.path().join("o"),
            stop_on_critical_failure: false,
            ..EngineConfig::default()
        };
        let engine = ExecutionEngine::new(config, Arc::new(registry()));
        let plan = ExecutionPlan::build(
            "continue",
            "",
            vec![
                Task::new("a", "A", TaskType::CodeGeneration)
                    .with_priority(Priority::High)
                    .with_requirement(TaskRequirement::skill("broken")),
                Task::new("b", "B", TaskType::Testing),
            ],
        )
        .unwrap();

        let report = engine.execute_plan(&plan).await.unwrap();
        assert_eq!(report.status_of("b"), Some(ExecutionStatus::Completed));
    }

    #[tokio::test]
    async fn test_invalid_plan_rejected_before_dispatch() {
        let temp_dir = TempDir::new().unwrap();
        let mut plan = ExecutionPlan::new("invalid", "");
        plan.tasks = vec![Task::new("x", "X", TaskType::Testing).with_dependency("y")];
        plan.execution_order = vec!["x".to_string()];

        let err = engine(&temp_dir, registry()).execute_plan(&plan).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Configuration(ConfigurationError::DanglingDependency { .. })
        ));
        assert!(!temp_dir.path().join("output").exists());
    }

    #[tokio::test]
    async fn test_parallel_group_records_each_outcome() {
        let temp_dir = TempDir::new().unwrap();
        let plan = ExecutionPlan::build(
            "parallel",
            "",
            vec![
                Task::new("ok", "Ok", TaskType::DocumentGeneration)
                    .with_requirement(TaskRequirement::skill("docx")),
                Task::new("bad", "Bad", TaskType::CodeGeneration)
                    .with_requirement(TaskRequirement::skill("broken")),
                Task::new("after_ok", "After", TaskType::Testing).with_dependency("ok"),
                Task::new("after_bad", "After", TaskType::Testing).with_dependency("bad"),
            ],
        )
        .unwrap()
        .optimize(4)
        .unwrap();

        let report = engine(&temp_dir, registry()).execute_plan(&plan).await.unwrap();

        assert_eq!(report.mode, RunMode::Parallel);
        assert_eq!(report.status_of("ok"), Some(ExecutionStatus::Completed));
        assert_eq!(report.status_of("bad"), Some(ExecutionStatus::Failed));
        assert_eq!(report.status_of("after_ok"), Some(ExecutionStatus::Completed));
        assert_eq!(report.status_of("after_bad"), Some(ExecutionStatus::Skipped));
    }

    #[tokio::test]
    async fn test_parallel_critical_failure_halts_later_groups() {
        let temp_dir = TempDir::new().unwrap();
        let plan = ExecutionPlan::build(
            "parallel-halt",
            "",
            vec![
                Task::new("bad", "Bad", TaskType::CodeGeneration)
                    .with_priority(Priority::Critical)
                    .with_requirement(TaskRequirement::skill("broken")),
                Task::new("sibling", "Sibling", TaskType::Testing).with_priority(Priority::Critical),
                Task::new("next", "Next", TaskType::Testing).with_dependency("sibling"),
            ],
        )
        .unwrap()
        .optimize(2)
        .unwrap();

        let report = engine(&temp_dir, registry()).execute_plan(&plan).await.unwrap();

        assert_eq!(report.status_of("bad"), Some(ExecutionStatus::Failed));
        assert_eq!(report.status_of("sibling"), Some(ExecutionStatus::Completed));
        assert_eq!(report.status_of("next"), Some(ExecutionStatus::NotAttempted));
    }

    #[tokio::test]
    async fn test_context_variables_include_project() {
        let temp_dir = TempDir::new().unwrap();
        let plan = ExecutionPlan::new("vars", "Variables test");
        let context = engine(&temp_dir, registry())
            .initialize_context(&plan)
            .await
            .unwrap();

        assert_eq!(context.project_variables["project_name"], "vars");
        assert_eq!(context.project_variables["description"], "Variables test");
        assert!(context.project_variables.contains_key("created_at"));
        assert!(context.execution_results.is_empty());
        assert_eq!(context.cache.ttl(), None);
    }

    #[tokio::test]
    async fn test_configured_cache_ttl_applied_to_context() {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig {
            work_directory: temp_dir.path().join("workspace"),
            output_directory: temp_dir.path().join("output"),
            cache_ttl_seconds: Some(90),
            ..EngineConfig::default()
        };
        let context = ExecutionEngine::new(config, Arc::new(registry()))
            .initialize_context(&ExecutionPlan::new("ttl", ""))
            .await
            .unwrap();

        assert_eq!(context.cache.ttl(), Some(Duration::from_secs(90)));
    }
}
