//! Execution plan: a task set plus its resolved order and optional grouping.
//!
//! ## Lifecycle
//!
//! - [`ExecutionPlan::build`] resolves a fresh task set into a linear order.
//! - [`ExecutionPlan::optimize`] adds `parallel_groups` to the metadata and
//!   recomputes the estimated duration as the sum of per-group maxima.
//! - [`ExecutionPlan::prepare`] accepts a hand-edited plan: it resolves the
//!   order when none is given and validates it otherwise.
//!
//! Plans persist as TOML (human-editable) or JSON, chosen by file extension.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use task_orchestrator::task::{ExecutionPlan, Task, TaskType};
//!
//! let tasks = vec![
//!     Task::new("setup", "Project setup", TaskType::FileOperation),
//!     Task::new("api", "Build API", TaskType::CodeGeneration).with_dependency("setup"),
//! ];
//! let plan = ExecutionPlan::build("demo", "Demo project", tasks)?.optimize(5)?;
//! plan.save("demo-plan.toml")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::task::optimizer::{ParallelOptimizer, validate_groups};
use crate::task::resolver::DependencyResolver;
use crate::task::types::*;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Metadata carried by a plan
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PlanMetadata {
    /// Ordered groups of mutually independent tasks; their concatenation
    /// equals the execution order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_groups: Option<Vec<Vec<TaskId>>>,
    /// Additional free-form metadata
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

/// A task set with a dependency-respecting execution order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPlan {
    pub project_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub execution_order: Vec<TaskId>,
    /// Seconds
    #[serde(default)]
    pub estimated_total_duration: u64,
    #[serde(default)]
    pub metadata: PlanMetadata,
}

/// On-disk encoding of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormat {
    Toml,
    Json,
}

impl PlanFormat {
    /// Pick a format from a path's extension, defaulting to TOML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => PlanFormat::Json,
            _ => PlanFormat::Toml,
        }
    }
}

impl ExecutionPlan {
    /// Create an unresolved plan
    pub fn new(project_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            description: description.into(),
            tasks: Vec::new(),
            execution_order: Vec::new(),
            estimated_total_duration: 0,
            metadata: PlanMetadata::default(),
        }
    }

    /// Build a resolved plan from a task set
    pub fn build(
        project_name: impl Into<String>,
        description: impl Into<String>,
        tasks: Vec<Task>,
    ) -> Result<Self, ConfigurationError> {
        let mut plan = Self::new(project_name, description);
        plan.tasks = tasks;
        plan.resolve()?;
        Ok(plan)
    }

    /// Add a task. Invalidates any previously resolved order.
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self.execution_order.clear();
        self.metadata.parallel_groups = None;
        self
    }

    /// Recompute the execution order and the sequential duration estimate
    pub fn resolve(&mut self) -> Result<(), ConfigurationError> {
        let order = DependencyResolver::new(&self.tasks)?.execution_order()?;
        self.execution_order = order;
        self.estimated_total_duration = self.tasks.iter().map(|t| t.estimated_duration).sum();
        self.metadata.parallel_groups = None;
        info!(
            "Resolved plan '{}': {} tasks, estimated {}s",
            self.project_name,
            self.tasks.len(),
            self.estimated_total_duration
        );
        Ok(())
    }

    /// Partition the execution order into parallel groups of at most `max_parallel` tasks.
    ///
    /// A missing order is resolved first; a stale one is rejected.
    pub fn optimize(mut self, max_parallel: usize) -> Result<Self, ConfigurationError> {
        let optimizer = ParallelOptimizer::new(max_parallel)?;
        if self.execution_order.is_empty() && !self.tasks.is_empty() {
            self.resolve()?;
        } else {
            DependencyResolver::new(&self.tasks)?.validate_order(&self.execution_order)?;
        }
        let schedule = optimizer.optimize(&self.tasks, &self.execution_order)?;
        info!(
            "Optimized plan '{}' into {} groups of at most {}, estimated {}s",
            self.project_name,
            schedule.groups.len(),
            optimizer.max_parallel(),
            schedule.estimated_duration
        );
        self.metadata.parallel_groups = Some(schedule.groups);
        self.estimated_total_duration = schedule.estimated_duration;
        Ok(self)
    }

    /// Resolve a plan with no order, validate one that already has an order
    pub fn prepare(mut self) -> Result<Self, ConfigurationError> {
        if self.execution_order.is_empty() && !self.tasks.is_empty() {
            if self.metadata.parallel_groups.is_some() {
                return Err(ConfigurationError::GroupMismatch);
            }
            self.resolve()?;
        } else {
            self.validate()?;
        }
        Ok(self)
    }

    /// Check the plan's structural invariants
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let resolver = DependencyResolver::new(&self.tasks)?;
        // Surfaces cycles even when the stored order happens to be consistent
        resolver.execution_order()?;
        resolver.validate_order(&self.execution_order)?;
        if let Some(groups) = &self.metadata.parallel_groups {
            validate_groups(&self.tasks, &self.execution_order, groups)?;
        }
        Ok(())
    }

    /// Look up a task by id
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_parallel(&self) -> bool {
        self.metadata.parallel_groups.is_some()
    }

    /// Short human-readable description
    pub fn summary(&self) -> String {
        let tasks = match self.task_count() {
            0 => "Empty execution plan".to_string(),
            1 => "1 task".to_string(),
            n => format!("{} tasks", n),
        };
        match &self.metadata.parallel_groups {
            Some(groups) if groups.len() == 1 => format!("{} in 1 parallel group", tasks),
            Some(groups) => format!("{} in {} parallel groups", tasks, groups.len()),
            None => tasks,
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML execution plan")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize execution plan to TOML")
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON execution plan")
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize execution plan to JSON")
    }

    /// Load a plan, picking the format from the file extension
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        match PlanFormat::from_path(path) {
            PlanFormat::Toml => Self::from_toml_str(&content),
            PlanFormat::Json => Self::from_json_str(&content),
        }
    }

    /// Save a plan, picking the format from the file extension
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = match PlanFormat::from_path(path) {
            PlanFormat::Toml => self.to_toml_string()?,
            PlanFormat::Json => self.to_json_string()?,
        };
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write plan file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tasks() -> Vec<Task> {
        vec![
            Task::new("setup", "Project setup", TaskType::FileOperation)
                .with_priority(Priority::Critical)
                .with_estimated_duration(120),
            Task::new("backend", "Backend API", TaskType::CodeGeneration)
                .with_dependency("setup")
                .with_requirement(TaskRequirement::docs("context7").with_config("libraries", json!(["fastapi"])))
                .with_estimated_duration(600),
            Task::new("frontend", "Frontend", TaskType::WebDevelopment)
                .with_dependency("setup")
                .with_requirement(TaskRequirement::skill("artifacts-builder"))
                .with_estimated_duration(900),
            Task::new("tests", "Tests", TaskType::Testing)
                .with_dependencies(["backend", "frontend"])
                .with_priority(Priority::High)
                .with_estimated_duration(300),
        ]
    }

    #[test]
    fn test_build_resolves_order_and_duration() {
        let plan = ExecutionPlan::build("shop", "Online shop", sample_tasks()).unwrap();

        assert_eq!(plan.execution_order.first().map(String::as_str), Some("setup"));
        assert_eq!(plan.execution_order.last().map(String::as_str), Some("tests"));
        assert_eq!(plan.estimated_total_duration, 120 + 600 + 900 + 300);
        assert!(!plan.is_parallel());
        assert_eq!(plan.summary(), "4 tasks");
    }

    #[test]
    fn test_optimize_records_groups_and_parallel_duration() {
        let plan = ExecutionPlan::build("shop", "Online shop", sample_tasks())
            .unwrap()
            .optimize(5)
            .unwrap();

        let groups = plan.metadata.parallel_groups.as_ref().unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[1], vec!["backend".to_string(), "frontend".to_string()]);
        assert_eq!(plan.estimated_total_duration, 120 + 900 + 300);
        assert!(plan.validate().is_ok());
        assert_eq!(plan.summary(), "4 tasks in 3 parallel groups");
    }

    #[test]
    fn test_prepare_resolves_missing_order() {
        let mut plan = ExecutionPlan::new("shop", "Online shop");
        plan.tasks = sample_tasks();
        let plan = plan.prepare().unwrap();
        assert_eq!(plan.execution_order.len(), 4);
    }

    #[test]
    fn test_prepare_rejects_inconsistent_order() {
        let mut plan = ExecutionPlan::build("shop", "Online shop", sample_tasks()).unwrap();
        plan.execution_order.reverse();
        assert!(matches!(
            plan.prepare(),
            Err(ConfigurationError::OrderViolatesDependency { .. })
        ));
    }

    #[test]
    fn test_with_task_invalidates_order() {
        let plan = ExecutionPlan::build("shop", "Online shop", sample_tasks())
            .unwrap()
            .optimize(2)
            .unwrap()
            .with_task(Task::new("docs", "Docs", TaskType::DocumentGeneration));

        assert!(plan.execution_order.is_empty());
        assert!(!plan.is_parallel());
        assert_eq!(plan.prepare().unwrap().execution_order.len(), 5);
    }

    #[test]
    fn test_optimize_resolves_cleared_order() {
        let plan = ExecutionPlan::build("shop", "Online shop", vec![Task::new("a", "A", TaskType::Testing)])
            .unwrap()
            .with_task(Task::new("b", "B", TaskType::Testing).with_dependency("a"))
            .optimize(2)
            .unwrap();

        assert_eq!(plan.execution_order, vec!["a", "b"]);
        assert_eq!(
            plan.metadata.parallel_groups,
            Some(vec![vec!["a".to_string()], vec!["b".to_string()]])
        );
        assert_eq!(plan.estimated_total_duration, 600);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_optimize_rejects_stale_order() {
        let mut plan = ExecutionPlan::build("shop", "Online shop", sample_tasks()).unwrap();
        plan.tasks.push(Task::new("docs", "Docs", TaskType::DocumentGeneration));

        assert!(matches!(
            plan.optimize(2),
            Err(ConfigurationError::OrderMismatch(_))
        ));
    }

    #[test]
    fn test_toml_round_trip_preserves_structure() {
        let plan = ExecutionPlan::build("shop", "Online shop", sample_tasks())
            .unwrap()
            .optimize(3)
            .unwrap();

        let toml_str = plan.to_toml_string().unwrap();
        assert!(toml_str.contains("project_name"));
        let parsed = ExecutionPlan::from_toml_str(&toml_str).unwrap();

        assert_eq!(parsed, plan);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(PlanFormat::from_path(Path::new("plan.json")), PlanFormat::Json);
        assert_eq!(PlanFormat::from_path(Path::new("plan.JSON")), PlanFormat::Json);
        assert_eq!(PlanFormat::from_path(Path::new("plan.toml")), PlanFormat::Toml);
        assert_eq!(PlanFormat::from_path(Path::new("plan")), PlanFormat::Toml);
    }
}
