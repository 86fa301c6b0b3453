use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Unique, caller-assigned identifier for tasks
pub type TaskId = String;

/// Default estimate for a task when none is given, in seconds
pub const DEFAULT_ESTIMATED_DURATION_SECS: u64 = 300;

/// Atomic unit of declared work
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub task_type: TaskType,
    #[serde(default)]
    pub requirements: Vec<TaskRequirement>,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub priority: Priority,
    /// Seconds. Only used for reporting and plan estimates, never for scheduling.
    #[serde(default = "default_estimated_duration")]
    pub estimated_duration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

fn default_estimated_duration() -> u64 {
    DEFAULT_ESTIMATED_DURATION_SECS
}

/// Closed set of task kinds understood by the dispatcher
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FileOperation,
    CodeGeneration,
    DataProcessing,
    ApiIntegration,
    DocumentGeneration,
    WebDevelopment,
    DatabaseOperation,
    Testing,
    Deployment,
    Validation,
}

/// Task priority levels. Lower ordinal means higher precedence.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 1,
    High = 2,
    #[default]
    Medium = 3,
    Low = 4,
}

/// Class of external capability a requirement asks for
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityClass {
    /// Content-producing skill (documents, artifacts, designs)
    Skill,
    /// Service integration (databases, CRMs, payments, filesystem)
    Mcp,
    /// Documentation lookup
    #[serde(alias = "context7")]
    Docs,
}

/// A named capability a task needs, resolved through the handler registry
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TaskRequirement {
    pub class: CapabilityClass,
    /// Registry key
    pub name: String,
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    #[serde(default)]
    pub optional: bool,
}

impl Task {
    /// Create a new task with default priority and no requirements
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            task_type,
            requirements: Vec::new(),
            dependencies: Vec::new(),
            priority: Priority::default(),
            estimated_duration: DEFAULT_ESTIMATED_DURATION_SECS,
            output_path: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a dependency on another task in the same plan
    pub fn with_dependency(mut self, task_id: impl Into<TaskId>) -> Self {
        let task_id = task_id.into();
        if !self.dependencies.contains(&task_id) {
            self.dependencies.push(task_id);
        }
        self
    }

    pub fn with_dependencies<I, S>(mut self, task_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        for task_id in task_ids {
            self = self.with_dependency(task_id);
        }
        self
    }

    pub fn with_requirement(mut self, requirement: TaskRequirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Set estimated duration in seconds
    pub fn with_estimated_duration(mut self, seconds: u64) -> Self {
        self.estimated_duration = seconds;
        self
    }

    pub fn with_output_path(mut self, path: impl Into<String>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Check whether this task directly depends on `other`
    pub fn depends_on(&self, other: &str) -> bool {
        self.dependencies.iter().any(|dep| dep == other)
    }
}

impl Priority {
    /// Numeric ordinal, lower means higher precedence
    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    /// Whether a failure at this priority stops the remainder of a run
    pub fn halts_run(&self) -> bool {
        matches!(self, Priority::Critical | Priority::High)
    }
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::FileOperation => "file_operation",
            TaskType::CodeGeneration => "code_generation",
            TaskType::DataProcessing => "data_processing",
            TaskType::ApiIntegration => "api_integration",
            TaskType::DocumentGeneration => "document_generation",
            TaskType::WebDevelopment => "web_development",
            TaskType::DatabaseOperation => "database_operation",
            TaskType::Testing => "testing",
            TaskType::Deployment => "deployment",
            TaskType::Validation => "validation",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(label)
    }
}

impl TaskRequirement {
    /// Create a required capability
    pub fn new(class: CapabilityClass, name: impl Into<String>) -> Self {
        Self {
            class,
            name: name.into(),
            config: BTreeMap::new(),
            optional: false,
        }
    }

    pub fn skill(name: impl Into<String>) -> Self {
        Self::new(CapabilityClass::Skill, name)
    }

    pub fn mcp(name: impl Into<String>) -> Self {
        Self::new(CapabilityClass::Mcp, name)
    }

    pub fn docs(name: impl Into<String>) -> Self {
        Self::new(CapabilityClass::Docs, name)
    }

    /// Mark as optional: an unresolved name becomes a no-op success
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Deterministic cache key for this capability call
    pub fn cache_key(&self) -> String {
        // BTreeMap keeps the serialized config stable across calls
        let config = serde_json::to_string(&self.config).unwrap_or_default();
        format!("{}:{}", self.name, config)
    }
}

/// Fatal plan-level errors, reported before any task is dispatched
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Duplicate task id '{0}'")]
    DuplicateTaskId(TaskId),

    #[error("Task '{task}' depends on unknown task '{missing}'")]
    DanglingDependency { task: TaskId, missing: TaskId },

    #[error("Dependency cycle detected among tasks: {}", .unresolved.join(", "))]
    DependencyCycle { unresolved: Vec<TaskId> },

    #[error("Execution order references unknown task '{0}'")]
    UnknownTaskInOrder(TaskId),

    #[error("Execution order is not a permutation of the plan's tasks: {0}")]
    OrderMismatch(String),

    #[error("Task '{task}' is ordered before its dependency '{dependency}'")]
    OrderViolatesDependency { task: TaskId, dependency: TaskId },

    #[error("Parallel groups do not concatenate to the execution order")]
    GroupMismatch,

    #[error("Tasks '{first}' and '{second}' share a parallel group but are dependency-linked")]
    GroupConflict { first: TaskId, second: TaskId },

    #[error("Concurrency cap must be at least 1")]
    InvalidConcurrency,
}
