use crate::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;

/// Outcome state of a task within one run
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Not yet considered
    Pending,
    /// Dispatched to its handler
    InProgress,
    /// Handler returned a payload
    Completed,
    /// Handler failed, or a required capability was missing
    Failed,
    /// A dependency did not complete; never dispatched
    Skipped,
    /// Never dispatched because an earlier high-priority failure stopped the run
    NotAttempted,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Skipped
                | ExecutionStatus::NotAttempted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::InProgress => "in_progress",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::NotAttempted => "not_attempted",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid transition for task '{task_id}': {from} -> {to}")]
pub struct TransitionError {
    pub task_id: TaskId,
    pub from: ExecutionStatus,
    pub to: ExecutionStatus,
}

/// Structured outcome of one task in one run
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub output: Option<Value>,
    /// Set iff the status is `Failed`
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(skip)]
    started: Option<Instant>,
}

impl ExecutionResult {
    /// A fresh result for a task that has not been considered yet
    pub fn pending(task_id: impl Into<TaskId>) -> Self {
        Self {
            task_id: task_id.into(),
            status: ExecutionStatus::Pending,
            output: None,
            error: None,
            start_time: None,
            end_time: None,
            duration: 0.0,
            metadata: BTreeMap::new(),
            started: None,
        }
    }

    fn transition(&mut self, allowed_from: ExecutionStatus, to: ExecutionStatus) -> Result<(), TransitionError> {
        if self.status != allowed_from {
            return Err(TransitionError {
                task_id: self.task_id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.end_time = Some(now);
        self.duration = self
            .started
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or(0.0);
    }

    /// PENDING -> IN_PROGRESS
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Pending, ExecutionStatus::InProgress)?;
        self.start_time = Some(Utc::now());
        self.started = Some(Instant::now());
        Ok(())
    }

    /// IN_PROGRESS -> COMPLETED
    pub fn complete(&mut self, output: Value) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::InProgress, ExecutionStatus::Completed)?;
        self.output = Some(output);
        self.finish();
        Ok(())
    }

    /// IN_PROGRESS -> FAILED
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::InProgress, ExecutionStatus::Failed)?;
        self.error = Some(error.into());
        self.finish();
        Ok(())
    }

    /// PENDING -> SKIPPED
    pub fn skip(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Pending, ExecutionStatus::Skipped)?;
        self.metadata.insert("reason".to_string(), Value::String(reason.into()));
        Ok(())
    }

    /// PENDING -> NOT_ATTEMPTED
    pub fn mark_not_attempted(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(ExecutionStatus::Pending, ExecutionStatus::NotAttempted)?;
        self.metadata.insert("reason".to_string(), Value::String(reason.into()));
        Ok(())
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == ExecutionStatus::Failed
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Reason recorded for a skipped or not-attempted task
    pub fn reason(&self) -> Option<&str> {
        self.metadata.get("reason").and_then(Value::as_str)
    }
}
