//! Per-run mutable state.
//!
//! An [`ExecutionContext`] is created for exactly one plan run and owned by
//! the engine for that run. Concurrently running tasks only see it through
//! shared references: handlers get a read-only [`HandlerScope`], and the
//! [`CapabilityCache`] is a concurrent map. The [`ResultLedger`] is written by
//! the engine alone, once per task, after that task's work has finished.

use crate::execution::result::{ExecutionResult, ExecutionStatus};
use crate::task::TaskId;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Read-only view of the run handed to capability handlers
#[derive(Debug, Clone, Copy)]
pub struct HandlerScope<'a> {
    pub work_directory: &'a Path,
    pub output_directory: &'a Path,
    pub variables: &'a BTreeMap<String, Value>,
}

/// Memoizes capability results within one run
#[derive(Debug, Default)]
pub struct CapabilityCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

impl CapabilityCache {
    /// Create a cache whose entries never expire
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache whose entries expire after `ttl`
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Some(ttl),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Fetch a live entry, evicting it if expired
    pub fn get(&self, key: &str) -> Option<Value> {
        let ttl = {
            let entry = self.entries.get(key)?;
            match self.ttl {
                Some(ttl) if entry.stored_at.elapsed() >= ttl => ttl,
                _ => return Some(entry.value.clone()),
            }
        };
        debug!("Capability cache entry expired: {}", key);
        // Another task may have refreshed the entry in the meantime
        self.entries
            .remove_if(key, |_, entry| entry.stored_at.elapsed() >= ttl);
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Append-only record of task outcomes, in recording order
#[derive(Debug, Clone, Default)]
pub struct ResultLedger {
    results: Vec<ExecutionResult>,
    index: HashMap<TaskId, usize>,
}

/// Attempt to record a second outcome for a task, or a non-terminal one
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Task '{0}' already has a recorded result")]
    AlreadyRecorded(TaskId),
    #[error("Task '{task_id}' cannot be recorded in non-terminal state {status}")]
    NotTerminal {
        task_id: TaskId,
        status: ExecutionStatus,
    },
}

impl ResultLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a terminal result. Each task is recorded at most once.
    pub fn record(&mut self, result: ExecutionResult) -> Result<(), LedgerError> {
        if !result.is_terminal() {
            return Err(LedgerError::NotTerminal {
                task_id: result.task_id.clone(),
                status: result.status,
            });
        }
        if self.contains(&result.task_id) {
            return Err(LedgerError::AlreadyRecorded(result.task_id.clone()));
        }
        self.index.insert(result.task_id.clone(), self.results.len());
        self.results.push(result);
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Option<&ExecutionResult> {
        self.index.get(task_id).map(|&i| &self.results[i])
    }

    pub fn status_of(&self, task_id: &str) -> Option<ExecutionStatus> {
        self.get(task_id).map(|r| r.status)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.index.contains_key(task_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn count(&self, status: ExecutionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Ids of completed tasks, in recording order
    pub fn completed_ids(&self) -> Vec<TaskId> {
        self.results
            .iter()
            .filter(|r| r.is_completed())
            .map(|r| r.task_id.clone())
            .collect()
    }

    pub fn into_results(self) -> Vec<ExecutionResult> {
        self.results
    }
}

/// State for one plan run
#[derive(Debug)]
pub struct ExecutionContext {
    pub work_directory: PathBuf,
    pub output_directory: PathBuf,
    pub project_variables: BTreeMap<String, Value>,
    pub cache: CapabilityCache,
    pub execution_results: ResultLedger,
}

impl ExecutionContext {
    pub fn new(work_directory: PathBuf, output_directory: PathBuf) -> Self {
        Self {
            work_directory,
            output_directory,
            project_variables: BTreeMap::new(),
            cache: CapabilityCache::new(),
            execution_results: ResultLedger::new(),
        }
    }

    /// Inject the capability cache used for this run
    pub fn with_cache(mut self, cache: CapabilityCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, Value>) -> Self {
        self.project_variables.extend(variables);
        self
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.project_variables.insert(key.into(), value);
    }

    /// Borrow the read-only scope passed to handlers
    pub fn scope(&self) -> HandlerScope<'_> {
        HandlerScope {
            work_directory: &self.work_directory,
            output_directory: &self.output_directory,
            variables: &self.project_variables,
        }
    }

    /// Every dependency must already have a COMPLETED result
    pub fn dependencies_satisfied(&self, dependencies: &[TaskId]) -> bool {
        dependencies
            .iter()
            .all(|dep| self.execution_results.status_of(dep) == Some(ExecutionStatus::Completed))
    }

    /// Dependencies that do not have a COMPLETED result
    pub fn unsatisfied_dependencies<'d>(&self, dependencies: &'d [TaskId]) -> Vec<&'d str> {
        dependencies
            .iter()
            .filter(|dep| self.execution_results.status_of(dep) != Some(ExecutionStatus::Completed))
            .map(String::as_str)
            .collect()
    }

    pub fn record(&mut self, result: ExecutionResult) -> Result<(), LedgerError> {
        self.execution_results.record(result)
    }
}
