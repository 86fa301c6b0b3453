//! Greedy partitioning of a linear execution order into parallel groups.
//!
//! The order is scanned left to right. A task joins the current group unless
//! it is directly dependency-linked (in either direction) with a member, or
//! the group already holds `max_parallel` tasks; in both cases the group is
//! closed and a new one starts with that task. Groups stay contiguous, so
//! their concatenation is the input order and transitively linked tasks can
//! never share a group.
//!
//! Known limitation: this is a single greedy pass. It does not reorder tasks
//! to pack groups tighter, so it can produce more groups than a
//! maximum-parallelism schedule would.

use crate::task::types::*;
use std::collections::HashMap;
use tracing::debug;

/// Result of grouping an execution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelSchedule {
    pub groups: Vec<Vec<TaskId>>,
    /// Sum over groups of the longest member estimate, in seconds
    pub estimated_duration: u64,
}

/// Partitions a resolved order into concurrency-bounded groups
#[derive(Debug, Clone)]
pub struct ParallelOptimizer {
    max_parallel: usize,
}

impl ParallelOptimizer {
    /// Create an optimizer with the given concurrency cap
    pub fn new(max_parallel: usize) -> Result<Self, ConfigurationError> {
        if max_parallel == 0 {
            return Err(ConfigurationError::InvalidConcurrency);
        }
        Ok(Self { max_parallel })
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Group `order` (a valid topological order of `tasks`)
    pub fn optimize(
        &self,
        tasks: &[Task],
        order: &[TaskId],
    ) -> Result<ParallelSchedule, ConfigurationError> {
        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        let mut groups: Vec<Vec<TaskId>> = Vec::new();
        let mut current: Vec<&Task> = Vec::new();

        for task_id in order {
            let task = *by_id
                .get(task_id.as_str())
                .ok_or_else(|| ConfigurationError::UnknownTaskInOrder(task_id.clone()))?;

            let conflicts = current
                .iter()
                .any(|member| member.depends_on(&task.id) || task.depends_on(&member.id));

            if conflicts || current.len() >= self.max_parallel {
                if !current.is_empty() {
                    groups.push(current.iter().map(|t| t.id.clone()).collect());
                }
                current = vec![task];
            } else {
                current.push(task);
            }
        }

        if !current.is_empty() {
            groups.push(current.iter().map(|t| t.id.clone()).collect());
        }

        let estimated_duration = groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .filter_map(|id| by_id.get(id.as_str()))
                    .map(|task| task.estimated_duration)
                    .max()
                    .unwrap_or(0)
            })
            .sum();

        debug!(
            "Partitioned {} tasks into {} parallel groups (cap {})",
            order.len(),
            groups.len(),
            self.max_parallel
        );

        Ok(ParallelSchedule {
            groups,
            estimated_duration,
        })
    }
}

/// Check that `groups` concatenate to `order` and hold no directly-linked pair
pub fn validate_groups(
    tasks: &[Task],
    order: &[TaskId],
    groups: &[Vec<TaskId>],
) -> Result<(), ConfigurationError> {
    let flattened: Vec<&TaskId> = groups.iter().flatten().collect();
    if flattened.len() != order.len() || flattened.iter().zip(order).any(|(a, b)| *a != b) {
        return Err(ConfigurationError::GroupMismatch);
    }

    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    for group in groups {
        for (i, first) in group.iter().enumerate() {
            for second in &group[i + 1..] {
                let linked = match (by_id.get(first.as_str()), by_id.get(second.as_str())) {
                    (Some(a), Some(b)) => a.depends_on(second) || b.depends_on(first),
                    _ => return Err(ConfigurationError::GroupMismatch),
                };
                if linked {
                    return Err(ConfigurationError::GroupConflict {
                        first: first.clone(),
                        second: second.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}
