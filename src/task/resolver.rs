//! Topological ordering of a task set.
//!
//! The resolver runs Kahn's algorithm over the dependency edges. Among tasks
//! that are ready at the same time, the one with the highest precedence
//! (lowest priority ordinal) goes first; ties keep the order in which the
//! tasks were supplied. Dangling references and cycles are reported as
//! [`ConfigurationError`]s and never produce a partial order.

use crate::task::types::*;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, warn};

/// Validated view over a task set, indexed for dependency queries
#[derive(Debug)]
pub struct DependencyResolver<'a> {
    tasks: &'a [Task],
    index: HashMap<&'a str, usize>,
    /// For each task position, the positions of the tasks depending on it
    dependents: Vec<Vec<usize>>,
    /// For each task position, the number of distinct dependencies
    in_degree: Vec<usize>,
}

impl<'a> DependencyResolver<'a> {
    /// Index the task set, rejecting duplicate ids and dangling references
    pub fn new(tasks: &'a [Task]) -> Result<Self, ConfigurationError> {
        let mut index = HashMap::with_capacity(tasks.len());
        for (position, task) in tasks.iter().enumerate() {
            if index.insert(task.id.as_str(), position).is_some() {
                return Err(ConfigurationError::DuplicateTaskId(task.id.clone()));
            }
        }

        let mut dependents = vec![Vec::new(); tasks.len()];
        let mut in_degree = vec![0; tasks.len()];

        for (position, task) in tasks.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &task.dependencies {
                let Some(&dep_position) = index.get(dep.as_str()) else {
                    warn!("Task {} depends on unknown task {}", task.id, dep);
                    return Err(ConfigurationError::DanglingDependency {
                        task: task.id.clone(),
                        missing: dep.clone(),
                    });
                };
                if seen.insert(dep_position) {
                    dependents[dep_position].push(position);
                    in_degree[position] += 1;
                }
            }
        }

        Ok(Self {
            tasks,
            index,
            dependents,
            in_degree,
        })
    }

    /// Look up a task by id
    pub fn task(&self, task_id: &str) -> Option<&'a Task> {
        self.index.get(task_id).map(|&position| &self.tasks[position])
    }

    /// Ids of the tasks that directly depend on `task_id`
    pub fn dependents_of(&self, task_id: &str) -> Vec<&'a str> {
        self.index
            .get(task_id)
            .map(|&position| {
                self.dependents[position]
                    .iter()
                    .map(|&dependent| self.tasks[dependent].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Compute the priority-tie-broken topological order
    pub fn execution_order(&self) -> Result<Vec<TaskId>, ConfigurationError> {
        let mut in_degree = self.in_degree.clone();
        let mut ready = BinaryHeap::new();

        for (position, task) in self.tasks.iter().enumerate() {
            if in_degree[position] == 0 {
                ready.push(Reverse((task.priority, position)));
            }
        }

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(Reverse((_, position))) = ready.pop() {
            order.push(self.tasks[position].id.clone());

            for &dependent in &self.dependents[position] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse((self.tasks[dependent].priority, dependent)));
                }
            }
        }

        if order.len() < self.tasks.len() {
            let unresolved: Vec<TaskId> = self
                .tasks
                .iter()
                .enumerate()
                .filter(|(position, _)| in_degree[*position] > 0)
                .map(|(_, task)| task.id.clone())
                .collect();
            warn!("Dependency cycle among {} tasks", unresolved.len());
            return Err(ConfigurationError::DependencyCycle { unresolved });
        }

        debug!("Resolved execution order for {} tasks", order.len());
        Ok(order)
    }

    /// Check that `order` is a permutation of the task ids consistent with dependencies
    pub fn validate_order(&self, order: &[TaskId]) -> Result<(), ConfigurationError> {
        if order.len() != self.tasks.len() {
            return Err(ConfigurationError::OrderMismatch(format!(
                "expected {} entries, found {}",
                self.tasks.len(),
                order.len()
            )));
        }

        let mut placed: HashMap<&str, usize> = HashMap::with_capacity(order.len());
        for (slot, task_id) in order.iter().enumerate() {
            if !self.index.contains_key(task_id.as_str()) {
                return Err(ConfigurationError::UnknownTaskInOrder(task_id.clone()));
            }
            if placed.insert(task_id.as_str(), slot).is_some() {
                return Err(ConfigurationError::OrderMismatch(format!(
                    "task '{}' appears more than once",
                    task_id
                )));
            }
        }

        for task in self.tasks {
            let slot = placed[task.id.as_str()];
            for dep in &task.dependencies {
                if placed[dep.as_str()] > slot {
                    return Err(ConfigurationError::OrderViolatesDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Resolve the execution order of a task set in one call
pub fn resolve_execution_order(tasks: &[Task]) -> Result<Vec<TaskId>, ConfigurationError> {
    DependencyResolver::new(tasks)?.execution_order()
}
