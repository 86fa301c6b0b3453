//! Task-type routing.
//!
//! Every [`TaskType`] maps onto one [`HandlerKind`] from a small fixed set.
//! A kind decides which of the task's requirements it consumes and how their
//! payloads are combined; the capabilities themselves are always looked up in
//! the [`CapabilityRegistry`].
//!
//! | Kind                                             | Consumes                                  |
//! |--------------------------------------------------|-------------------------------------------|
//! | file_operation, web_development, document_generation | first `skill` requirement             |
//! | database_operation                               | first `mcp` requirement                   |
//! | api_integration                                  | first `docs` requirement, else every `mcp` |
//! | code_generation, testing, generic                | every requirement                         |
//! | validation                                       | every requirement, plus completed task ids |
//!
//! A kind that finds nothing to consume returns a plain completion payload.

use crate::execution::context::ExecutionContext;
use crate::execution::registry::{CapabilityRegistry, HandlerError};
use crate::task::{CapabilityClass, Task, TaskId, TaskRequirement, TaskType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, info};

/// Fixed set of task handlers
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    FileOperation,
    CodeGeneration,
    WebDevelopment,
    DocumentGeneration,
    ApiIntegration,
    DatabaseOperation,
    Testing,
    Validation,
    Generic,
}

impl From<TaskType> for HandlerKind {
    fn from(task_type: TaskType) -> Self {
        match task_type {
            TaskType::FileOperation => HandlerKind::FileOperation,
            TaskType::CodeGeneration => HandlerKind::CodeGeneration,
            TaskType::WebDevelopment => HandlerKind::WebDevelopment,
            TaskType::DocumentGeneration => HandlerKind::DocumentGeneration,
            TaskType::ApiIntegration => HandlerKind::ApiIntegration,
            TaskType::DatabaseOperation => HandlerKind::DatabaseOperation,
            TaskType::Testing => HandlerKind::Testing,
            TaskType::Validation => HandlerKind::Validation,
            TaskType::DataProcessing | TaskType::Deployment => HandlerKind::Generic,
        }
    }
}

impl HandlerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::FileOperation => "file_operation",
            HandlerKind::CodeGeneration => "code_generation",
            HandlerKind::WebDevelopment => "web_development",
            HandlerKind::DocumentGeneration => "document_generation",
            HandlerKind::ApiIntegration => "api_integration",
            HandlerKind::DatabaseOperation => "database_operation",
            HandlerKind::Testing => "testing",
            HandlerKind::Validation => "validation",
            HandlerKind::Generic => "generic",
        }
    }
}

/// What a dispatched task produced, plus bookkeeping for the result metadata
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub output: Value,
    pub kind: HandlerKind,
    /// Capabilities actually invoked (or served from cache), in order
    pub invoked: Vec<String>,
    /// Optional capabilities that were not registered
    pub skipped_optional: Vec<String>,
    pub cache_hits: usize,
}

impl DispatchOutcome {
    fn new(kind: HandlerKind) -> Self {
        Self {
            output: Value::Null,
            kind,
            invoked: Vec::new(),
            skipped_optional: Vec::new(),
            cache_hits: 0,
        }
    }
}

/// Routes tasks to their handler kind and invokes the selected capabilities
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Run a task. `completed` is the snapshot of completed task ids at dispatch time.
    pub async fn dispatch(
        &self,
        task: &Task,
        context: &ExecutionContext,
        completed: &[TaskId],
    ) -> Result<DispatchOutcome, HandlerError> {
        let kind = HandlerKind::from(task.task_type);
        let mut outcome = DispatchOutcome::new(kind);

        let mut available = Vec::with_capacity(task.requirements.len());
        for requirement in &task.requirements {
            if self.registry.contains(&requirement.name) {
                available.push(requirement);
            } else if requirement.optional {
                debug!(
                    "Optional capability '{}' not registered, skipping for task {}",
                    requirement.name, task.id
                );
                outcome.skipped_optional.push(requirement.name.clone());
            } else {
                return Err(HandlerError::UnknownCapability(requirement.name.clone()));
            }
        }

        info!("Dispatching task {} ({}) as {}", task.id, task.name, kind.as_str());

        let output = match kind {
            HandlerKind::FileOperation | HandlerKind::WebDevelopment | HandlerKind::DocumentGeneration => {
                self.first_of(task, &available, CapabilityClass::Skill, context, &mut outcome)
                    .await?
            }
            HandlerKind::DatabaseOperation => {
                self.first_of(task, &available, CapabilityClass::Mcp, context, &mut outcome)
                    .await?
            }
            HandlerKind::ApiIntegration => {
                let docs = available.iter().any(|r| r.class == CapabilityClass::Docs);
                if docs {
                    self.first_of(task, &available, CapabilityClass::Docs, context, &mut outcome)
                        .await?
                } else {
                    let services: Vec<&TaskRequirement> = available
                        .iter()
                        .copied()
                        .filter(|r| r.class == CapabilityClass::Mcp)
                        .collect();
                    self.all_of(task, &services, context, &mut outcome).await?
                }
            }
            HandlerKind::CodeGeneration | HandlerKind::Testing | HandlerKind::Generic => {
                self.all_of(task, &available, context, &mut outcome).await?
            }
            HandlerKind::Validation => {
                let mut output = self.all_of(task, &available, context, &mut outcome).await?;
                if let Value::Object(map) = &mut output {
                    map.insert("validated".to_string(), json!(completed));
                }
                output
            }
        };

        outcome.output = output;
        Ok(outcome)
    }

    async fn first_of(
        &self,
        task: &Task,
        available: &[&TaskRequirement],
        class: CapabilityClass,
        context: &ExecutionContext,
        outcome: &mut DispatchOutcome,
    ) -> Result<Value, HandlerError> {
        match available.iter().find(|r| r.class == class) {
            Some(requirement) => self.invoke(task, requirement, context, outcome).await,
            None => Ok(default_payload(task, outcome.kind)),
        }
    }

    async fn all_of(
        &self,
        task: &Task,
        requirements: &[&TaskRequirement],
        context: &ExecutionContext,
        outcome: &mut DispatchOutcome,
    ) -> Result<Value, HandlerError> {
        if requirements.is_empty() {
            return Ok(default_payload(task, outcome.kind));
        }

        let mut results = Map::new();
        for requirement in requirements {
            let payload = self.invoke(task, requirement, context, outcome).await?;
            results.insert(requirement.name.clone(), payload);
        }
        Ok(Value::Object(results))
    }

    async fn invoke(
        &self,
        task: &Task,
        requirement: &TaskRequirement,
        context: &ExecutionContext,
        outcome: &mut DispatchOutcome,
    ) -> Result<Value, HandlerError> {
        let handler = self
            .registry
            .get(&requirement.name)
            .ok_or_else(|| HandlerError::UnknownCapability(requirement.name.clone()))?;

        outcome.invoked.push(requirement.name.clone());

        if !handler.cacheable() {
            return handler.invoke(task, requirement, &context.scope()).await;
        }

        let key = requirement.cache_key();
        if let Some(cached) = context.cache.get(&key) {
            debug!("Capability cache hit for {}", key);
            outcome.cache_hits += 1;
            return Ok(cached);
        }

        let payload = handler.invoke(task, requirement, &context.scope()).await?;
        context.cache.insert(key, payload.clone());
        Ok(payload)
    }
}

fn default_payload(task: &Task, kind: HandlerKind) -> Value {
    json!({
        "status": "completed",
        "handler": kind.as_str(),
        "message": format!("Task {} completed", task.name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::registry::SimulatedHandler;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> ExecutionContext {
        ExecutionContext::new(PathBuf::from("/tmp/work"), PathBuf::from("/tmp/out"))
    }

    fn echo_registry(names: &[&str]) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        for name in names {
            let label = name.to_string();
            registry.register_fn(*name, move |_task, _req| {
                let label = label.clone();
                async move { Ok(json!(label)) }
            });
        }
        registry
    }

    #[test]
    fn test_task_types_map_to_fixed_kinds() {
        assert_eq!(HandlerKind::from(TaskType::Deployment), HandlerKind::Generic);
        assert_eq!(HandlerKind::from(TaskType::DataProcessing), HandlerKind::Generic);
        assert_eq!(HandlerKind::from(TaskType::Validation), HandlerKind::Validation);
    }

    #[tokio::test]
    async fn test_document_generation_uses_first_skill() {
        let dispatcher = Dispatcher::new(Arc::new(echo_registry(&["notion", "docx", "pdf"])));
        let task = Task::new("report", "Report", TaskType::DocumentGeneration)
            .with_requirement(TaskRequirement::mcp("notion"))
            .with_requirement(TaskRequirement::skill("docx"))
            .with_requirement(TaskRequirement::skill("pdf"));

        let outcome = dispatcher.dispatch(&task, &context(), &[]).await.unwrap();
        assert_eq!(outcome.output, json!("docx"));
        assert_eq!(outcome.invoked, vec!["docx".to_string()]);
    }

    #[tokio::test]
    async fn test_api_integration_aggregates_services_without_docs() {
        let dispatcher = Dispatcher::new(Arc::new(echo_registry(&["stripe", "hubspot"])));
        let task = Task::new("crm", "CRM", TaskType::ApiIntegration)
            .with_requirement(TaskRequirement::mcp("stripe"))
            .with_requirement(TaskRequirement::mcp("hubspot"));

        let outcome = dispatcher.dispatch(&task, &context(), &[]).await.unwrap();
        assert_eq!(outcome.output, json!({"stripe": "stripe", "hubspot": "hubspot"}));
    }

    #[tokio::test]
    async fn test_api_integration_prefers_docs() {
        let dispatcher = Dispatcher::new(Arc::new(echo_registry(&["stripe", "context7"])));
        let task = Task::new("crm", "CRM", TaskType::ApiIntegration)
            .with_requirement(TaskRequirement::mcp("stripe"))
            .with_requirement(TaskRequirement::docs("context7"));

        let outcome = dispatcher.dispatch(&task, &context(), &[]).await.unwrap();
        assert_eq!(outcome.output, json!("context7"));
        assert_eq!(outcome.invoked, vec!["context7".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_required_capability_fails() {
        let dispatcher = Dispatcher::new(Arc::new(CapabilityRegistry::new()));
        let task = Task::new("db", "DB", TaskType::DatabaseOperation)
            .with_requirement(TaskRequirement::mcp("mongodb"));

        assert_eq!(
            dispatcher.dispatch(&task, &context(), &[]).await.unwrap_err(),
            HandlerError::UnknownCapability("mongodb".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_optional_capability_is_noop() {
        let dispatcher = Dispatcher::new(Arc::new(CapabilityRegistry::new()));
        let task = Task::new("theme", "Theme", TaskType::WebDevelopment)
            .with_requirement(TaskRequirement::skill("theme-factory").optional());

        let outcome = dispatcher.dispatch(&task, &context(), &[]).await.unwrap();
        assert_eq!(outcome.skipped_optional, vec!["theme-factory".to_string()]);
        assert!(outcome.invoked.is_empty());
        assert_eq!(outcome.output["status"], "completed");
    }

    #[tokio::test]
    async fn test_validation_includes_completed_snapshot() {
        let dispatcher = Dispatcher::new(Arc::new(CapabilityRegistry::new()));
        let task = Task::new("check", "Check", TaskType::Validation);
        let completed = vec!["setup".to_string(), "build".to_string()];

        let outcome = dispatcher.dispatch(&task, &context(), &completed).await.unwrap();
        assert_eq!(outcome.output["validated"], json!(["setup", "build"]));
    }

    #[tokio::test]
    async fn test_cacheable_handler_memoized_within_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = crate::execution::registry::FnHandler::new(move |_task: Task, _req: TaskRequirement| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, HandlerError>(json!({"docs": "react"})) }
        })
        .cached();

        let mut registry = CapabilityRegistry::new();
        registry.register("context7", Arc::new(handler));
        registry.register("pdf", Arc::new(SimulatedHandler::new()));
        let dispatcher = Dispatcher::new(Arc::new(registry));
        let ctx = context();

        let requirement = TaskRequirement::docs("context7").with_config("libraries", json!(["react"]));
        let first = Task::new("a", "A", TaskType::CodeGeneration).with_requirement(requirement.clone());
        let second = Task::new("b", "B", TaskType::CodeGeneration).with_requirement(requirement);

        dispatcher.dispatch(&first, &ctx, &[]).await.unwrap();
        let outcome = dispatcher.dispatch(&second, &ctx, &[]).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.cache_hits, 1);
        assert_eq!(outcome.output, json!({"context7": {"docs": "react"}}));
    }
}
