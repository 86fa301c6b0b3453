//! Capability handler registry.
//!
//! Capabilities (document skills, service integrations, documentation
//! lookups, ...) are external collaborators. The engine only knows them
//! through [`CapabilityHandler`] and finds them by name in a
//! [`CapabilityRegistry`].

use crate::execution::context::HandlerScope;
use crate::task::{Task, TaskRequirement};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Failure raised while running a task's capabilities
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// A required capability is not registered
    #[error("Unknown capability '{0}'")]
    UnknownCapability(String),

    /// The handler reported a failure
    #[error("Capability '{capability}' failed: {message}")]
    Failed { capability: String, message: String },

    /// The handler panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(capability: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerError::Failed {
            capability: capability.into(),
            message: message.into(),
        }
    }

    /// Stable label recorded in result metadata
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::UnknownCapability(_) => "unknown_capability",
            HandlerError::Failed { .. } => "handler_failure",
            HandlerError::Panicked(_) => "handler_panic",
        }
    }
}

/// A pluggable capability implementation
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Run the capability for one requirement of a task
    async fn invoke(
        &self,
        task: &Task,
        requirement: &TaskRequirement,
        scope: &HandlerScope<'_>,
    ) -> Result<Value, HandlerError>;

    /// Whether repeated calls with the same configuration may be served from
    /// the run's capability cache
    fn cacheable(&self) -> bool {
        false
    }
}

/// Adapter turning an async closure into a [`CapabilityHandler`]
pub struct FnHandler<F> {
    func: F,
    cacheable: bool,
}

impl<F> FnHandler<F> {
    pub fn new(func: F) -> Self {
        Self {
            func,
            cacheable: false,
        }
    }

    pub fn cached(mut self) -> Self {
        self.cacheable = true;
        self
    }
}

#[async_trait]
impl<F, Fut> CapabilityHandler for FnHandler<F>
where
    F: Fn(Task, TaskRequirement) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn invoke(
        &self,
        task: &Task,
        requirement: &TaskRequirement,
        _scope: &HandlerScope<'_>,
    ) -> Result<Value, HandlerError> {
        (self.func)(task.clone(), requirement.clone()).await
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }
}

/// Stand-in handler that performs no work and reports what it would have done
#[derive(Debug, Clone, Default)]
pub struct SimulatedHandler {
    delay: Option<Duration>,
    cacheable: bool,
}

impl SimulatedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering, to emulate I/O-bound work
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn cached(mut self) -> Self {
        self.cacheable = true;
        self
    }
}

#[async_trait]
impl CapabilityHandler for SimulatedHandler {
    async fn invoke(
        &self,
        task: &Task,
        requirement: &TaskRequirement,
        scope: &HandlerScope<'_>,
    ) -> Result<Value, HandlerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(json!({
            "status": "simulated",
            "capability": requirement.name,
            "class": requirement.class,
            "task_id": task.id,
            "output_directory": scope.output_directory.display().to_string(),
        }))
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }
}

/// Maps capability names to handlers
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    handlers: HashMap<String, Arc<dyn CapabilityHandler>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to a handler, replacing any previous binding
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn CapabilityHandler>) -> &mut Self {
        let name = name.into();
        debug!("Registering capability handler: {}", name);
        self.handlers.insert(name, handler);
        self
    }

    /// Bind `name` to an async closure
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(Task, TaskRequirement) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register(name, Arc::new(FnHandler::new(func)))
    }

    /// Registry with a simulated handler for every capability the tasks name
    pub fn simulated_for(tasks: &[Task]) -> Self {
        let mut registry = Self::new();
        for requirement in tasks.iter().flat_map(|task| &task.requirements) {
            if !registry.contains(&requirement.name) {
                registry.register(requirement.name.clone(), Arc::new(SimulatedHandler::new()));
            }
        }
        info!("Registered {} simulated capability handlers", registry.len());
        registry
    }

    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn CapabilityHandler>) -> Self {
        self.register(name, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CapabilityHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}
