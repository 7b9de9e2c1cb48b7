use crate::{ContextSnapshot, Task, TaskError};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// What a handler hands back on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    pub payload: Value,
    /// Merged into the context variables once the task is terminal.
    pub variables: Map<String, Value>,
    /// Marks the task `succeeded_with_warning`.
    pub warning: Option<String>,
}

impl HandlerOutput {
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

/// Performs the actual work of one task type.
///
/// `task` carries parameters already resolved against `context`, the snapshot
/// taken when the task was dispatched.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(&self, task: &Task, context: ContextSnapshot) -> Result<HandlerOutput, TaskError>;
}

pub type BoxHandler = Arc<dyn Handler>;

/// Adapts an async closure into a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Task, ContextSnapshot) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerOutput, TaskError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Task, ContextSnapshot) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HandlerOutput, TaskError>> + Send + 'static,
{
    async fn invoke(&self, task: &Task, context: ContextSnapshot) -> Result<HandlerOutput, TaskError> {
        (self.f)(task.clone(), context).await
    }
}

/// Handlers keyed by task type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, BoxHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        self.handlers.insert(task_type.into(), Arc::new(handler));
        self
    }

    pub fn with(mut self, task_type: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.register(task_type, handler);
        self
    }

    pub fn get(&self, task_type: &str) -> Option<BoxHandler> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("HandlerRegistry").field("types", &types).finish()
    }
}
