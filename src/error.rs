use thiserror::Error;

/// Rejection of a task list by the graph builder. Always raised before any
/// handler runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),
    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },
    #[error("Circular dependency detected: {}", format_cycle(.cycle))]
    Cycle { cycle: Vec<String> },
    #[error("Setup task {0} is not part of the graph")]
    UnknownSetupTask(String),
}

fn format_cycle(cycle: &[String]) -> String {
    let mut path = cycle.join(" -> ");
    if let Some(first) = cycle.first() {
        path.push_str(" -> ");
        path.push_str(first);
    }
    path
}

/// Error returned by a handler for one attempt of a task.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// Transient failure, retried with backoff.
    #[error("retryable: {0}")]
    Retryable(String),
    /// Fatal failure, aborts the run whatever the task's criticality.
    #[error("critical: {0}")]
    Critical(String),
    /// Domain failure that is recorded but never retried. A partial result
    /// turns the task into `succeeded_with_warning`.
    #[error("non-critical: {message}")]
    NonCritical {
        message: String,
        partial: Option<serde_json::Value>,
    },
}

impl TaskError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::Critical(message.into())
    }

    pub fn non_critical(message: impl Into<String>) -> Self {
        Self::NonCritical {
            message: message.into(),
            partial: None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(message) | Self::Critical(message) => message,
            Self::NonCritical { message, .. } => message,
        }
    }
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Configuration IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors that end `Engine` construction or a run. Task failures are never
/// reported through this type; they land in the execution report.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("No handler registered for task {task} of type {task_type}")]
    MissingHandler { task: String, task_type: String },
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
