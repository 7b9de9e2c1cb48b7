use crate::TaskResult;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tokio::sync::RwLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_\.]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// State shared by every task of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub work_directory: PathBuf,
    pub output_directory: PathBuf,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub results: BTreeMap<String, TaskResult>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new("./workspace", "./output")
    }
}

impl ExecutionContext {
    pub fn new(work_directory: impl Into<PathBuf>, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            work_directory: work_directory.into(),
            output_directory: output_directory.into(),
            variables: BTreeMap::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Looks up a variable by dotted path, descending into objects and arrays.
    pub fn variable(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.variables.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub async fn prepare_directories(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.work_directory).await?;
        tokio::fs::create_dir_all(&self.output_directory).await
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_directory.join("execution_report.json")
    }

    pub fn work_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.work_directory.join(relative)
    }
}

/// Immutable view of the context taken when a task is dispatched.
pub type ContextSnapshot = Arc<ExecutionContext>;

/// The run's context behind a single writer lock.
///
/// Handlers only ever see snapshots; every mutation goes through [`commit`]
/// so concurrent tasks cannot lose each other's updates.
///
/// [`commit`]: SharedContext::commit
#[derive(Debug, Clone)]
pub struct SharedContext {
    inner: Arc<RwLock<ExecutionContext>>,
}

impl SharedContext {
    pub fn new(context: ExecutionContext) -> Self {
        Self {
            inner: Arc::new(RwLock::new(context)),
        }
    }

    pub async fn snapshot(&self) -> ContextSnapshot {
        Arc::new(self.inner.read().await.clone())
    }

    /// Records a terminal result and merges the variables the handler declared.
    pub async fn commit(&self, task_id: &str, result: TaskResult, variables: Map<String, Value>) {
        let mut ctx = self.inner.write().await;
        ctx.results.insert(task_id.to_string(), result);
        ctx.variables.extend(variables);
    }

    pub async fn current(&self) -> ExecutionContext {
        self.inner.read().await.clone()
    }
}

/// Substitutes `{{ name }}` placeholders in every string parameter.
///
/// A string made of exactly one placeholder takes the variable's JSON value;
/// placeholders embedded in text are stringified. Unknown variables render as
/// an empty string.
pub fn resolve_parameters(parameters: &Map<String, Value>, context: &ExecutionContext) -> Map<String, Value> {
    parameters
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, context)))
        .collect()
}

fn resolve_value(value: &Value, context: &ExecutionContext) -> Value {
    match value {
        Value::String(text) => resolve_string(text, context),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, context)).collect()),
        Value::Object(map) => Value::Object(resolve_parameters(map, context)),
        other => other.clone(),
    }
}

fn resolve_string(text: &str, context: &ExecutionContext) -> Value {
    if let Some(caps) = PLACEHOLDER.captures(text) {
        if caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == text.len()) {
            return context
                .variable(&caps[1])
                .cloned()
                .unwrap_or_else(|| Value::String(String::new()));
        }
    }

    let rendered = PLACEHOLDER.replace_all(text, |caps: &Captures<'_>| match context.variable(&caps[1]) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    });
    Value::String(rendered.into_owned())
}
