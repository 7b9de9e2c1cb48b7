//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use dagflow::*;
use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

/// A throwaway work/output directory pair.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn context(&self) -> ExecutionContext {
        ExecutionContext::new(self.dir.path().join("work"), self.dir.path().join("output"))
    }
}

/// Config with fast, deterministic retries.
pub fn fast_config() -> EngineConfig {
    EngineConfig::default().with_retries(0, Duration::from_millis(1))
}

/// Records the order in which handlers were invoked.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, id: &str) {
        self.0.lock().push(id.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, id: &str) -> usize {
        self.0.lock().iter().filter(|c| c.as_str() == id).count()
    }
}

/// Handler that logs the call and succeeds with the task id as payload.
pub fn ok_handler(log: &CallLog) -> impl Handler + 'static {
    let log = log.clone();
    handler_fn(move |task, _ctx| {
        log.push(&task.id);
        async move { Ok::<_, TaskError>(HandlerOutput::new(json!({ "task": task.id }))) }
    })
}

/// Handler that logs the call and always fails with `error`.
pub fn failing_handler(log: &CallLog, error: TaskError) -> impl Handler + 'static {
    let log = log.clone();
    handler_fn(move |task, _ctx| {
        log.push(&task.id);
        let error = error.clone();
        async move { Err::<HandlerOutput, _>(error) }
    })
}

pub fn ids(report: &ExecutionReport, status: TaskStatus) -> Vec<String> {
    report
        .tasks
        .iter()
        .filter(|t| t.status == status)
        .map(|t| t.id.clone())
        .collect()
}
