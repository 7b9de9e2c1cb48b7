use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Map;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    BoxHandler, Checkpoint, CheckpointStore, CompletedTask, ContextSnapshot, Criticality,
    DependencyGraph, EngineConfig, EngineError, ExecutionContext, ExecutionPlan, ExecutionReport,
    FailureClass, GraphBuilder, Handler, HandlerOutput, HandlerRegistry, RetryExecutor,
    RetryPolicy, SharedContext, Task, TaskError, TaskRecord, TaskResult, TaskStatus, classify,
    level, report, resolve_parameters,
};

/// Result of [`Engine::execute`]: the plan of a dry run, or the report of a real one.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Planned(ExecutionPlan),
    Completed(ExecutionReport),
}

/// Live status of every task, readable while a run is in flight.
#[derive(Debug, Clone, Default)]
struct StatusBoard(Arc<RwLock<HashMap<String, TaskStatus>>>);

impl StatusBoard {
    fn set(&self, id: &str, status: TaskStatus) {
        self.0.write().insert(id.to_string(), status);
    }

    fn get(&self, id: &str) -> Option<TaskStatus> {
        self.0.read().get(id).copied()
    }
}

/// Everything a spawned task needs, detached from the engine.
struct Job {
    task: Task,
    handler: BoxHandler,
    policy: RetryPolicy,
    timeout: Option<Duration>,
}

pub struct Engine {
    graph: DependencyGraph,
    levels: Vec<Vec<String>>,
    handlers: HashMap<String, BoxHandler>,
    config: EngineConfig,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    statuses: StatusBoard,
}

impl Engine {
    /// Levels the graph and resolves one handler per task up front, so a task
    /// type without a handler fails here rather than mid-run.
    pub fn new(
        graph: DependencyGraph,
        registry: &HandlerRegistry,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let mut handlers = HashMap::with_capacity(graph.len());
        for task in graph.tasks() {
            let handler = registry
                .get(&task.task_type)
                .ok_or_else(|| EngineError::MissingHandler {
                    task: task.id.clone(),
                    task_type: task.task_type.clone(),
                })?;
            handlers.insert(task.id.clone(), handler);
        }

        let levels = level(&graph);
        let statuses = StatusBoard::default();
        for task in graph.tasks() {
            statuses.set(&task.id, TaskStatus::Pending);
        }

        Ok(Self {
            graph,
            levels,
            handlers,
            config,
            checkpoints: None,
            statuses,
        })
    }

    /// Builds the graph with the configured setup task, then the engine.
    pub fn from_tasks(
        tasks: &[Task],
        registry: &HandlerRegistry,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let mut builder = GraphBuilder::new();
        if let Some(setup) = &config.setup_task {
            builder = builder.with_setup_task(setup.clone());
        }
        let graph = builder.build(tasks)?;
        Self::new(graph, registry, config)
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn plan(&self) -> ExecutionPlan {
        ExecutionPlan::new(self.levels.clone())
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.statuses.get(id)
    }

    /// Runs the graph, or only plans it when `dry_run` is configured.
    pub async fn execute(&self, context: ExecutionContext) -> Result<RunOutcome, EngineError> {
        if self.config.dry_run {
            let plan = self.plan();
            info!(
                levels = plan.levels.len(),
                tasks = plan.total_tasks,
                "dry run, no handler invoked"
            );
            return Ok(RunOutcome::Planned(plan));
        }
        self.run(context).await.map(RunOutcome::Completed)
    }

    pub async fn run(&self, context: ExecutionContext) -> Result<ExecutionReport, EngineError> {
        self.run_with_id(&Uuid::new_v4().to_string(), context).await
    }

    pub async fn run_with_id(
        &self,
        run_id: &str,
        context: ExecutionContext,
    ) -> Result<ExecutionReport, EngineError> {
        self.run_from(run_id, context, None).await
    }

    /// Continues `run_id` from its latest checkpoint. Tasks that already
    /// succeeded are not run again and the context is seeded from the
    /// checkpoint; without a checkpoint this is a fresh run under `run_id`.
    pub async fn resume(
        &self,
        run_id: &str,
        context: ExecutionContext,
    ) -> Result<ExecutionReport, EngineError> {
        let checkpoint = match &self.checkpoints {
            Some(store) => store.load_latest(run_id).await?,
            None => None,
        };
        if checkpoint.is_none() {
            warn!(run_id, "no checkpoint found, starting from scratch");
        }
        self.run_from(run_id, context, checkpoint).await
    }

    async fn run_from(
        &self,
        run_id: &str,
        context: ExecutionContext,
        checkpoint: Option<Checkpoint>,
    ) -> Result<ExecutionReport, EngineError> {
        let start = Instant::now();
        let mut records: HashMap<String, TaskRecord> = self
            .graph
            .tasks()
            .iter()
            .map(|task| (task.id.clone(), TaskRecord::pending(task)))
            .collect();
        let mut sequence = 0;

        let context = match checkpoint {
            Some(checkpoint) => {
                for completed in &checkpoint.completed_tasks {
                    if !completed.status.is_success() {
                        continue;
                    }
                    if let Some(task) = self.graph.task(&completed.id) {
                        records.insert(task.id.clone(), completed.to_record(task.criticality));
                    }
                }
                sequence = checkpoint.sequence + 1;
                info!(
                    run_id,
                    restored = records.values().filter(|r| r.status.is_success()).count(),
                    from_level = checkpoint.level,
                    "resuming from checkpoint"
                );
                let mut context = checkpoint.context;
                context
                    .results
                    .retain(|id, _| records.get(id).is_some_and(|r| r.status.is_success()));
                context
            }
            None => context,
        };

        for record in records.values() {
            self.statuses.set(&record.id, record.status);
        }

        context.prepare_directories().await?;
        let report_path = context.report_path();
        let shared = SharedContext::new(context);
        let abort = CancellationToken::new();

        info!(
            run_id,
            tasks = self.graph.len(),
            levels = self.levels.len(),
            max_parallel_tasks = self.config.max_parallel_tasks,
            "starting run"
        );

        for (index, level) in self.levels.iter().enumerate() {
            let pending: Vec<&str> = level
                .iter()
                .filter(|id| !records[id.as_str()].status.is_success())
                .map(String::as_str)
                .collect();

            if abort.is_cancelled() {
                for id in pending {
                    self.mark_skipped(&mut records, id);
                }
                continue;
            }
            if pending.is_empty() {
                debug!(level = index, "level already complete");
                continue;
            }

            info!(level = index, tasks = pending.len(), "starting level");
            for record in self.run_level(&pending, &shared, &abort).await {
                records.insert(record.id.clone(), record);
            }

            if let Some(store) = &self.checkpoints {
                let checkpoint = Checkpoint {
                    run_id: run_id.to_string(),
                    sequence,
                    level: index,
                    timestamp: Utc::now(),
                    completed_tasks: self
                        .levels
                        .iter()
                        .flatten()
                        .map(|id| &records[id.as_str()])
                        .filter(|r| r.status.is_terminal() && r.status != TaskStatus::Skipped)
                        .map(CompletedTask::from)
                        .collect(),
                    context: shared.current().await,
                };
                store.save(&checkpoint).await?;
                debug!(run_id, level = index, sequence, "checkpoint saved");
                sequence += 1;
            }

            if abort.is_cancelled() {
                error!(run_id, level = index, "critical failure, skipping remaining levels");
            }
        }

        let ordered: Vec<TaskRecord> = self
            .levels
            .iter()
            .flatten()
            .filter_map(|id| records.remove(id))
            .collect();
        let report = report::generate(run_id, &ordered, start.elapsed(), abort.is_cancelled());

        if self.config.save_report {
            report.save(&report_path).await?;
        }

        info!(
            run_id,
            status = ?report.status(),
            succeeded = report.totals.succeeded,
            warnings = report.totals.warnings,
            failed = report.totals.failed,
            skipped = report.totals.skipped,
            wall_ms = report.total_wall_ms,
            serial_estimate_ms = report.serial_estimate_ms,
            "run finished"
        );
        Ok(report)
    }

    /// Dispatches one level under the concurrency cap and waits for every
    /// dispatched task. Once an abort is signalled, tasks still waiting for a
    /// slot are skipped; tasks already running finish normally.
    async fn run_level(
        &self,
        ids: &[&str],
        shared: &SharedContext,
        abort: &CancellationToken,
    ) -> Vec<TaskRecord> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_tasks));
        let mut dispatched = Vec::with_capacity(ids.len());
        let mut handles = Vec::with_capacity(ids.len());
        let mut skipped = Vec::new();

        for &id in ids {
            let permit = tokio::select! {
                biased;
                _ = abort.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };
            let (Some(permit), Some(job)) = (permit, self.job(id)) else {
                skipped.push(id);
                continue;
            };

            let span = info_span!("task", task_id = %id);
            dispatched.push(id);
            handles.push(tokio::spawn(
                run_task(job, shared.clone(), abort.clone(), self.statuses.clone(), permit)
                    .instrument(span),
            ));
        }

        // every handle is awaited so no task outlives its level
        let mut records = Vec::with_capacity(ids.len());
        for (id, joined) in dispatched.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(record) => records.push(record),
                Err(err) => records.push(self.record_lost_task(id, &err.to_string(), shared, abort).await),
            }
        }

        for id in skipped {
            if let Some(task) = self.graph.task(id) {
                let mut record = TaskRecord::pending(task);
                record.skip();
                self.statuses.set(id, TaskStatus::Skipped);
                records.push(record);
            }
        }

        records
    }

    /// Records a task whose spawned future died outside the handler guard.
    /// It counts as a critical failure.
    async fn record_lost_task(
        &self,
        id: &str,
        reason: &str,
        shared: &SharedContext,
        abort: &CancellationToken,
    ) -> TaskRecord {
        let message = format!("panicked: {reason}");
        error!(task_id = id, error = %message, "task panicked, aborting run");
        abort.cancel();

        let mut record = match self.graph.task(id) {
            Some(task) => TaskRecord::pending(task),
            None => TaskRecord::pending(&Task::new(id, "")),
        };
        let result = TaskResult::Error {
            message: message.clone(),
        };
        shared.commit(id, result.clone(), Map::new()).await;
        record.status = TaskStatus::Failed;
        record.attempt_count = 1;
        record.last_error = Some(message);
        record.result = Some(result);
        record.finished_at = Some(Utc::now());
        self.statuses.set(id, TaskStatus::Failed);
        record
    }

    fn job(&self, id: &str) -> Option<Job> {
        let task = self.graph.task(id)?;
        Some(Job {
            task: task.clone(),
            handler: self.handlers.get(id)?.clone(),
            policy: task
                .retry
                .clone()
                .unwrap_or_else(|| self.config.retry_policy()),
            timeout: task.timeout().or_else(|| self.config.task_timeout()),
        })
    }

    fn mark_skipped(&self, records: &mut HashMap<String, TaskRecord>, id: &str) {
        if let Some(record) = records.get_mut(id) {
            record.skip();
            self.statuses.set(id, TaskStatus::Skipped);
            debug!(task_id = id, "task skipped");
        }
    }
}

async fn run_task(
    job: Job,
    shared: SharedContext,
    abort: CancellationToken,
    statuses: StatusBoard,
    _permit: OwnedSemaphorePermit,
) -> TaskRecord {
    let Job {
        task,
        handler,
        policy,
        timeout,
    } = job;

    let mut record = TaskRecord::pending(&task);
    record.started_at = Some(Utc::now());
    let started = Instant::now();
    statuses.set(&task.id, TaskStatus::Running);

    // parameters resolve once, against the snapshot taken at dispatch
    let snapshot = shared.snapshot().await;
    let mut resolved = task.clone();
    resolved.parameters = resolve_parameters(&task.parameters, &snapshot);

    let executor = RetryExecutor::new(policy);
    let (handler, resolved, statuses_ref) = (handler.as_ref(), &resolved, &statuses);
    let outcome = executor
        .execute_with_retry(
            &task.id,
            |attempt| {
                let snapshot = snapshot.clone();
                async move {
                    statuses_ref.set(&resolved.id, TaskStatus::Running);
                    debug!(attempt, "invoking handler");
                    invoke_attempt(handler, resolved, snapshot, timeout).await
                }
            },
            |_, _, _| statuses_ref.set(&resolved.id, TaskStatus::Retrying),
        )
        .await;

    record.attempt_count = outcome.attempts;
    let (status, result, variables, message) = match outcome.result {
        Ok(output) => {
            let status = if output.warning.is_some() {
                TaskStatus::SucceededWithWarning
            } else {
                TaskStatus::Succeeded
            };
            (
                status,
                TaskResult::Success {
                    payload: output.payload,
                },
                output.variables,
                output.warning,
            )
        }
        Err(TaskError::NonCritical {
            message,
            partial: Some(payload),
        }) => (
            TaskStatus::SucceededWithWarning,
            TaskResult::Success { payload },
            Map::new(),
            Some(message),
        ),
        Err(err) => {
            let aborts = match classify(&err) {
                FailureClass::Critical => true,
                FailureClass::Retryable => task.criticality == Criticality::Critical,
                FailureClass::NonCritical => false,
            };
            let message = err.to_string();
            if aborts {
                error!(error = %message, attempts = outcome.attempts, "task failed, aborting run");
                abort.cancel();
            } else {
                warn!(error = %message, attempts = outcome.attempts, "task failed, run continues");
            }
            (
                TaskStatus::Failed,
                TaskResult::Error {
                    message: message.clone(),
                },
                Map::new(),
                Some(message),
            )
        }
    };

    shared.commit(&task.id, result.clone(), variables).await;

    record.status = status;
    record.result = Some(result);
    record.last_error = message;
    record.finished_at = Some(Utc::now());
    record.duration_ms = crate::retry::duration_ms(started.elapsed());
    statuses.set(&task.id, status);

    info!(
        status = %status,
        duration_ms = record.duration_ms,
        attempts = record.attempt_count,
        "task finished"
    );
    record
}

async fn invoke_attempt(
    handler: &dyn Handler,
    task: &Task,
    snapshot: ContextSnapshot,
    timeout: Option<Duration>,
) -> Result<HandlerOutput, TaskError> {
    // a panicking handler fails its task instead of the run
    let call = AssertUnwindSafe(async move { handler.invoke(task, snapshot).await })
        .catch_unwind()
        .map(|outcome| {
            outcome.unwrap_or_else(|panic| {
                Err(TaskError::Critical(format!("panicked: {}", panic_message(panic.as_ref()))))
            })
        });
    let Some(limit) = timeout else {
        return call.await;
    };
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(TaskError::Retryable(format!(
            "attempt timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
