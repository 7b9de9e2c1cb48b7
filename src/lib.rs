pub mod task;
pub mod retry;
pub mod cycle_check;
pub mod graph;
pub mod leveler;
pub mod context;
pub mod handler;
pub mod checkpoint;
pub mod report;
pub mod config;
pub mod logging;
pub mod error;
pub mod executor;

pub use task::{Criticality, Task, TaskRecord, TaskResult, TaskStatus, tasks_from_json};
pub use retry::{FailureClass, RetryExecutor, RetryOutcome, RetryPolicy, classify};
pub use cycle_check::find_shortest_cycle;
pub use graph::{DependencyGraph, GraphBuilder};
pub use leveler::{ExecutionPlan, level};
pub use context::{ContextSnapshot, ExecutionContext, SharedContext, resolve_parameters};
pub use handler::{BoxHandler, FnHandler, Handler, HandlerOutput, HandlerRegistry, handler_fn};
pub use checkpoint::{Checkpoint, CheckpointStore, CompletedTask, FileCheckpointStore, MemoryCheckpointStore};
pub use report::{ExecutionReport, RunStatus, TaskReportEntry, Totals};
pub use config::EngineConfig;
pub use logging::init_logging;
pub use error::{CheckpointError, ConfigError, EngineError, GraphError, TaskError};
pub use executor::{Engine, RunOutcome};
