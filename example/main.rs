use dagflow::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

// Scaffolds a small project: setup, then a fan-out of generation steps, a
// flaky fetch that succeeds on its third attempt, and a final packaging step.
fn tasks() -> Vec<Task> {
    vec![
        Task::new("setup", "setup").critical(),
        Task::new("readme", "render")
            .with_parameter("path", "README.md")
            .with_parameter("body", "# {{ project_name }}\nversion {{ version }}"),
        Task::new("config", "render")
            .with_parameter("path", "config.json")
            .with_parameter("body", "{\"port\": {{ port }}}"),
        Task::new("deps", "fetch").with_retry(
            RetryPolicy::new(3, Duration::from_millis(50)).with_max_delay(Duration::from_millis(200)),
        ),
        Task::new("lint", "lint").depends_on("readme"),
        Task::new("package", "package")
            .critical()
            .depends_on("readme")
            .depends_on("config")
            .depends_on("deps")
            .with_parameter("files", json!(["{{ readme_path }}", "{{ config_path }}"])),
    ]
}

fn registry() -> HandlerRegistry {
    let fetch_attempts = Arc::new(AtomicU32::new(0));

    HandlerRegistry::new()
        .with(
            "setup",
            handler_fn(|_task, ctx| async move {
                tokio::fs::create_dir_all(ctx.work_path("src"))
                    .await
                    .map_err(|e| TaskError::critical(e.to_string()))?;
                Ok::<_, TaskError>(
                    HandlerOutput::new(json!({"workspace": ctx.work_directory})).with_variable("version", "0.1.0"),
                )
            }),
        )
        .with(
            "render",
            handler_fn(|task, ctx| async move {
                let path = task.parameters["path"].as_str().unwrap_or_default().to_string();
                let body = task.parameters["body"].as_str().unwrap_or_default().to_string();
                tokio::fs::write(ctx.work_path(&path), &body)
                    .await
                    .map_err(|e| TaskError::retryable(e.to_string()))?;
                let key = format!("{}_path", task.id);
                Ok::<_, TaskError>(HandlerOutput::new(json!({"bytes": body.len()})).with_variable(key, path))
            }),
        )
        .with(
            "fetch",
            handler_fn(move |_task, _ctx| {
                let attempts = fetch_attempts.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        return Err(TaskError::retryable("registry unavailable"));
                    }
                    Ok(HandlerOutput::new(json!({"packages": 12})))
                }
            }),
        )
        .with(
            "lint",
            handler_fn(|_task, _ctx| async move {
                Err::<HandlerOutput, _>(TaskError::NonCritical {
                    message: "2 style warnings".into(),
                    partial: Some(json!({"warnings": 2})),
                })
            }),
        )
        .with(
            "package",
            handler_fn(|task, _ctx| async move {
                Ok::<_, TaskError>(HandlerOutput::new(task.parameters["files"].clone()))
            }),
        )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging(None)?;

    let dir = tempfile::tempdir()?;
    let config = EngineConfig::default()
        .with_setup_task("setup")
        .with_max_parallel_tasks(2)
        .with_task_timeout(Duration::from_secs(5));
    let engine = Engine::from_tasks(&tasks(), &registry(), config)?
        .with_checkpoint_store(Arc::new(FileCheckpointStore::new(dir.path().join("checkpoints"))));

    println!("Dependency tree:\n{}", engine.graph().render_tree());
    println!("Plan:\n{}", engine.plan());

    let context = ExecutionContext::new(dir.path().join("workspace"), dir.path().join("output"))
        .with_variable("project_name", "ledger")
        .with_variable("port", 8080);
    let report = engine.run(context).await?;

    println!("\nRun {} finished: {:?}", report.run_id, report.status());
    for task in &report.tasks {
        println!(
            "  {:<8} {:<24} attempts={} {}ms {}",
            task.id,
            task.status.as_str(),
            task.attempts,
            task.duration_ms,
            task.error.as_deref().unwrap_or("")
        );
    }
    println!(
        "success rate {:.0}%, wall {}ms vs serial {}ms ({:.2}x)",
        report.success_rate * 100.0,
        report.total_wall_ms,
        report.serial_estimate_ms,
        report.speedup()
    );

    Ok(())
}
