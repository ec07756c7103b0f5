//! Echo worker running against the in-memory task service
//!
//! Run with:
//!
//! ```text
//! RUST_LOG=tasklane_worker=debug cargo run --example echo_worker
//! ```
//!
//! Environment:
//! - `TASKLANE_WORKER_ID`, `TASKLANE_POLL_TIMEOUT_MS`, `TASKLANE_POLL_INTERVAL_MS`,
//!   `TASKLANE_MAX_BATCH_SIZE`: engine settings
//! - `RUST_LOG` or `LOG_LEVEL`, `LOG_FORMAT=json`: logging

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tasklane_worker::prelude::*;
use tasklane_worker::telemetry::{init_tracing, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some("tasklane_worker=debug,echo_worker=info".to_string());
    }
    init_tracing(telemetry_config);

    let config = EngineConfig::from_env();
    tracing::info!(worker_id = %config.worker_id, "echo worker starting...");

    let client = Arc::new(InMemoryTaskClient::new());
    client.enqueue_all((0..8).map(|i| {
        Task::new(format!("echo-{i}"), "echo", format!("wf-{}", i % 3))
            .with_input(json!({ "message": format!("hello #{i}") }))
    }));
    client.enqueue(
        Task::new("echo-bad", "echo", "wf-bad").with_input(json!({ "message": null })),
    );

    let engine = TaskEngine::new(Arc::clone(&client) as Arc<dyn TaskClient>, config)
        .context("Failed to create task engine")?;

    let echo = handler_fn(|task: Task| async move {
        let message = task.input_data["message"]
            .as_str()
            .ok_or_else(|| format!("task {} has no message", task.task_id))?
            .to_string();

        // Pretend to do some work
        tokio::time::sleep(Duration::from_millis(50 * (message.len() as u64 % 5))).await;

        Ok::<_, String>(
            TaskResult::completed(&task, json!({ "echo": message }))
                .with_log(format!("echoed {} bytes", message.len())),
        )
    });

    engine
        .start("echo", echo, 3, Duration::from_millis(250))
        .await
        .context("Failed to start echo worker")?;

    tokio::select! {
        _ = async {
            while client.reported().len() < 9 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        } => {
            tracing::info!("All tasks reported");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    engine.shutdown();
    engine.wait_all().await;

    for result in client.reported() {
        tracing::info!(
            task_id = %result.task_id,
            status = %result.status,
            output = %result.output_data,
            reason = ?result.reason_for_incompletion,
            "Reported"
        );
    }

    tracing::info!("Worker shutdown complete");
    Ok(())
}
