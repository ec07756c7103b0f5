//! # Tasklane Worker
//!
//! A client-side engine that pulls tasks from a remote work-distribution
//! service, runs them through user handlers under a bounded concurrency
//! budget, and reports results back with retries.
//!
//! ## Features
//!
//! - **Slot accounting**: one single-writer slot tracker per task type
//! - **Poll-and-dispatch**: polls only for as many tasks as there are free slots
//! - **Panic safety**: handler errors and panics become FAILED results and
//!   always return their slot
//! - **Reliable reporting**: exponential backoff retries on result submission
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TaskEngine                            │
//! │      (task type -> TaskWorker, start / remove / wait_all)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TaskWorker                            │
//! │   (dispatch loop, SlotTracker, in-flight executions)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TaskClient                            │
//! │              (poll / report_result, remote service)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use serde_json::json;
//! use tasklane_worker::prelude::*;
//!
//! # async fn run() -> Result<(), EngineError> {
//! let client = Arc::new(InMemoryTaskClient::new());
//! let engine = TaskEngine::new(client, EngineConfig::default())?;
//!
//! engine
//!     .start(
//!         "greet",
//!         handler_fn(|task: Task| async move {
//!             Ok::<_, String>(json!({ "hello": task.input_data["name"] }))
//!         }),
//!         4,
//!         Duration::from_millis(200),
//!     )
//!     .await?;
//!
//! engine.shutdown();
//! engine.wait_all().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod reliability;
pub mod slots;
pub mod task;
pub mod telemetry;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::client::{ClientError, InMemoryTaskClient, PollOutcome, PollRequest, TaskClient};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{EngineError, TaskEngine};
    pub use crate::reliability::RetryPolicy;
    pub use crate::task::{HandlerOutput, Task, TaskResult, TaskStatus};
    pub use crate::worker::{handler_fn, TaskHandler, TaskRegistration};
}

// Re-export key types at crate root
pub use client::{ClientError, InMemoryTaskClient, PollOutcome, PollRequest, TaskClient};
pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineError, TaskEngine};
pub use reliability::{report_with_retry, ReportError, RetryPolicy};
pub use slots::{SlotGuard, SlotTracker, SlotTrackerError};
pub use task::{HandlerOutput, Task, TaskResult, TaskStatus};
pub use worker::{handler_fn, HandlerResult, TaskHandler, TaskRegistration, TaskWorker};
