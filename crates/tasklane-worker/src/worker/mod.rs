//! Per task type workers
//!
//! This module provides:
//! - [`TaskWorker`] - Dispatch loop plus slot tracker for one task type
//! - [`TaskRegistration`] - Handler, concurrency and polling settings for a task type
//! - [`handler_fn`] - Adapter from async functions to [`TaskHandler`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TaskWorker ("encode")                     │
//! │  ┌──────────────────┐          ┌──────────────────────────┐  │
//! │  │  Dispatch loop   │◄─ get ───│       SlotTracker        │  │
//! │  │ (poll / idle)    │── -1 ───►│ (queue + drain task)     │  │
//! │  └────────┬─────────┘          └────────────▲─────────────┘  │
//! │           │ spawn                           │ +1 on drop     │
//! │           ▼                                 │                │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │        Executions (one per task, TaskTracker)        │    │
//! │  │  handler ─► catch_unwind ─► report_with_retry        │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod dispatch;
mod execution;
mod handler;

pub use dispatch::{TaskRegistration, TaskWorker};
pub use handler::{handler_fn, HandlerResult, TaskHandler};
