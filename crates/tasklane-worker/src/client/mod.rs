//! Remote task service collaborator
//!
//! The engine only needs two operations from the remote work-distribution
//! service: batch polling for tasks and reporting results. Transport,
//! authentication and wire encoding live behind [`TaskClient`].
//!
//! [`InMemoryTaskClient`] is a scriptable implementation for tests and demos.

mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::task::{Task, TaskResult};

pub use memory::{InMemoryTaskClient, PollRecord};

/// Error type for collaborator operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Network or connection failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with an error status
    #[error("service returned {status}: {message}")]
    Service { status: u16, message: String },

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

/// Parameters of one batch poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub task_type: String,

    /// Upper bound on tasks to hand out
    pub count: usize,

    /// Long-poll timeout the service may hold the request for
    pub timeout: Duration,

    pub domain: Option<String>,

    pub worker_id: String,
}

/// Result of a successful poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Tasks handed to this worker (at most `count`)
    Tasks(Vec<Task>),

    /// The service explicitly reported there is nothing to do
    NoWork,
}

impl PollOutcome {
    /// Tasks carried by the outcome, empty for [`PollOutcome::NoWork`]
    pub fn into_tasks(self) -> Vec<Task> {
        match self {
            Self::Tasks(tasks) => tasks,
            Self::NoWork => vec![],
        }
    }
}

/// Operations the engine consumes from the remote task service
#[async_trait]
pub trait TaskClient: Send + Sync {
    /// Poll for up to `request.count` tasks of `request.task_type`
    async fn poll(&self, request: PollRequest) -> Result<PollOutcome, ClientError>;

    /// Submit a task result
    ///
    /// May be called more than once for the same result when retrying.
    async fn report_result(&self, result: &TaskResult) -> Result<(), ClientError>;
}
