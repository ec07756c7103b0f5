//! Task and result models exchanged with the remote task service

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of work pulled from the remote service
///
/// Immutable once received; handed to exactly one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task ID assigned by the remote service
    pub task_id: String,

    /// Task type (the name the handler is registered under)
    pub task_type: String,

    /// Workflow instance that scheduled this task
    pub workflow_instance_id: String,

    /// Input payload
    #[serde(default)]
    pub input_data: Value,

    /// How many times the remote service has retried this task
    #[serde(default)]
    pub retry_count: u32,

    /// Domain the task was polled from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl Task {
    /// Create a task with empty input
    pub fn new(
        task_id: impl Into<String>,
        task_type: impl Into<String>,
        workflow_instance_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_type: task_type.into(),
            workflow_instance_id: workflow_instance_id.into(),
            input_data: Value::Null,
            retry_count: 0,
            domain: None,
        }
    }

    /// Set the input payload
    pub fn with_input(mut self, input: Value) -> Self {
        self.input_data = input;
        self
    }
}

/// Status of a task result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    InProgress,
    Completed,
    Failed,
    FailedWithTerminalError,
    Canceled,
}

impl TaskStatus {
    /// Whether the status ends the task from the worker's point of view
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::FailedWithTerminalError => write!(f, "FAILED_WITH_TERMINAL_ERROR"),
            Self::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// Outcome of executing a task, reported back to the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub workflow_instance_id: String,

    /// ID of the worker that executed the task (stamped by the engine)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    pub status: TaskStatus,

    #[serde(default)]
    pub output_data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_for_incompletion: Option<String>,

    /// Ask the service to re-deliver an IN_PROGRESS task after this delay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_after_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

impl TaskResult {
    /// Create a result for the given task with the given status
    pub fn new(task: &Task, status: TaskStatus) -> Self {
        Self {
            task_id: task.task_id.clone(),
            workflow_instance_id: task.workflow_instance_id.clone(),
            worker_id: None,
            status,
            output_data: Value::Null,
            reason_for_incompletion: None,
            callback_after_seconds: None,
            logs: vec![],
        }
    }

    /// A COMPLETED result carrying `output`
    pub fn completed(task: &Task, output: Value) -> Self {
        Self {
            output_data: output,
            ..Self::new(task, TaskStatus::Completed)
        }
    }

    /// A FAILED result with the given reason
    pub fn failed(task: &Task, reason: impl Into<String>) -> Self {
        Self {
            reason_for_incompletion: Some(reason.into()),
            ..Self::new(task, TaskStatus::Failed)
        }
    }

    /// An IN_PROGRESS result asking for re-delivery after `seconds`
    pub fn in_progress(task: &Task, seconds: u64) -> Self {
        Self {
            callback_after_seconds: Some(seconds),
            ..Self::new(task, TaskStatus::InProgress)
        }
    }

    /// Append an execution log line
    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    /// Set the re-delivery delay
    pub fn with_callback_after(mut self, seconds: u64) -> Self {
        self.callback_after_seconds = Some(seconds);
        self
    }

    /// Set the worker ID
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }
}

/// What a handler hands back on success
///
/// Either a fully formed [`TaskResult`] or a raw output payload that is
/// wrapped into a COMPLETED result.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutput {
    Result(TaskResult),
    Output(Value),
}

impl HandlerOutput {
    /// Resolve into the result to report for `task`
    pub fn into_result(self, task: &Task) -> TaskResult {
        match self {
            Self::Result(result) => result,
            Self::Output(output) => TaskResult::completed(task, output),
        }
    }
}

impl From<TaskResult> for HandlerOutput {
    fn from(result: TaskResult) -> Self {
        Self::Result(result)
    }
}

impl From<Value> for HandlerOutput {
    fn from(output: Value) -> Self {
        Self::Output(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> Task {
        Task::new("t-1", "resize_image", "wf-1").with_input(json!({"width": 10}))
    }

    #[test]
    fn test_raw_output_wraps_as_completed() {
        let task = task();
        let result = HandlerOutput::from(json!({"ok": true})).into_result(&task);

        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.task_id, "t-1");
        assert_eq!(result.workflow_instance_id, "wf-1");
        assert_eq!(result.output_data, json!({"ok": true}));
    }

    #[test]
    fn test_explicit_result_passes_through() {
        let task = task();
        let explicit = TaskResult::in_progress(&task, 30).with_log("waiting on upstream");
        let result = HandlerOutput::from(explicit.clone()).into_result(&task);

        assert_eq!(result, explicit);
        assert!(!result.status.is_terminal());
    }

    #[test]
    fn test_failed_result_carries_reason() {
        let result = TaskResult::failed(&task(), "boom");
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.reason_for_incompletion.as_deref(), Some("boom"));
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&TaskStatus::FailedWithTerminalError).unwrap();
        assert_eq!(json, "\"FAILED_WITH_TERMINAL_ERROR\"");
        assert_eq!(TaskStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = TaskResult::failed(&task(), "bad input").with_worker_id("w-1");
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["taskId"], "t-1");
        assert_eq!(value["workerId"], "w-1");
        assert_eq!(value["reasonForIncompletion"], "bad input");
        assert!(value.get("callbackAfterSeconds").is_none());
    }
}
