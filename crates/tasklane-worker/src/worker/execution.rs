//! Single task execution and result reporting

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, instrument, warn};

use super::handler::TaskHandler;
use crate::client::TaskClient;
use crate::reliability::{report_with_retry, ReportError, RetryPolicy};
use crate::slots::SlotGuard;
use crate::task::{Task, TaskResult, TaskStatus};

/// Runs one task through its handler and reports the outcome
///
/// Shared by every execution of a task type.
pub(crate) struct TaskExecutor {
    pub(crate) handler: TaskHandler,
    pub(crate) client: Arc<dyn TaskClient>,
    pub(crate) worker_id: Arc<str>,
    pub(crate) report_retry: RetryPolicy,
}

impl TaskExecutor {
    /// Execute `task` and report its result
    ///
    /// `slot` is held for the whole execution and released on every exit
    /// path, including a panic inside the handler or the reporter.
    #[instrument(skip_all, fields(task_type = %task.task_type, task_id = %task.task_id))]
    pub(crate) async fn run(
        self: Arc<Self>,
        task: Task,
        slot: SlotGuard,
    ) -> Result<TaskStatus, ReportError> {
        let _slot = slot;

        let result = self.execute(task).await.with_worker_id(self.worker_id.as_ref());
        let status = result.status;

        match report_with_retry(self.client.as_ref(), &result, &self.report_retry).await {
            Ok(attempts) => {
                debug!(%status, attempts, "Task finished");
                Ok(status)
            }
            Err(e) => {
                error!(%status, error = %e, "Dropping task result after exhausting report retries");
                Err(e)
            }
        }
    }

    /// Run the handler, turning errors and panics into a FAILED result
    async fn execute(&self, task: Task) -> TaskResult {
        let handler = Arc::clone(&self.handler);
        let input = task.clone();

        // The call itself sits inside the async block so a panic while
        // building the future is caught as well.
        let outcome = AssertUnwindSafe(async move { handler(input).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(output)) => output.into_result(&task),
            Ok(Err(reason)) => {
                warn!(%reason, "Task handler returned an error");
                TaskResult::failed(&task, reason)
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(%reason, "Task handler panicked");
                TaskResult::failed(&task, format!("handler panicked: {reason}"))
            }
        }
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

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::client::InMemoryTaskClient;
    use crate::slots::SlotTracker;
    use crate::worker::{handler_fn, HandlerResult};

    fn executor(client: Arc<InMemoryTaskClient>, handler: TaskHandler) -> Arc<TaskExecutor> {
        Arc::new(TaskExecutor {
            handler,
            client,
            worker_id: Arc::from("worker-test"),
            report_retry: RetryPolicy::default(),
        })
    }

    async fn run_once(
        client: Arc<InMemoryTaskClient>,
        handler: TaskHandler,
    ) -> (Result<TaskStatus, ReportError>, i64) {
        let slots = SlotTracker::new("encode", 16, Duration::from_secs(30));
        slots.increase(1).await.unwrap();
        let slot = slots.consume().await.unwrap();

        let task = Task::new("t-1", "encode", "wf-1").with_input(json!({"n": 2}));
        let outcome = executor(client, handler).run(task, slot).await;

        slots.sync().await.unwrap();
        (outcome, slots.get())
    }

    #[tokio::test]
    async fn test_success_reports_completed_and_returns_slot() {
        let client = Arc::new(InMemoryTaskClient::new());
        let handler = handler_fn(|task: Task| async move {
            let n = task.input_data["n"].as_i64().unwrap_or(0);
            Ok::<_, String>(json!({ "doubled": n * 2 }))
        });

        let (outcome, available) = run_once(Arc::clone(&client), handler).await;

        assert_eq!(outcome.unwrap(), TaskStatus::Completed);
        assert_eq!(available, 1);
        let reported = client.reported();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].output_data, json!({"doubled": 4}));
        assert_eq!(reported[0].worker_id.as_deref(), Some("worker-test"));
    }

    #[tokio::test]
    async fn test_handler_error_reports_failed_and_returns_slot() {
        let client = Arc::new(InMemoryTaskClient::new());
        let handler = handler_fn(|_task: Task| async move {
            Err::<serde_json::Value, _>("upstream unavailable")
        });

        let (outcome, available) = run_once(Arc::clone(&client), handler).await;

        assert_eq!(outcome.unwrap(), TaskStatus::Failed);
        assert_eq!(available, 1);
        assert_eq!(
            client.reported()[0].reason_for_incompletion.as_deref(),
            Some("upstream unavailable")
        );
    }

    #[tokio::test]
    async fn test_handler_panic_reports_failed_and_returns_slot() {
        let client = Arc::new(InMemoryTaskClient::new());
        let handler = handler_fn(|_task: Task| async move {
            if true {
                panic!("index out of bounds");
            }
            Ok::<serde_json::Value, String>(json!({}))
        });

        let (outcome, available) = run_once(Arc::clone(&client), handler).await;

        assert_eq!(outcome.unwrap(), TaskStatus::Failed);
        assert_eq!(available, 1);
        let reason = client.reported()[0].reason_for_incompletion.clone().unwrap();
        assert!(reason.contains("index out of bounds"));
    }

    #[tokio::test]
    async fn test_panic_while_building_future_is_caught() {
        let client = Arc::new(InMemoryTaskClient::new());
        let handler: TaskHandler = Arc::new(
            |_task: Task| -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> {
                panic!("no future for you")
            },
        );

        let (outcome, available) = run_once(Arc::clone(&client), handler).await;

        assert_eq!(outcome.unwrap(), TaskStatus::Failed);
        assert_eq!(available, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_failure_still_returns_slot() {
        let client = Arc::new(InMemoryTaskClient::new());
        client.fail_all_reports(true);
        let handler = handler_fn(|_task: Task| async move { Ok::<_, String>(json!({})) });

        let (outcome, available) = run_once(Arc::clone(&client), handler).await;

        assert!(matches!(outcome, Err(ReportError::Exhausted { attempts: 3, .. })));
        assert_eq!(available, 1);
        assert_eq!(client.report_attempts(), 3);
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");

        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
