//! Result reporting with retries

use tracing::{debug, warn};

use super::RetryPolicy;
use crate::client::{ClientError, TaskClient};
use crate::task::TaskResult;

/// Terminal reporting failure
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Every attempt failed; the result is dropped
    #[error("reporting result for task {task_id} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        task_id: String,
        attempts: u32,
        #[source]
        last_error: ClientError,
    },
}

/// Report `result`, retrying failed attempts according to `policy`
///
/// Returns the number of attempts it took. There is no fallback after the
/// last attempt; the remote service's lease timeout takes over.
pub async fn report_with_retry(
    client: &dyn TaskClient,
    result: &TaskResult,
    policy: &RetryPolicy,
) -> Result<u32, ReportError> {
    let mut attempt = 1;

    loop {
        let error = match client.report_result(result).await {
            Ok(()) => {
                debug!(task_id = %result.task_id, attempt, status = %result.status, "Reported task result");
                return Ok(attempt);
            }
            Err(error) => error,
        };

        let Some(delay) = policy.backoff_after(attempt) else {
            return Err(ReportError::Exhausted {
                task_id: result.task_id.clone(),
                attempts: attempt,
                last_error: error,
            });
        };

        warn!(
            task_id = %result.task_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Failed to report task result, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
