//! Task handler types

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::task::{HandlerOutput, Task};

/// Handler execution result; errors are carried as their display text
pub type HandlerResult = Result<HandlerOutput, String>;

/// Type-erased task handler
pub type TaskHandler =
    Arc<dyn Fn(Task) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>> + Send + Sync>;

/// Wrap an async function into a [`TaskHandler`]
///
/// The function may return a [`TaskResult`](crate::task::TaskResult) or a raw
/// `serde_json::Value` (reported as COMPLETED), and any displayable error
/// (reported as FAILED with the error text as the reason).
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use tasklane_worker::worker::handler_fn;
///
/// let handler = handler_fn(|task| async move {
///     let name = task.input_data["name"].as_str().unwrap_or("world").to_string();
///     Ok::<_, String>(json!({ "greeting": format!("hello {name}") }))
/// });
/// ```
pub fn handler_fn<F, Fut, O, E>(f: F) -> TaskHandler
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, E>> + Send + 'static,
    O: Into<HandlerOutput>,
    E: Display,
{
    Arc::new(move |task| {
        let fut = f(task);
        Box::pin(async move { fut.await.map(Into::into).map_err(|e| e.to_string()) })
    })
}
