use std::{
    any::Any,
    future::Future,
    panic::{resume_unwind, AssertUnwindSafe},
    pin::Pin,
    task::{Context, Poll},
};
use futures::FutureExt;
use tokio::{
    sync::oneshot,
    time::Duration,
};


pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// How a submitted task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task ran to completion.
    Completed,
    /// The task panicked; the payload went to the pool's panic handler.
    Panicked,
    /// The task was never started, it was dropped by `stop` or refused
    /// because the pool was already stopped.
    Discarded,
}

/// Completion signal for a single task.
///
/// Resolves once the task finished or was discarded. Dropping the handle does
/// not affect the task.
pub struct TaskHandle {
    receiver: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    /// Wraps `fut` so that its outcome is reported to the returned handle.
    ///
    /// A panic is reported and then resumed, so the worker still sees it and
    /// forwards the payload to the panic handler.
    pub(crate) fn wrap<F>(fut: F) -> (Task, TaskHandle)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let task: Task = Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(()) => {
                    let _ = tx.send(TaskOutcome::Completed);
                }
                Err(payload) => {
                    let _ = tx.send(TaskOutcome::Panicked);
                    resume_unwind(payload);
                }
            }
        });
        (task, TaskHandle { receiver: rx })
    }

    /// Waits at most `timeout`; `None` if the task is still queued or running.
    pub async fn await_timeout(self, timeout: Duration) -> Option<TaskOutcome> {
        tokio::time::timeout(timeout, self).await.ok()
    }
}

impl Future for TaskHandle {
    type Output = TaskOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the task was dropped without running.
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|res| res.unwrap_or(TaskOutcome::Discarded))
    }
}

/// Best-effort text of a panic payload, for logging.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> Option<&str> {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}
