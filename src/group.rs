use super::pool::WorkerPool;
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;


/// Argument bag handed to tasks submitted with
/// [`TaskGroupWithContext::submit_with_args`].
pub type TaskArgs = HashMap<String, serde_json::Value>;

/// Outstanding-task counter shared by a group and its tasks.
#[derive(Default)]
struct GroupState {
    pending: AtomicUsize,
    notify: Notify,
}

impl GroupState {
    fn register(self: &Arc<Self>) -> PendingTask {
        self.pending.fetch_add(1, Ordering::AcqRel);
        PendingTask { state: Arc::clone(self) }
    }

    async fn wait(&self) {
        while self.pending.load(Ordering::Acquire) > 0 {
            self.notify.notified().await;
        }
    }
}

/// Counts one task as finished when dropped, which happens whether the task
/// completed, panicked, was skipped or was discarded by the pool.
struct PendingTask {
    state: Arc<GroupState>,
}

impl Drop for PendingTask {
    fn drop(&mut self) {
        if self.state.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.state.notify.notify_one();
        }
    }
}

/// A batch of related tasks submitted to one pool.
///
/// [`wait`](Self::wait) consumes the group, so nothing can be submitted to it
/// afterwards.
pub struct TaskGroup {
    pool: WorkerPool,
    state: Arc<GroupState>,
}

impl TaskGroup {
    pub(crate) fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            state: Arc::new(GroupState::default()),
        }
    }

    pub async fn submit<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let pending = self.state.register();
        self.pool
            .submit(async move {
                let _pending = pending;
                fut.await;
            })
            .await;
    }

    /// Tasks submitted to this group that have not finished yet.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::Acquire)
    }

    /// Waits until every task of the group finished. Panics are absorbed by
    /// the pool exactly as for plain submissions.
    pub async fn wait(self) {
        self.state.wait().await;
    }
}

/// First failure of a group. Only the task that flips `claimed` may store.
struct FirstError<E> {
    claimed: AtomicBool,
    slot: Mutex<Option<E>>,
}

impl<E> FirstError<E> {
    fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
            slot: Mutex::new(None),
        }
    }

    /// Returns `true` if `err` was recorded.
    fn record(&self, err: E) -> bool {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
        true
    }

    fn take(&self) -> Option<E> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// A task group that keeps the first error returned by its tasks and
/// cancels the rest.
///
/// The group owns a [`CancellationToken`], a child of the parent token passed
/// at creation. It is cancelled on the first failure, when the parent is
/// cancelled, when the pool is stopped, or when [`wait`](Self::wait) sees
/// every task finish. Tasks that
/// have not started by then are skipped; running tasks are not interrupted
/// but can watch [`context`](Self::context).
pub struct TaskGroupWithContext<E> {
    pool: WorkerPool,
    state: Arc<GroupState>,
    token: CancellationToken,
    first_error: Arc<FirstError<E>>,
}

impl<E> TaskGroupWithContext<E>
where
    E: Send + 'static,
{
    pub(crate) fn new(pool: WorkerPool, parent: Option<&CancellationToken>) -> Self {
        let shutdown = pool.shutdown_token();
        let token = match parent {
            None => shutdown.child_token(),
            Some(parent) => {
                let token = parent.child_token();
                if shutdown.is_cancelled() {
                    token.cancel();
                } else {
                    // A token has a single parent; follow the pool by hand.
                    let shutdown = shutdown.clone();
                    let group = token.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = shutdown.cancelled() => group.cancel(),
                            _ = group.cancelled() => {}
                        }
                    });
                }
                token
            }
        };
        Self {
            pool,
            state: Arc::new(GroupState::default()),
            token,
            first_error: Arc::new(FirstError::new()),
        }
    }

    /// Cancellation signal of this group.
    pub fn context(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::Acquire)
    }

    pub async fn submit<F>(&self, fut: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        let pending = self.state.register();
        let token = self.token.clone();
        let first_error = Arc::clone(&self.first_error);

        self.pool
            .submit(async move {
                let _pending = pending;
                if token.is_cancelled() {
                    trace!("group cancelled, skipping task");
                    return;
                }
                if let Err(err) = fut.await {
                    if first_error.record(err) {
                        trace!("first group error recorded, cancelling group");
                        token.cancel();
                    }
                }
            })
            .await;
    }

    /// Submits `f(args)`. `f` is not called if the group is cancelled before
    /// the task starts.
    pub async fn submit_with_args<F, Fut>(&self, f: F, args: TaskArgs)
    where
        F: FnOnce(TaskArgs) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.submit(async move { f(args).await }).await;
    }

    /// Waits until every task finished or the group is cancelled, whichever
    /// comes first, and returns the first error.
    ///
    /// Returning because of cancellation does not mean the remaining tasks
    /// have finished, and yields `Ok(())` if the cancellation came from the
    /// parent token or a pool stop rather than a failing task.
    pub async fn wait(self) -> Result<(), E> {
        tokio::select! {
            biased;
            _ = self.state.wait() => self.token.cancel(),
            _ = self.token.cancelled() => {}
        }
        match self.first_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
