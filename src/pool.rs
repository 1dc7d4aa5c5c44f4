use super::{
    config::Config,
    errors::PoolError,
    group::{TaskGroup, TaskGroupWithContext},
    handle::{panic_message, Task, TaskHandle, TaskOutcome},
    model::PoolMetrics,
};
use std::{
    future::Future,
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
};
use crossbeam::{
    deque::{Injector, Steal},
    queue::SegQueue,
};
use futures::FutureExt;
use tokio::{
    sync::{Notify, Semaphore},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};


pub type WorkerPool = Arc<WorkerPoolInner>;

/// Why an idle worker stopped waiting.
enum Wake {
    Notified,
    WorkVisible,
    Shutdown,
    TimedOut,
}

const WAITING: u8 = 0;
const CLAIMED: u8 = 1;
const LEFT: u8 = 2;

/// One idle period of a worker. A submitter hands it work by moving the state
/// from `WAITING` to `CLAIMED`; the worker gives up by moving it to `LEFT`.
/// Exactly one of the two wins.
struct Parked {
    state: AtomicU8,
    wake: Notify,
}

impl Parked {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(WAITING),
            wake: Notify::new(),
        }
    }

    fn claim(&self) -> bool {
        self.state
            .compare_exchange(WAITING, CLAIMED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// `false` when a submitter claimed this worker first.
    fn withdraw(&self) -> bool {
        self.state
            .compare_exchange(WAITING, LEFT, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Marks a submission in progress; `stop_and_wait` does not return while one
/// is outstanding.
struct Admission<'a> {
    pool: &'a WorkerPoolInner,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.pool.admitting.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.pool.drained.notify_waiters();
        }
    }
}

/// Elastic pool: workers are spawned on demand up to `max_workers` and reaped
/// after `idle_timeout` without work.
///
/// Pending tasks sit in a FIFO injector whose capacity is enforced by a
/// semaphore; a submitter waits for a free slot when the queue is full. All
/// methods that spawn workers must run inside a tokio runtime.
///
/// Stop the pool with [`stop`](Self::stop) or
/// [`stop_and_wait`](Self::stop_and_wait) before dropping it: live workers
/// keep the pool alive.
pub struct WorkerPoolInner {
    inject: Injector<Task>,
    slots: Semaphore,
    parked: SegQueue<Arc<Parked>>,
    drained: Notify,
    shutdown: CancellationToken,
    stopped: AtomicBool,
    discarding: AtomicBool,
    running: AtomicUsize,
    idle: AtomicUsize,
    admitting: AtomicUsize,
    next_worker_id: AtomicUsize,
    submitted: AtomicUsize,
    completed: AtomicUsize,
    panicked: AtomicUsize,
    discarded: AtomicUsize,
    config: Config,
}

impl WorkerPoolInner {
    pub fn new(max_workers: usize, max_queue_length: usize) -> Result<WorkerPool, PoolError> {
        Self::with_config(Config::new(max_workers, max_queue_length))
    }

    pub fn with_config(config: Config) -> Result<WorkerPool, PoolError> {
        if config.max_workers == 0 {
            return Err(PoolError::InvalidMaxWorkers(config.max_workers));
        }
        let slots = config.queue_slots().min(Semaphore::MAX_PERMITS);

        Ok(Arc::new(WorkerPoolInner {
            inject: Injector::new(),
            slots: Semaphore::new(slots),
            parked: SegQueue::new(),
            drained: Notify::new(),
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            discarding: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            admitting: AtomicUsize::new(0),
            next_worker_id: AtomicUsize::new(0),
            submitted: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            panicked: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
            config,
        }))
    }

    #[inline]
    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    #[inline]
    pub fn max_queue_length(&self) -> usize {
        self.config.max_queue_length
    }

    /// Number of live workers, busy or idle.
    #[inline]
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of tasks queued and not yet picked up by a worker.
    #[inline]
    pub fn waiting(&self) -> usize {
        self.inject.len()
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Cancelled when the pool is stopped, either way.
    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Submits a task, waiting for a queue slot if the queue is full.
    ///
    /// Tasks submitted after the pool was stopped are dropped without running.
    pub async fn submit<F>(self: &Arc<Self>, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit_task(Box::pin(fut)).await;
    }

    /// Same as [`submit`](Self::submit); `None` is ignored.
    pub async fn submit_opt<F>(self: &Arc<Self>, fut: Option<F>)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(fut) = fut {
            self.submit(fut).await;
        }
    }

    /// Submits a blocking closure. It runs on tokio's blocking threads while
    /// occupying one worker until it returns.
    pub async fn submit_blocking<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(async move {
            if let Err(err) = tokio::task::spawn_blocking(f).await {
                if err.is_panic() {
                    resume_unwind(err.into_panic());
                }
            }
        })
        .await;
    }

    /// Admits a task only if a queue slot is free right now.
    ///
    /// Returns `false` when the queue is full or the pool is stopped; the task
    /// is dropped in both cases.
    pub fn try_submit<F>(self: &Arc<Self>, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _admission = self.begin_admission();
        if self.is_stopped() {
            return false;
        }
        match self.slots.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(_) => return false,
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.enqueue(Box::pin(fut));
        true
    }

    pub async fn submit_with_handle<F>(self: &Arc<Self>, fut: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (task, handle) = TaskHandle::wrap(fut);
        self.submit_task(task).await;
        handle
    }

    /// Submits a task and waits until it finished or was discarded.
    pub async fn submit_and_wait<F>(self: &Arc<Self>, fut: F) -> TaskOutcome
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.submit_with_handle(fut).await.await
    }

    pub fn group(self: &Arc<Self>) -> TaskGroup {
        TaskGroup::new(Arc::clone(self))
    }

    /// Creates a group cancelled by `parent` (if given) and by pool shutdown.
    pub fn group_context<E>(self: &Arc<Self>, parent: Option<&CancellationToken>) -> TaskGroupWithContext<E>
    where
        E: Send + 'static,
    {
        TaskGroupWithContext::new(Arc::clone(self), parent)
    }

    async fn submit_task(self: &Arc<Self>, task: Task) -> bool {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        let _admission = self.begin_admission();
        if self.is_stopped() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.slots.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => {
                // Closed by a stop while we were waiting for a slot.
                trace!("submission dropped, pool stopped");
                self.discarded.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }
        self.enqueue(task);
        true
    }

    fn begin_admission(&self) -> Admission<'_> {
        self.admitting.fetch_add(1, Ordering::SeqCst);
        Admission { pool: self }
    }

    /// Pushes an admitted task. The caller already holds a queue slot.
    fn enqueue(self: &Arc<Self>, task: Task) {
        self.inject.push(task);
        if self.discarding.load(Ordering::SeqCst) {
            // `stop` ran between admission and the push.
            self.discard_pending();
            return;
        }
        if self.wake_idle_worker() {
            return;
        }
        if self.try_reserve_worker() {
            self.spawn_worker();
        }
    }

    /// Hands the queue to one parked worker. Entries whose worker already
    /// left are dropped on the way.
    fn wake_idle_worker(&self) -> bool {
        while let Some(parked) = self.parked.pop() {
            if parked.claim() {
                parked.wake.notify_one();
                return true;
            }
        }
        false
    }

    /// Claims a worker slot; fails when `max_workers` are already live.
    fn try_reserve_worker(&self) -> bool {
        let max = self.config.max_workers;
        self.running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok()
    }

    fn release_worker(&self) {
        if self.running.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    fn spawn_worker(self: &Arc<Self>) {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let pool = Arc::clone(self);
        debug!(worker = id, running = self.running(), "spawning worker");
        tokio::spawn(async move {
            pool.worker_loop(id).await;
        });
    }

    fn pop_task(&self) -> Option<Task> {
        loop {
            match self.inject.steal() {
                Steal::Success(task) => {
                    self.slots.add_permits(1);
                    return Some(task);
                }
                Steal::Empty => return None,
                Steal::Retry => std::hint::spin_loop(),
            }
        }
    }

    fn discard_pending(&self) -> usize {
        let mut count = 0;
        while let Some(task) = self.pop_task() {
            drop(task);
            count += 1;
        }
        self.discarded.fetch_add(count, Ordering::Relaxed);
        count
    }

    async fn worker_loop(self: Arc<Self>, id: usize) {
        loop {
            if self.discarding.load(Ordering::SeqCst) {
                break;
            }
            if let Some(task) = self.pop_task() {
                self.run_task(id, task).await;
                continue;
            }
            if self.is_stopped() {
                break;
            }

            let parked = Arc::new(Parked::new());
            self.parked.push(Arc::clone(&parked));
            self.idle.fetch_add(1, Ordering::SeqCst);
            // Anything pushed before we parked was not handed to us.
            let wake = if self.inject.is_empty() && !self.is_stopped() {
                self.wait_for_work(&parked).await
            } else {
                Wake::WorkVisible
            };
            self.idle.fetch_sub(1, Ordering::SeqCst);

            let claimed = matches!(wake, Wake::Notified) || !parked.withdraw();
            if claimed || !matches!(wake, Wake::TimedOut) {
                continue;
            }
            if !self.inject.is_empty() {
                continue;
            }
            self.release_worker();
            // A submitter may have found no parked worker and no free slot.
            if !self.inject.is_empty() && self.try_reserve_worker() {
                continue;
            }
            debug!(worker = id, running = self.running(), "idle worker reaped");
            return;
        }
        self.release_worker();
        debug!(worker = id, running = self.running(), "worker exited on shutdown");
    }

    async fn wait_for_work(&self, parked: &Parked) -> Wake {
        let idle_timeout = self.config.effective_idle_timeout();
        let reap = async move {
            match idle_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = parked.wake.notified() => Wake::Notified,
            _ = self.shutdown.cancelled() => Wake::Shutdown,
            _ = reap => Wake::TimedOut,
        }
    }

    async fn run_task(&self, worker: usize, task: Task) {
        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                self.panicked.fetch_add(1, Ordering::Relaxed);
                warn!(
                    worker,
                    panic = panic_message(payload.as_ref()).unwrap_or("<non-string payload>"),
                    "task panicked"
                );
                if let Some(handler) = &self.config.panic_handler {
                    if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                        warn!(worker, "panic handler panicked");
                    }
                }
            }
        }
    }

    fn begin_stop(&self, discard: bool) {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        if discard {
            self.discarding.store(true, Ordering::SeqCst);
        }
        self.slots.close();
        self.shutdown.cancel();

        if discard {
            let discarded = self.discard_pending();
            info!(discarded, running = self.running(), "pool stopped");
        } else if first {
            info!(waiting = self.waiting(), running = self.running(), "pool stopping, draining queue");
        }
    }

    /// Stops the pool without waiting.
    ///
    /// Queued tasks are dropped without running, and submitters blocked on a
    /// full queue give up. Workers finish the task they are running, then exit.
    pub fn stop(&self) {
        self.begin_stop(true);
    }

    /// Stops accepting tasks and waits until every admitted task ran and all
    /// workers exited.
    pub async fn stop_and_wait(&self) {
        self.begin_stop(false);
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.is_drained() {
                break;
            }
            drained.await;
        }
    }

    fn is_drained(&self) -> bool {
        self.admitting.load(Ordering::SeqCst) == 0 && self.running() == 0 && self.inject.is_empty()
    }

    /// Like [`stop_and_wait`](Self::stop_and_wait) bounded by `timeout`.
    ///
    /// On timeout the pool is stopped the hard way (see [`stop`](Self::stop))
    /// and `false` is returned.
    pub async fn stop_and_wait_timeout(&self, timeout: Duration) -> bool {
        if tokio::time::timeout(timeout, self.stop_and_wait()).await.is_ok() {
            return true;
        }
        self.stop();
        false
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            running_workers: self.running(),
            idle_workers: self.idle.load(Ordering::Relaxed),
            waiting_tasks: self.waiting(),
            submitted_tasks: self.submitted.load(Ordering::Relaxed),
            completed_tasks: self.completed.load(Ordering::Relaxed),
            panicked_tasks: self.panicked.load(Ordering::Relaxed),
            discarded_tasks: self.discarded.load(Ordering::Relaxed),
        }
    }
}
