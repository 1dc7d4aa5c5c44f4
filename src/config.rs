use std::{any::Any, fmt, sync::Arc};
use tokio::time::Duration;

/// Callback receiving the payload of a panicking task.
pub type PanicHandler = Arc<dyn Fn(Box<dyn Any + Send>) + Send + Sync + 'static>;

/// Pool configuration
#[derive(Clone)]
pub struct Config {
    /// Upper bound on live workers. Must be at least 1.
    pub max_workers: usize,
    /// Capacity of the pending-task buffer. Zero is treated as one slot.
    pub max_queue_length: usize,
    /// How long an idle worker waits for work before exiting.
    /// `None` (or a zero duration) keeps idle workers alive until shutdown.
    pub idle_timeout: Option<Duration>,
    pub panic_handler: Option<PanicHandler>,
}

impl Default for Config {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            max_workers: num_cpus * 2,
            max_queue_length: num_cpus * 20,
            idle_timeout: Some(Duration::from_secs(5)),
            panic_handler: None,
        }
    }
}

impl Config {
    pub fn new(max_workers: usize, max_queue_length: usize) -> Self {
        Self {
            max_workers,
            max_queue_length,
            idle_timeout: None,
            panic_handler: None,
        }
    }

    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            max_workers: num_cpus,
            max_queue_length: num_cpus * 10,
            ..Self::default()
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            max_workers: num_cpus * 2,
            max_queue_length: num_cpus * 100,
            idle_timeout: Some(Duration::from_secs(30)),
            panic_handler: None,
        }
    }

    /// Reap workers that stay idle for `timeout`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Install a callback observing panics raised by tasks.
    pub fn panic_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.panic_handler = Some(Arc::new(handler));
        self
    }

    #[inline]
    pub(crate) fn effective_idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout.filter(|d| !d.is_zero())
    }

    #[inline]
    pub(crate) fn queue_slots(&self) -> usize {
        self.max_queue_length.max(1)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("max_workers", &self.max_workers)
            .field("max_queue_length", &self.max_queue_length)
            .field("idle_timeout", &self.idle_timeout)
            .field("panic_handler", &self.panic_handler.is_some())
            .finish()
    }
}
