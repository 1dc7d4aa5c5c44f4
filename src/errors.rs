use thiserror::Error;

/// Errors raised while building a pool.
///
/// Running tasks never surface errors through the pool itself: panics go to
/// the panic handler and task failures only travel through
/// [`TaskGroupWithContext::wait`](crate::group::TaskGroupWithContext::wait).
#[non_exhaustive]
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum PoolError {
    #[error("max_workers must be at least 1, got {0}")]
    InvalidMaxWorkers(usize),
}
