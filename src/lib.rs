//! Elastic async worker pool with task groups.
//!
//! # Features
//! - Workers spawned on demand up to a ceiling, reaped after an idle timeout
//! - Bounded FIFO queue; submitters wait when it is full
//! - Panic isolation with an optional panic handler
//! - `stop` (drop queued work) and `stop_and_wait` (drain it)
//! - Task groups, including a variant that keeps the first error and cancels
//!   the rest of the group
//!
//! ```no_run
//! use async_pond::{Config, WorkerPoolInner};
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), async_pond::PoolError> {
//! let pool = WorkerPoolInner::with_config(
//!     Config::new(4, 100).idle_timeout(Duration::from_secs(1)),
//! )?;
//!
//! let group = pool.group();
//! for i in 0..10 {
//!     group.submit(async move { println!("task {i}") }).await;
//! }
//! group.wait().await;
//!
//! pool.stop_and_wait().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod group;
pub mod handle;
pub mod model;
pub mod pool;

pub use config::{Config, PanicHandler};
pub use errors::PoolError;
pub use group::{TaskArgs, TaskGroup, TaskGroupWithContext};
pub use handle::{TaskHandle, TaskOutcome};
pub use model::PoolMetrics;
pub use pool::{WorkerPool, WorkerPoolInner};
