#![allow(dead_code)]

use std::{future::Future, time::Duration};
use tracing_subscriber::EnvFilter;

/// Routes pool logs to the test output; `RUST_LOG=async_pond=debug` shows
/// worker spawn and reap events.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `cond` until it holds or `limit` elapses.
pub async fn eventually<F>(limit: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    cond()
}

pub async fn measure<F, Fut, T>(name: &str, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let start = std::time::Instant::now();
    let result = f().await;
    println!("✓ {}: {:?}", name, start.elapsed());
    result
}
