//! Shared helpers for pool integration tests.

#![allow(dead_code)]

use std::time::Duration;

use dbpool::{Pool, PoolConfig, PoolError};
use dbpool_testing::{MockDriver, test_target};

/// Install a test subscriber once; respects `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a pool over `driver` with the given size and TTL.
pub fn pool(driver: &MockDriver, max: u32, ttl: Duration) -> Pool<MockDriver> {
    init_tracing();
    Pool::builder(driver.clone(), test_target())
        .max_connections(max)
        .ttl(ttl)
        .build()
        .unwrap()
}

/// Build a pool over `driver` from a full configuration.
pub fn pool_with(driver: &MockDriver, config: PoolConfig) -> Pool<MockDriver> {
    init_tracing();
    Pool::new(driver.clone(), test_target(), config).unwrap()
}

/// Caller-side error type used to check that failures pass through unchanged.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("business rule violated: {0}")]
    Rule(String),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Yield until `done` holds, for work the pool spawns in the background.
pub async fn settle(mut done: impl FnMut() -> bool) {
    for _ in 0..64 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
}
