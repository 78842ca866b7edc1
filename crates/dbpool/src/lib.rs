//! # dbpool
//!
//! Bounded async connection pool with TTL recycling and scoped
//! sessions/transactions.
//!
//! The pool hands a limited number of long-lived connections to concurrent
//! callers. Connections are opened lazily through a caller-supplied
//! [`Driver`], reused while they are younger than the configured TTL, and
//! retired when they fail or age out.
//!
//! ## Features
//!
//! - Lazy connection creation up to `max_connections`
//! - Condition-style blocking with optional timeout or cancellation
//! - TTL checked when a connection is handed back
//! - Read sessions that retire the connection on failure
//! - Transactions with commit-on-success and rollback-on-failure
//! - Status and metrics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::{ConnectTarget, Pool, PoolError};
//! use std::time::Duration;
//!
//! let target = ConnectTarget::new("127.0.0.1", 5432, "app", "app_user", "secret");
//! let pool = Pool::builder(driver, target)
//!     .max_connections(4)
//!     .ttl(Duration::from_secs(100))
//!     .acquire_timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! let count = pool
//!     .with_session(|mut session| {
//!         Box::pin(async move {
//!             session.execute("SELECT count(*) FROM users").await.map_err(PoolError::operation)
//!         })
//!     })
//!     .await?;
//!
//! pool.with_transaction(|mut tx| {
//!     Box::pin(async move {
//!         tx.execute("INSERT INTO audit (event) VALUES ('login')")
//!             .await
//!             .map_err(PoolError::operation)
//!     })
//! })
//! .await?;
//!
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod session;
pub mod transaction;

// Configuration
pub use config::{ConnectTarget, PoolConfig};

// Driver capability
pub use driver::{Driver, RawConnection};

// Error types
pub use error::{BoxError, PoolError};

// Pool types
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection};

// Lifecycle management
pub use lifecycle::{ConnectionMetadata, ConnectionState, RetireReason};

// Scoped contexts
pub use session::Session;
pub use transaction::Transaction;

pub use futures_util::future::BoxFuture;
pub use tokio_util::sync::CancellationToken;
