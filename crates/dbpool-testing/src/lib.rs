//! # dbpool-testing
//!
//! Test infrastructure for the `dbpool` connection pool.
//!
//! Provides an in-memory [`MockDriver`] whose connections record every
//! operation and can be scripted to fail, so pool behavior can be verified
//! without a database server.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::Pool;
//! use dbpool_testing::{MockDriver, test_target};
//!
//! let driver = MockDriver::new();
//! let pool = Pool::builder(driver.clone(), test_target()).build()?;
//!
//! driver.fail_commits(true);
//! // ... exercise the pool ...
//! assert_eq!(driver.stats().rollbacks, 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;

pub use mock::{MockConnection, MockDriver, MockError, MockEvent, MockOutput, MockStats};

use dbpool::ConnectTarget;

/// Connection target used by tests. The mock driver ignores its contents.
#[must_use]
pub fn test_target() -> ConnectTarget {
    ConnectTarget::new("127.0.0.1", 5432, "dbpool_test", "tester", "secret")
}
