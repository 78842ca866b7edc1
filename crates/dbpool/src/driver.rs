//! Driver capability consumed by the pool.
//!
//! The pool never speaks a wire protocol itself. A [`Driver`] opens
//! connections to a [`ConnectTarget`], and each [`RawConnection`] executes
//! statements and controls its own transaction state. Failures from any of
//! these operations are reported back to the pool unchanged.

use async_trait::async_trait;

use crate::config::ConnectTarget;

/// Factory for raw database connections.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Connection type produced by this driver.
    type Connection: RawConnection;

    /// Error returned when a connection cannot be established.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection to `target`.
    async fn connect(&self, target: &ConnectTarget) -> Result<Self::Connection, Self::Error>;
}

/// An open connection owned by the pool or by exactly one caller.
#[async_trait]
pub trait RawConnection: Send + 'static {
    /// Result of executing a statement.
    type Output: Send;

    /// Error returned by connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Execute a statement.
    async fn execute(&mut self, statement: &str) -> Result<Self::Output, Self::Error>;

    /// Start a transaction.
    ///
    /// Drivers that open transactions implicitly can keep the default.
    async fn begin(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<(), Self::Error>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<(), Self::Error>;

    /// Close the connection.
    async fn close(self) -> Result<(), Self::Error>;
}
