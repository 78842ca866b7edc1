//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Boxed error type used to carry driver and caller failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while acquiring or disposing pooled connections.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The driver could not establish a new connection.
    #[error("failed to create connection: {source}")]
    ConnectionCreateFailed {
        /// Underlying driver or timeout error.
        #[source]
        source: BoxError,
    },

    /// No connection became available within the allowed wait.
    #[error("timed out after {waited:?} waiting for a pooled connection")]
    PoolExhaustedTimeout {
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// Caller-supplied work inside a session or transaction failed.
    #[error("operation failed: {source}")]
    OperationFailed {
        /// The caller's failure.
        #[source]
        source: BoxError,
    },

    /// Starting a transaction failed.
    #[error("failed to begin transaction: {source}")]
    BeginFailed {
        /// Underlying driver error.
        #[source]
        source: BoxError,
    },

    /// Committing a transaction failed.
    #[error("failed to commit transaction: {source}")]
    CommitFailed {
        /// Underlying driver error.
        #[source]
        source: BoxError,
    },

    /// Rolling back a transaction failed.
    #[error("failed to roll back transaction: {source}")]
    RollbackFailed {
        /// Underlying driver error.
        #[source]
        source: BoxError,
    },

    /// The pool has been closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// Invalid pool configuration.
    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl PoolError {
    /// Wrap an arbitrary caller failure as [`PoolError::OperationFailed`].
    pub fn operation<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::OperationFailed { source: err.into() }
    }

    pub(crate) fn create_failed<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::ConnectionCreateFailed { source: err.into() }
    }

    /// Returns `true` if this error is an acquisition timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::PoolExhaustedTimeout { .. })
    }

    /// Returns `true` if the driver failed to establish a connection.
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::ConnectionCreateFailed { .. })
    }
}
