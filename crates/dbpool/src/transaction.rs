//! Scoped write transactions.

use futures_util::future::BoxFuture;

use crate::driver::{Driver, RawConnection};
use crate::error::PoolError;
use crate::lifecycle::ConnectionMetadata;
use crate::pool::{Pool, PooledConnection};

/// Handle to a pooled connection inside [`Pool::with_transaction`].
///
/// Commit and rollback are driven by the enclosing scope, not by the handle.
pub struct Transaction<'c, C: RawConnection> {
    conn: &'c mut C,
    metadata: ConnectionMetadata,
}

impl<'c, C: RawConnection> Transaction<'c, C> {
    pub(crate) fn new(conn: &'c mut C, metadata: ConnectionMetadata) -> Self {
        Self { conn, metadata }
    }

    /// Execute a statement within the transaction.
    pub async fn execute(&mut self, statement: &str) -> Result<C::Output, C::Error> {
        tracing::trace!(
            connection_id = self.metadata.id,
            "executing statement in transaction"
        );
        self.conn.execute(statement).await
    }

    /// Metadata of the underlying pooled connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }
}

impl<C: RawConnection> std::fmt::Debug for Transaction<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("connection_id", &self.metadata.id)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Pool<D> {
    /// Run write work inside a transaction on a pooled connection.
    ///
    /// When `f` succeeds the transaction is committed and the connection goes
    /// back to the pool. When `f` fails, or the commit itself fails, the
    /// transaction is rolled back and the connection is retired. A rollback
    /// failure is logged and never replaces the error returned to the caller:
    /// that is `f`'s own error, or [`PoolError::CommitFailed`].
    ///
    /// If the returned future is dropped while the transaction is open, the
    /// connection is rolled back and retired in the background.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// pool.with_transaction(|mut tx| {
    ///     Box::pin(async move {
    ///         tx.execute("UPDATE accounts SET balance = balance - 10 WHERE id = 1")
    ///             .await
    ///             .map_err(PoolError::operation)?;
    ///         tx.execute("UPDATE accounts SET balance = balance + 10 WHERE id = 2")
    ///             .await
    ///             .map_err(PoolError::operation)
    ///     })
    /// })
    /// .await?;
    /// ```
    pub async fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(Transaction<'c, D::Connection>) -> BoxFuture<'c, Result<T, E>>,
        E: From<PoolError>,
    {
        let mut conn = self.acquire().await?;

        if let Err(e) = conn.begin().await {
            let err = PoolError::BeginFailed { source: e.into() };
            tracing::warn!(connection_id = conn.id(), error = %err, "begin failed");
            conn.release(false).await;
            return Err(err.into());
        }

        conn.set_in_transaction(true);
        let metadata = conn.metadata().clone();
        let result = f(Transaction::new(&mut *conn, metadata)).await;

        match result {
            Ok(value) => match conn.commit().await {
                Ok(()) => {
                    conn.set_in_transaction(false);
                    self.record(|m| m.commits += 1);
                    tracing::debug!(connection_id = conn.id(), "transaction committed");
                    conn.release(true).await;
                    Ok(value)
                }
                Err(e) => {
                    self.record(|m| m.commit_failures += 1);
                    let err = PoolError::CommitFailed { source: e.into() };
                    tracing::warn!(connection_id = conn.id(), error = %err, "commit failed");
                    self.rollback_quietly(&mut conn).await;
                    conn.set_in_transaction(false);
                    conn.release(false).await;
                    Err(err.into())
                }
            },
            Err(e) => {
                tracing::debug!(
                    connection_id = conn.id(),
                    "transaction body failed, rolling back"
                );
                self.rollback_quietly(&mut conn).await;
                conn.set_in_transaction(false);
                conn.release(false).await;
                Err(e)
            }
        }
    }

    /// Best-effort rollback; failures are logged and counted only.
    async fn rollback_quietly(&self, conn: &mut PooledConnection<D>) {
        self.record(|m| m.rollbacks += 1);
        if let Err(e) = conn.rollback().await {
            self.record(|m| m.rollback_failures += 1);
            let err = PoolError::RollbackFailed { source: e.into() };
            tracing::warn!(connection_id = conn.id(), error = %err, "rollback failed");
        }
    }
}
