//! Scoped read sessions.

use futures_util::future::BoxFuture;

use crate::driver::{Driver, RawConnection};
use crate::error::PoolError;
use crate::lifecycle::ConnectionMetadata;
use crate::pool::Pool;

/// Read-only handle to a pooled connection inside [`Pool::with_session`].
///
/// Exposes statement execution but no transaction control.
pub struct Session<'c, C: RawConnection> {
    conn: &'c mut C,
    metadata: ConnectionMetadata,
}

impl<'c, C: RawConnection> Session<'c, C> {
    pub(crate) fn new(conn: &'c mut C, metadata: ConnectionMetadata) -> Self {
        Self { conn, metadata }
    }

    /// Execute a statement on the session's connection.
    pub async fn execute(&mut self, statement: &str) -> Result<C::Output, C::Error> {
        tracing::trace!(connection_id = self.metadata.id, "executing statement in session");
        self.conn.execute(statement).await
    }

    /// Metadata of the underlying pooled connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }
}

impl<C: RawConnection> std::fmt::Debug for Session<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.metadata.id)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Pool<D> {
    /// Run read-only work on a pooled connection.
    ///
    /// On success the connection goes back to the pool. If `f` fails the
    /// connection is retired and the error is returned unchanged.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let rows = pool
    ///     .with_session(|mut session| {
    ///         Box::pin(async move {
    ///             session.execute("SELECT id FROM users").await.map_err(PoolError::operation)
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_session<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(Session<'c, D::Connection>) -> BoxFuture<'c, Result<T, E>>,
        E: From<PoolError>,
    {
        let mut conn = self.acquire().await?;
        let metadata = conn.metadata().clone();

        let result = f(Session::new(&mut *conn, metadata)).await;

        if result.is_err() {
            tracing::debug!(
                connection_id = conn.id(),
                "session failed, retiring connection"
            );
        }
        conn.release(result.is_ok()).await;
        result
    }
}
