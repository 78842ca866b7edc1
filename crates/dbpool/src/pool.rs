//! Connection pool implementation.
//!
//! The pool hands out at most `max_connections` connections, creates them
//! lazily, recycles young connections on release and retires failed or
//! expired ones. Pool state lives behind a single mutex that is never held
//! across an `.await`: driver I/O (connect and close) always happens outside
//! the lock. Callers blocked on an exhausted pool park on a [`Notify`] and are
//! woken by the next release or retirement.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectTarget, PoolConfig};
use crate::driver::{Driver, RawConnection};
use crate::error::PoolError;
use crate::lifecycle::{ConnectionMetadata, ConnectionState, RetireReason};

/// A bounded pool of database connections.
///
/// Cloning a `Pool` is cheap and yields another handle to the same pool.
///
/// # Example
///
/// ```rust,ignore
/// use dbpool::{ConnectTarget, Pool};
/// use std::time::Duration;
///
/// let target = ConnectTarget::new("127.0.0.1", 5432, "app", "app_user", "secret");
/// let pool = Pool::builder(driver, target)
///     .max_connections(4)
///     .ttl(Duration::from_secs(100))
///     .build()?;
///
/// let conn = pool.acquire().await?;
/// // Use connection...
/// conn.release(true).await;
/// ```
pub struct Pool<D: Driver> {
    inner: Arc<PoolInner<D>>,
}

struct PoolInner<D: Driver> {
    driver: D,
    target: ConnectTarget,
    config: PoolConfig,

    /// Free list and active count.
    state: Mutex<PoolState<D::Connection>>,

    /// Signalled whenever a connection is released or a slot frees up.
    available: Notify,

    /// Whether the pool is closed.
    closed: AtomicBool,

    /// Counter for generating connection IDs.
    next_connection_id: AtomicU64,

    /// When the pool was created.
    created_at: Instant,

    /// Pool metrics.
    metrics: Mutex<PoolMetricsInner>,
}

struct PoolState<C> {
    /// Connections not currently checked out, most recently released last.
    free: Vec<IdleConnection<C>>,
    /// Connections that exist or are being opened, checked out and free.
    active: u32,
}

struct IdleConnection<C> {
    raw: C,
    metadata: ConnectionMetadata,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
pub(crate) struct PoolMetricsInner {
    pub(crate) connections_created: u64,
    pub(crate) connections_closed: u64,
    pub(crate) connections_expired: u64,
    pub(crate) connection_failures: u64,
    pub(crate) close_failures: u64,
    pub(crate) checkouts_successful: u64,
    pub(crate) checkouts_failed: u64,
    pub(crate) acquire_timeouts: u64,
    pub(crate) commits: u64,
    pub(crate) commit_failures: u64,
    pub(crate) rollbacks: u64,
    pub(crate) rollback_failures: u64,
}

enum Checkout<C> {
    Idle(IdleConnection<C>),
    Create,
    Exhausted,
}

impl<D: Driver> Pool<D> {
    /// Create a new pool builder for `driver` connecting to `target`.
    #[must_use]
    pub fn builder(driver: D, target: ConnectTarget) -> PoolBuilder<D> {
        PoolBuilder::new(driver, target)
    }

    /// Create a new pool with the given configuration.
    ///
    /// No connection is opened until the first acquisition.
    pub fn new(driver: D, target: ConnectTarget, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        target.validate()?;

        tracing::info!(
            host = %target.host,
            port = target.port,
            database = %target.database,
            max = config.max_connections,
            ttl_secs = config.ttl.as_secs_f64(),
            "connection pool created"
        );

        let inner = Arc::new(PoolInner {
            driver,
            target,
            config,
            state: Mutex::new(PoolState {
                free: Vec::new(),
                active: 0,
            }),
            available: Notify::new(),
            closed: AtomicBool::new(false),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
        });

        Ok(Self { inner })
    }

    /// Get a connection from the pool.
    ///
    /// Reuses an idle connection if there is one, otherwise opens a new
    /// connection if the pool is below capacity, otherwise waits for a
    /// release. The wait is bounded by [`PoolConfig::acquire_timeout`] when
    /// one is configured.
    pub async fn acquire(&self) -> Result<PooledConnection<D>, PoolError> {
        match self.inner.config.acquire_timeout {
            Some(timeout) => self.acquire_timeout(timeout).await,
            None => {
                let result = self.acquire_inner().await;
                self.record_checkout(result)
            }
        }
    }

    /// Get a connection, waiting at most `timeout`.
    pub async fn acquire_timeout(
        &self,
        timeout: Duration,
    ) -> Result<PooledConnection<D>, PoolError> {
        let result = match tokio::time::timeout(timeout, self.acquire_inner()).await {
            Ok(result) => result,
            Err(_) => {
                self.inner.metrics.lock().acquire_timeouts += 1;
                tracing::debug!(waited_ms = timeout.as_millis() as u64, "acquire timed out");
                Err(PoolError::PoolExhaustedTimeout { waited: timeout })
            }
        };
        self.record_checkout(result)
    }

    /// Get a connection, giving up as soon as `cancel` is triggered.
    ///
    /// Cancellation is reported as [`PoolError::PoolExhaustedTimeout`]. The
    /// configured acquire timeout does not apply here.
    pub async fn acquire_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PooledConnection<D>, PoolError> {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.inner.metrics.lock().acquire_timeouts += 1;
                tracing::debug!("acquire cancelled");
                Err(PoolError::PoolExhaustedTimeout { waited: started.elapsed() })
            }
            result = self.acquire_inner() => result,
        };
        self.record_checkout(result)
    }

    /// Get a connection only if that does not mean waiting for a release.
    ///
    /// Reuses an idle connection or opens a new one while the pool is below
    /// capacity. Returns `None` when the pool is exhausted.
    pub async fn try_acquire(&self) -> Result<Option<PooledConnection<D>>, PoolError> {
        let result = match self.inner.checkout() {
            Ok(Checkout::Idle(idle)) => Ok(Some(self.reuse(idle))),
            Ok(Checkout::Create) => self.open().await.map(Some),
            Ok(Checkout::Exhausted) => return Ok(None),
            Err(e) => Err(e),
        };

        let mut metrics = self.inner.metrics.lock();
        match &result {
            Ok(_) => metrics.checkouts_successful += 1,
            Err(_) => metrics.checkouts_failed += 1,
        }
        result
    }

    /// Hand a connection back to the pool.
    ///
    /// See [`PooledConnection::release`].
    pub async fn release(&self, conn: PooledConnection<D>, succeeded: bool) -> ConnectionState {
        conn.release(succeeded).await
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        let available = state.free.len() as u32;
        PoolStatus {
            available,
            in_use: state.active.saturating_sub(available),
            total: state.active,
            max: self.inner.config.max_connections,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            connections_expired: inner.connections_expired,
            connection_failures: inner.connection_failures,
            close_failures: inner.close_failures,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            acquire_timeouts: inner.acquire_timeouts,
            commits: inner.commits,
            commit_failures: inner.commit_failures,
            rollbacks: inner.rollbacks,
            rollback_failures: inner.rollback_failures,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Close the pool.
    ///
    /// Idle connections are closed, blocked acquirers are woken and fail with
    /// [`PoolError::PoolClosed`], and connections still checked out are
    /// retired when they are released.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // The slots go with the free list. A closed pool opens nothing new,
        // so the handles can be closed after the count drops.
        let idle = {
            let mut state = self.inner.state.lock();
            let idle = std::mem::take(&mut state.free);
            state.active = state.active.saturating_sub(idle.len() as u32);
            idle
        };
        self.inner.available.notify_waiters();

        let count = idle.len();
        for conn in idle {
            self.inner
                .dispose(conn.raw, conn.metadata, RetireReason::PoolClosed)
                .await;
        }

        tracing::info!(idle_closed = count, "connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the connection target.
    #[must_use]
    pub fn target(&self) -> &ConnectTarget {
        &self.inner.target
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut PoolMetricsInner)) {
        update(&mut self.inner.metrics.lock());
    }

    async fn acquire_inner(&self) -> Result<PooledConnection<D>, PoolError> {
        tracing::trace!("acquiring connection from pool");

        loop {
            // Register interest before inspecting the state so a release that
            // lands between the check and the wait is not missed.
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.inner.checkout()? {
                Checkout::Idle(idle) => return Ok(self.reuse(idle)),
                Checkout::Create => return self.open().await,
                Checkout::Exhausted => {
                    tracing::trace!(
                        max = self.inner.config.max_connections,
                        "pool exhausted, waiting for a release"
                    );
                    notified.await;
                }
            }
        }
    }

    fn reuse(&self, idle: IdleConnection<D::Connection>) -> PooledConnection<D> {
        let IdleConnection { raw, mut metadata } = idle;
        metadata.mark_checked_out();
        tracing::debug!(
            connection_id = metadata.id,
            age_ms = metadata.age().as_millis() as u64,
            "reusing idle connection"
        );
        PooledConnection::new(raw, metadata, Arc::clone(&self.inner))
    }

    /// Open a connection into a slot already counted in `active`.
    async fn open(&self) -> Result<PooledConnection<D>, PoolError> {
        let slot = SlotGuard::new(&self.inner);

        let connect = self.inner.driver.connect(&self.inner.target);
        let result = match self.inner.config.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(result) => result.map_err(PoolError::create_failed),
                Err(elapsed) => Err(PoolError::create_failed(elapsed)),
            },
            None => connect.await.map_err(PoolError::create_failed),
        };

        match result {
            Ok(raw) => {
                slot.keep();
                let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
                self.inner.metrics.lock().connections_created += 1;
                tracing::debug!(connection_id = id, "opened new connection");
                Ok(PooledConnection::new(
                    raw,
                    ConnectionMetadata::new_checked_out(id),
                    Arc::clone(&self.inner),
                ))
            }
            Err(e) => {
                self.inner.metrics.lock().connection_failures += 1;
                tracing::warn!(
                    host = %self.inner.target.host,
                    port = self.inner.target.port,
                    error = %e,
                    "failed to create connection"
                );
                Err(e)
            }
        }
    }

    fn record_checkout(
        &self,
        result: Result<PooledConnection<D>, PoolError>,
    ) -> Result<PooledConnection<D>, PoolError> {
        let mut metrics = self.inner.metrics.lock();
        match &result {
            Ok(_) => metrics.checkouts_successful += 1,
            Err(_) => metrics.checkouts_failed += 1,
        }
        result
    }
}

impl<D: Driver> PoolInner<D> {
    /// Decide, under the lock, how the next checkout is satisfied.
    fn checkout(&self) -> Result<Checkout<D::Connection>, PoolError> {
        loop {
            let mut state = self.state.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(PoolError::PoolClosed);
            }

            if let Some(idle) = state.free.pop() {
                drop(state);
                if idle.metadata.is_retired() {
                    tracing::warn!(
                        connection_id = idle.metadata.id,
                        "discarding retired connection found in free list"
                    );
                    continue;
                }
                return Ok(Checkout::Idle(idle));
            }

            if state.active < self.config.max_connections {
                state.active += 1;
                return Ok(Checkout::Create);
            }

            return Ok(Checkout::Exhausted);
        }
    }

    /// Put a released connection back in the free list or retire it.
    async fn give_back(
        &self,
        raw: D::Connection,
        mut metadata: ConnectionMetadata,
        succeeded: bool,
    ) -> ConnectionState {
        let reason = if !succeeded {
            Some(RetireReason::Failed)
        } else if !metadata.is_reusable(self.config.ttl) {
            Some(RetireReason::Expired)
        } else {
            None
        };

        let (raw, metadata, reason) = match reason {
            Some(reason) => (raw, metadata, reason),
            None => {
                let mut state = self.state.lock();
                if self.closed.load(Ordering::Acquire) {
                    drop(state);
                    (raw, metadata, RetireReason::PoolClosed)
                } else {
                    metadata.mark_idle();
                    tracing::debug!(
                        connection_id = metadata.id,
                        age_ms = metadata.age().as_millis() as u64,
                        "returning connection to pool"
                    );
                    state.free.push(IdleConnection { raw, metadata });
                    drop(state);
                    self.available.notify_one();
                    return ConnectionState::Idle;
                }
            }
        };

        self.retire(raw, metadata, reason).await;
        ConnectionState::Retired
    }

    /// Close a connection and give its slot back.
    ///
    /// The slot is released even if `close` fails or this future is dropped.
    async fn retire(
        &self,
        raw: D::Connection,
        metadata: ConnectionMetadata,
        reason: RetireReason,
    ) {
        let _slot = SlotGuard::new(self);
        self.dispose(raw, metadata, reason).await;
    }

    /// Close a connection whose slot is accounted for elsewhere.
    async fn dispose(
        &self,
        raw: D::Connection,
        mut metadata: ConnectionMetadata,
        reason: RetireReason,
    ) {
        metadata.mark_retired();
        {
            let mut metrics = self.metrics.lock();
            metrics.connections_closed += 1;
            if reason == RetireReason::Expired {
                metrics.connections_expired += 1;
            }
        }
        tracing::debug!(
            connection_id = metadata.id,
            age_ms = metadata.age().as_millis() as u64,
            reason = %reason,
            "retiring connection"
        );

        if let Err(error) = raw.close().await {
            self.metrics.lock().close_failures += 1;
            tracing::warn!(
                connection_id = metadata.id,
                error = %error,
                "error closing connection"
            );
        }
    }

    /// Roll back a transaction whose scope was dropped mid-flight.
    async fn roll_back_abandoned(&self, raw: &mut D::Connection, connection_id: u64) {
        self.metrics.lock().rollbacks += 1;
        if let Err(error) = raw.rollback().await {
            self.metrics.lock().rollback_failures += 1;
            tracing::warn!(
                connection_id,
                error = %error,
                "rollback of abandoned transaction failed"
            );
        }
    }

    fn release_slot(&self) {
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        self.available.notify_one();
    }
}

impl<D: Driver> Drop for PoolInner<D> {
    fn drop(&mut self) {
        let idle = std::mem::take(&mut self.state.get_mut().free);
        if idle.is_empty() {
            return;
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                for conn in idle {
                    if let Err(error) = conn.raw.close().await {
                        tracing::debug!(
                            connection_id = conn.metadata.id,
                            error = %error,
                            "error closing idle connection on pool drop"
                        );
                    }
                }
            });
        }
    }
}

/// A counted slot in `active` that is released on drop unless kept.
struct SlotGuard<'a, D: Driver> {
    pool: &'a PoolInner<D>,
    armed: bool,
}

impl<'a, D: Driver> SlotGuard<'a, D> {
    fn new(pool: &'a PoolInner<D>) -> Self {
        Self { pool, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl<D: Driver> Drop for SlotGuard<'_, D> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot();
        }
    }
}

impl<D: Driver> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Driver> std::fmt::Debug for Pool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("target", &self.inner.target)
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder(driver, target)
///     .max_connections(8)
///     .acquire_timeout(Duration::from_secs(5))
///     .build()?;
/// ```
pub struct PoolBuilder<D: Driver> {
    driver: D,
    target: ConnectTarget,
    pool_config: PoolConfig,
}

impl<D: Driver> PoolBuilder<D> {
    /// Create a new pool builder with default settings.
    pub fn new(driver: D, target: ConnectTarget) -> Self {
        Self {
            driver,
            target,
            pool_config: PoolConfig::default(),
        }
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.pool_config.max_connections = count;
        self
    }

    /// Set the connection time-to-live.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.pool_config.ttl = ttl;
        self
    }

    /// Set the acquisition wait bound.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.acquire_timeout = Some(timeout);
        self
    }

    /// Wait indefinitely when the pool is exhausted.
    #[must_use]
    pub fn no_acquire_timeout(mut self) -> Self {
        self.pool_config.acquire_timeout = None;
        self
    }

    /// Set the connect attempt bound.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.connect_timeout = Some(timeout);
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<Pool<D>, PoolError> {
        Pool::new(self.driver, self.target, self.pool_config)
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently checked out or being opened.
    pub in_use: u32,
    /// Total number of connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections retired since pool start. Includes handles dropped
    /// without `close` when no runtime was available to close them.
    pub connections_closed: u64,
    /// Connections retired because they outlived the TTL.
    pub connections_expired: u64,
    /// Connection attempts that failed.
    pub connection_failures: u64,
    /// Retirements whose `close` reported an error.
    pub close_failures: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (timeouts, pool closed, connect errors).
    pub checkouts_failed: u64,
    /// Checkouts that gave up waiting.
    pub acquire_timeouts: u64,
    /// Transactions committed.
    pub commits: u64,
    /// Commits that failed.
    pub commit_failures: u64,
    /// Rollbacks attempted.
    pub rollbacks: u64,
    /// Rollbacks that failed.
    pub rollback_failures: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate commit success rate (0.0 to 1.0).
    #[must_use]
    pub fn commit_success_rate(&self) -> f64 {
        let total = self.commits + self.commit_failures;
        if total == 0 {
            return 1.0;
        }
        self.commits as f64 / total as f64
    }
}

/// A connection retrieved from the pool.
///
/// Hand it back with [`release`](PooledConnection::release). A connection
/// dropped without being released is treated as failed and retired.
/// Use [`detach()`](PooledConnection::detach) to take it out of the pool.
pub struct PooledConnection<D: Driver> {
    /// Always `Some` until the connection is released, detached or dropped.
    raw: Option<D::Connection>,
    metadata: ConnectionMetadata,
    pool: Arc<PoolInner<D>>,
    /// Set while a scoped transaction is open on this connection.
    in_transaction: bool,
}

impl<D: Driver> PooledConnection<D> {
    fn new(raw: D::Connection, metadata: ConnectionMetadata, pool: Arc<PoolInner<D>>) -> Self {
        Self {
            raw: Some(raw),
            metadata,
            pool,
            in_transaction: false,
        }
    }

    pub(crate) fn set_in_transaction(&mut self, open: bool) {
        self.in_transaction = open;
    }

    /// Get the connection metadata.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Pool-unique id of this connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.metadata.id
    }

    /// Hand the connection back to the pool.
    ///
    /// If `succeeded` is false the connection is closed and its slot freed.
    /// Otherwise it is pooled again if it is younger than the TTL and closed
    /// if not. Returns the state the connection ended up in.
    pub async fn release(mut self, succeeded: bool) -> ConnectionState {
        let Some(raw) = self.raw.take() else {
            return ConnectionState::Retired;
        };
        let metadata = self.metadata.clone();
        let pool = Arc::clone(&self.pool);
        drop(self);

        pool.give_back(raw, metadata, succeeded).await
    }

    /// Detach the connection from the pool.
    ///
    /// The pool stops counting it and the caller becomes responsible for
    /// closing the returned raw connection.
    pub fn detach(mut self) -> D::Connection {
        let raw = match self.raw.take() {
            Some(raw) => raw,
            None => unreachable!("pooled connection used after release"),
        };
        tracing::debug!(connection_id = self.metadata.id, "detaching connection from pool");
        self.pool.release_slot();
        raw
    }
}

impl<D: Driver> Deref for PooledConnection<D> {
    type Target = D::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.raw {
            Some(raw) => raw,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<D: Driver> DerefMut for PooledConnection<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.raw {
            Some(raw) => raw,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<D: Driver> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };

        tracing::warn!(
            connection_id = self.metadata.id,
            "pooled connection dropped without release, retiring it"
        );

        let pool = Arc::clone(&self.pool);
        let metadata = self.metadata.clone();
        let in_transaction = self.in_transaction;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut raw = raw;
                    if in_transaction {
                        pool.roll_back_abandoned(&mut raw, metadata.id).await;
                    }
                    pool.retire(raw, metadata, RetireReason::Dropped).await;
                });
            }
            Err(_) => {
                // No runtime to close on: the handle is dropped unclosed.
                drop(raw);
                pool.metrics.lock().connections_closed += 1;
                pool.release_slot();
            }
        }
    }
}

impl<D: Driver> std::fmt::Debug for PooledConnection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, thiserror::Error)]
    #[error("stub failure")]
    struct StubError;

    #[derive(Default)]
    struct StubDriver {
        fail_connect: AtomicBool,
        opened: AtomicU32,
    }

    struct StubConnection;

    #[async_trait]
    impl Driver for StubDriver {
        type Connection = StubConnection;
        type Error = StubError;

        async fn connect(&self, _target: &ConnectTarget) -> Result<StubConnection, StubError> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(StubError);
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(StubConnection)
        }
    }

    #[async_trait]
    impl RawConnection for StubConnection {
        type Output = ();
        type Error = StubError;

        async fn execute(&mut self, _statement: &str) -> Result<(), StubError> {
            Ok(())
        }

        async fn commit(&mut self) -> Result<(), StubError> {
            Ok(())
        }

        async fn rollback(&mut self) -> Result<(), StubError> {
            Ok(())
        }

        async fn close(self) -> Result<(), StubError> {
            Ok(())
        }
    }

    fn target() -> ConnectTarget {
        ConnectTarget::new("localhost", 5432, "test", "tester", "secret")
    }

    fn pool(max: u32, ttl: Duration) -> Pool<StubDriver> {
        Pool::builder(StubDriver::default(), target())
            .max_connections(max)
            .ttl(ttl)
            .build()
            .unwrap()
    }

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 1,
            in_use: 1,
            total: 2,
            max: 4,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_status_at_capacity() {
        let status = PoolStatus {
            available: 0,
            in_use: 4,
            total: 4,
            max: 4,
        };
        assert!(status.is_at_capacity());

        let status2 = PoolStatus {
            available: 1,
            in_use: 1,
            total: 2,
            max: 4,
        };
        assert!(!status2.is_at_capacity());
    }

    #[test]
    fn test_pool_metrics_success_rates() {
        let metrics = PoolMetrics {
            connections_created: 10,
            connections_closed: 2,
            connections_expired: 1,
            connection_failures: 0,
            close_failures: 0,
            checkouts_successful: 90,
            checkouts_failed: 10,
            acquire_timeouts: 10,
            commits: 19,
            commit_failures: 1,
            rollbacks: 1,
            rollback_failures: 0,
            uptime: Duration::from_secs(3600),
        };

        assert!((metrics.checkout_success_rate() - 0.9).abs() < f64::EPSILON);
        assert!((metrics.commit_success_rate() - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_default() {
        let builder = PoolBuilder::new(StubDriver::default(), target());
        assert_eq!(builder.pool_config.max_connections, 4);
        assert_eq!(builder.pool_config.ttl, Duration::from_secs(100));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = Pool::builder(StubDriver::default(), target())
            .max_connections(0)
            .build();
        assert!(matches!(result, Err(PoolError::Config(_))));
    }

    #[tokio::test]
    async fn test_connections_created_lazily() {
        let pool = pool(4, Duration::from_secs(100));
        assert_eq!(pool.status().total, 0);
        assert_eq!(pool.inner.driver.opened.load(Ordering::SeqCst), 0);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.status().total, 1);
        assert_eq!(pool.status().in_use, 1);
        assert_eq!(conn.metadata().state(), ConnectionState::CheckedOut);
        conn.release(true).await;
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let pool = pool(4, Duration::from_secs(100));

        let conn = pool.acquire().await.unwrap();
        let id = conn.id();
        assert_eq!(pool.release(conn, true).await, ConnectionState::Idle);
        assert_eq!(pool.status().available, 1);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), id);
        assert_eq!(conn.metadata().checkout_count, 2);
        assert_eq!(pool.inner.driver.opened.load(Ordering::SeqCst), 1);
        conn.release(true).await;
    }

    #[tokio::test]
    async fn test_failed_release_retires_connection() {
        let pool = pool(4, Duration::from_secs(100));

        let conn = pool.acquire().await.unwrap();
        let id = conn.id();
        assert_eq!(conn.release(false).await, ConnectionState::Retired);
        assert_eq!(pool.status().total, 0);
        assert_eq!(pool.status().available, 0);

        let conn = pool.acquire().await.unwrap();
        assert_ne!(conn.id(), id);
        conn.release(true).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_connection_retired_on_release() {
        let pool = pool(4, Duration::from_secs(2));

        let conn = pool.acquire().await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(conn.release(true).await, ConnectionState::Retired);

        let metrics = pool.metrics();
        assert_eq!(metrics.connections_expired, 1);
        assert_eq!(pool.status().total, 0);
    }

    #[tokio::test]
    async fn test_create_failure_does_not_leak_slot() {
        let pool = pool(1, Duration::from_secs(100));
        pool.inner.driver.fail_connect.store(true, Ordering::SeqCst);

        let err = pool.acquire().await.unwrap_err();
        assert!(err.is_connection_failure());
        assert_eq!(pool.status().total, 0);
        assert_eq!(pool.metrics().connection_failures, 1);

        pool.inner.driver.fail_connect.store(false, Ordering::SeqCst);
        let conn = pool.acquire().await.unwrap();
        conn.release(true).await;
    }

    #[tokio::test]
    async fn test_try_acquire_opens_below_capacity() {
        let pool = pool(1, Duration::from_secs(100));

        let conn = pool.try_acquire().await.unwrap().unwrap();
        assert_eq!(pool.inner.driver.opened.load(Ordering::SeqCst), 1);
        assert!(pool.try_acquire().await.unwrap().is_none());
        conn.release(true).await;

        let conn = pool.try_acquire().await.unwrap().unwrap();
        assert_eq!(pool.status().available, 0);
        assert_eq!(pool.inner.driver.opened.load(Ordering::SeqCst), 1);
        conn.release(true).await;

        let metrics = pool.metrics();
        assert_eq!(metrics.checkouts_successful, 2);
        assert_eq!(metrics.checkouts_failed, 0);
    }

    #[tokio::test]
    async fn test_try_acquire_counts_closed_pool_as_failure() {
        let pool = pool(1, Duration::from_secs(100));
        pool.close().await;

        assert!(matches!(pool.try_acquire().await, Err(PoolError::PoolClosed)));
        assert_eq!(pool.metrics().checkouts_failed, 1);
    }

    #[test]
    fn test_drop_outside_runtime_frees_slot() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let pool = pool(1, Duration::from_secs(100));
        let conn = runtime.block_on(pool.acquire()).unwrap();

        drop(conn);
        assert_eq!(pool.status().total, 0);
        assert_eq!(pool.metrics().connections_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_pool_times_out() {
        let pool = pool(1, Duration::from_secs(100));
        let held = pool.acquire().await.unwrap();

        let err = pool
            .acquire_timeout(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(pool.metrics().acquire_timeouts, 1);
        assert_eq!(pool.status().total, 1);

        held.release(true).await;
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let pool = pool(2, Duration::from_secs(100));
        let conn = pool.acquire().await.unwrap();
        conn.release(true).await;

        pool.close().await;
        assert!(pool.is_closed());
        assert_eq!(pool.status().total, 0);
        assert!(matches!(pool.acquire().await, Err(PoolError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_detach_frees_slot() {
        let pool = pool(1, Duration::from_secs(100));
        let conn = pool.acquire().await.unwrap();
        let _raw = conn.detach();
        assert_eq!(pool.status().total, 0);

        let conn = pool.acquire().await.unwrap();
        conn.release(true).await;
    }
}
