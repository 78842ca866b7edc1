//! In-memory mock driver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dbpool::{ConnectTarget, Driver, RawConnection};
use parking_lot::Mutex;
use thiserror::Error;

/// Errors produced by the mock driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockError {
    /// Connection attempt refused.
    #[error("connection refused by mock server")]
    ConnectRefused,
    /// Statement rejected.
    #[error("statement rejected: {0}")]
    Statement(String),
    /// BEGIN rejected.
    #[error("begin rejected")]
    Begin,
    /// COMMIT rejected.
    #[error("commit rejected")]
    Commit,
    /// ROLLBACK rejected.
    #[error("rollback rejected")]
    Rollback,
    /// Close reported an error.
    #[error("close failed")]
    Close,
}

/// Something that happened on a mock connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// Connection opened.
    Connected(u64),
    /// Statement executed.
    Executed(u64, String),
    /// Transaction started.
    Began(u64),
    /// Transaction committed.
    Committed(u64),
    /// Transaction rolled back.
    RolledBack(u64),
    /// Connection closed through `close`.
    Closed(u64),
    /// Connection dropped without `close`.
    Dropped(u64),
}

/// Result of executing a statement on a mock connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockOutput {
    /// Connection the statement ran on.
    pub connection_id: u64,
    /// The statement text.
    pub statement: String,
}

/// Aggregate counts derived from the event log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    /// Successful connects.
    pub connects: usize,
    /// Failed connect attempts.
    pub connect_failures: usize,
    /// Successful commits.
    pub commits: usize,
    /// Rollback attempts, successful or not.
    pub rollbacks: usize,
    /// Explicit closes, successful or not.
    pub closes: usize,
    /// Connections dropped without being closed.
    pub drops: usize,
}

#[derive(Debug, Default)]
struct Script {
    refuse_connects: bool,
    refuse_next_connects: u32,
    connect_delay: Option<Duration>,
    close_delay: Option<Duration>,
    fail_statements: Vec<String>,
    fail_begin: bool,
    fail_commit: bool,
    fail_rollback: bool,
    fail_close: bool,
}

#[derive(Debug, Default)]
struct Shared {
    script: Mutex<Script>,
    events: Mutex<Vec<MockEvent>>,
    connect_failures: AtomicU32,
    rollback_attempts: AtomicU32,
    close_attempts: AtomicU32,
    next_id: AtomicU64,
    open: AtomicU32,
    peak_open: AtomicU32,
}

impl Shared {
    fn record(&self, event: MockEvent) {
        tracing::trace!(?event, "mock event");
        self.events.lock().push(event);
    }

    fn connection_gone(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A driver whose connections live in memory.
///
/// Cloning yields another handle to the same script and event log, so a test
/// can keep one handle while the pool owns the other.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    shared: Arc<Shared>,
}

impl MockDriver {
    /// Create a driver that accepts every operation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or accept again) every connection attempt.
    pub fn refuse_connects(&self, refuse: bool) {
        self.shared.script.lock().refuse_connects = refuse;
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_next_connects(&self, count: u32) {
        self.shared.script.lock().refuse_next_connects = count;
    }

    /// Delay every connection attempt by `delay`.
    pub fn connect_delay(&self, delay: Duration) {
        self.shared.script.lock().connect_delay = Some(delay);
    }

    /// Delay every `close` by `delay`. A close abandoned during the delay
    /// leaves the connection dropped rather than closed.
    pub fn close_delay(&self, delay: Duration) {
        self.shared.script.lock().close_delay = Some(delay);
    }

    /// Reject every statement containing `pattern`.
    pub fn fail_statements_containing(&self, pattern: impl Into<String>) {
        self.shared.script.lock().fail_statements.push(pattern.into());
    }

    /// Make `begin` fail.
    pub fn fail_begin(&self, fail: bool) {
        self.shared.script.lock().fail_begin = fail;
    }

    /// Make `commit` fail.
    pub fn fail_commits(&self, fail: bool) {
        self.shared.script.lock().fail_commit = fail;
    }

    /// Make `rollback` fail.
    pub fn fail_rollbacks(&self, fail: bool) {
        self.shared.script.lock().fail_rollback = fail;
    }

    /// Make `close` report an error. The connection still counts as closed.
    pub fn fail_closes(&self, fail: bool) {
        self.shared.script.lock().fail_close = fail;
    }

    /// Snapshot of the event log.
    #[must_use]
    pub fn events(&self) -> Vec<MockEvent> {
        self.shared.events.lock().clone()
    }

    /// Events recorded for one connection.
    #[must_use]
    pub fn events_for(&self, connection_id: u64) -> Vec<MockEvent> {
        self.shared
            .events
            .lock()
            .iter()
            .filter(|event| event_connection(event) == connection_id)
            .cloned()
            .collect()
    }

    /// Aggregate counts.
    #[must_use]
    pub fn stats(&self) -> MockStats {
        let events = self.shared.events.lock();
        let mut stats = MockStats {
            connect_failures: self.shared.connect_failures.load(Ordering::SeqCst) as usize,
            rollbacks: self.shared.rollback_attempts.load(Ordering::SeqCst) as usize,
            closes: self.shared.close_attempts.load(Ordering::SeqCst) as usize,
            ..MockStats::default()
        };
        for event in events.iter() {
            match event {
                MockEvent::Connected(_) => stats.connects += 1,
                MockEvent::Committed(_) => stats.commits += 1,
                MockEvent::Dropped(_) => stats.drops += 1,
                _ => {}
            }
        }
        stats
    }

    /// Connections currently open.
    #[must_use]
    pub fn open_connections(&self) -> u32 {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections observed.
    #[must_use]
    pub fn peak_open_connections(&self) -> u32 {
        self.shared.peak_open.load(Ordering::SeqCst)
    }
}

fn event_connection(event: &MockEvent) -> u64 {
    match event {
        MockEvent::Connected(id)
        | MockEvent::Executed(id, _)
        | MockEvent::Began(id)
        | MockEvent::Committed(id)
        | MockEvent::RolledBack(id)
        | MockEvent::Closed(id)
        | MockEvent::Dropped(id) => *id,
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Connection = MockConnection;
    type Error = MockError;

    async fn connect(&self, target: &ConnectTarget) -> Result<MockConnection, MockError> {
        let delay = self.shared.script.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let refused = {
            let mut script = self.shared.script.lock();
            if script.refuse_next_connects > 0 {
                script.refuse_next_connects -= 1;
                true
            } else {
                script.refuse_connects
            }
        };
        if refused {
            self.shared.connect_failures.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(host = %target.host, "mock connect refused");
            return Err(MockError::ConnectRefused);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let open = self.shared.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak_open.fetch_max(open, Ordering::SeqCst);
        self.shared.record(MockEvent::Connected(id));

        Ok(MockConnection {
            id,
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        })
    }
}

/// A connection opened by [`MockDriver`].
#[derive(Debug)]
pub struct MockConnection {
    id: u64,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl MockConnection {
    /// Driver-assigned connection id, starting at 1.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl RawConnection for MockConnection {
    type Output = MockOutput;
    type Error = MockError;

    async fn execute(&mut self, statement: &str) -> Result<MockOutput, MockError> {
        let rejected = self
            .shared
            .script
            .lock()
            .fail_statements
            .iter()
            .any(|pattern| statement.contains(pattern.as_str()));
        if rejected {
            return Err(MockError::Statement(statement.to_string()));
        }

        self.shared
            .record(MockEvent::Executed(self.id, statement.to_string()));
        Ok(MockOutput {
            connection_id: self.id,
            statement: statement.to_string(),
        })
    }

    async fn begin(&mut self) -> Result<(), MockError> {
        if self.shared.script.lock().fail_begin {
            return Err(MockError::Begin);
        }
        self.shared.record(MockEvent::Began(self.id));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), MockError> {
        if self.shared.script.lock().fail_commit {
            return Err(MockError::Commit);
        }
        self.shared.record(MockEvent::Committed(self.id));
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), MockError> {
        self.shared.rollback_attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.script.lock().fail_rollback {
            return Err(MockError::Rollback);
        }
        self.shared.record(MockEvent::RolledBack(self.id));
        Ok(())
    }

    async fn close(self) -> Result<(), MockError> {
        let delay = self.shared.script.lock().close_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.closed.store(true, Ordering::SeqCst);
        self.shared.close_attempts.fetch_add(1, Ordering::SeqCst);
        self.shared.connection_gone();
        self.shared.record(MockEvent::Closed(self.id));

        if self.shared.script.lock().fail_close {
            return Err(MockError::Close);
        }
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            self.shared.connection_gone();
            self.shared.record(MockEvent::Dropped(self.id));
        }
    }
}
