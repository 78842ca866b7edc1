//! Connection lifecycle tracking.
//!
//! Every pooled connection follows the same per-checkout state machine:
//!
//! ```text
//! Idle ──checkout──▶ CheckedOut ──release(ok, young)──▶ Idle
//!                         │
//!                         └──release(failed | expired)──▶ Retired
//! ```
//!
//! `Retired` is terminal.

use std::time::Duration;

use tokio::time::Instant;

/// Where a connection currently sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Sitting in the pool's free list.
    Idle,
    /// Held by exactly one caller.
    CheckedOut,
    /// Permanently closed.
    Retired,
}

impl ConnectionState {
    /// Whether the transition `self -> next` is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::CheckedOut)
                | (Self::CheckedOut, Self::Idle)
                | (Self::CheckedOut, Self::Retired)
                | (Self::Idle, Self::Retired)
        )
    }
}

/// Why a connection was retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireReason {
    /// The work performed on it failed.
    Failed,
    /// It was handed back at or past its TTL.
    Expired,
    /// The pool was shut down.
    PoolClosed,
    /// The holder dropped it without releasing it.
    Dropped,
}

impl RetireReason {
    /// Short label used in log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::PoolClosed => "pool_closed",
            Self::Dropped => "dropped",
        }
    }
}

impl std::fmt::Display for RetireReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping the pool keeps alongside each raw connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-unique connection id.
    pub id: u64,
    /// When the connection was opened. Never changes.
    pub created_at: Instant,
    /// When the connection was last checked out.
    pub last_checkout: Instant,
    /// How many times the connection has been checked out.
    pub checkout_count: u64,
    state: ConnectionState,
}

impl ConnectionMetadata {
    /// Metadata for a connection that was just opened for a caller.
    pub(crate) fn new_checked_out(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_checkout: now,
            checkout_count: 1,
            state: ConnectionState::CheckedOut,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Time since the connection was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the connection is still young enough to be pooled again.
    #[must_use]
    pub fn is_reusable(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }

    /// Whether the connection has been retired.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.state == ConnectionState::Retired
    }

    pub(crate) fn mark_checked_out(&mut self) {
        self.transition(ConnectionState::CheckedOut);
        self.last_checkout = Instant::now();
        self.checkout_count += 1;
    }

    pub(crate) fn mark_idle(&mut self) {
        self.transition(ConnectionState::Idle);
    }

    pub(crate) fn mark_retired(&mut self) {
        self.transition(ConnectionState::Retired);
    }

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid connection transition {:?} -> {:?}",
            self.state,
            next
        );
        if self.state.can_transition_to(next) {
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retired_is_terminal() {
        assert!(!ConnectionState::Retired.can_transition_to(ConnectionState::Idle));
        assert!(!ConnectionState::Retired.can_transition_to(ConnectionState::CheckedOut));
        assert!(ConnectionState::CheckedOut.can_transition_to(ConnectionState::Retired));
        assert!(ConnectionState::Idle.can_transition_to(ConnectionState::CheckedOut));
    }

    #[test]
    fn test_checkout_cycle() {
        let mut meta = ConnectionMetadata::new_checked_out(7);
        assert_eq!(meta.state(), ConnectionState::CheckedOut);
        assert_eq!(meta.checkout_count, 1);

        meta.mark_idle();
        assert_eq!(meta.state(), ConnectionState::Idle);

        meta.mark_checked_out();
        assert_eq!(meta.checkout_count, 2);

        meta.mark_retired();
        assert!(meta.is_retired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reusable_until_ttl() {
        let meta = ConnectionMetadata::new_checked_out(1);
        let ttl = Duration::from_secs(2);
        assert!(meta.is_reusable(ttl));

        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(meta.is_reusable(ttl));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!meta.is_reusable(ttl));
    }
}
