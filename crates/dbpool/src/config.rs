//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Where and as whom the pool connects.
///
/// Passed explicitly to the pool at construction time; the pool keeps no
/// process-wide credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Server hostname or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub database: String,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
}

impl ConnectTarget {
    /// Create a new connection target.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// Validate that the required fields are present.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.host.trim().is_empty() {
            return Err(PoolError::Config("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(PoolError::Config("port must not be 0".into()));
        }
        if self.database.trim().is_empty() {
            return Err(PoolError::Config("database must not be empty".into()));
        }
        if self.user.trim().is_empty() {
            return Err(PoolError::Config("user must not be empty".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for a connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of connections, checked out and idle combined.
    pub max_connections: u32,

    /// Idle-reuse age limit, measured from connection creation.
    ///
    /// Checked only when a connection is handed back: a connection released
    /// at or past this age is closed instead of being pooled.
    pub ttl: Duration,

    /// Bound on how long [`Pool::acquire`](crate::Pool::acquire) waits for
    /// a connection. `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,

    /// Bound on a single driver connect attempt. `None` leaves it to the driver.
    pub connect_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            ttl: Duration::from_secs(100),
            acquire_timeout: Some(Duration::from_secs(30)),
            connect_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the connection time-to-live.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the acquisition wait bound.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Wait indefinitely for a connection when the pool is exhausted.
    #[must_use]
    pub fn no_acquire_timeout(mut self) -> Self {
        self.acquire_timeout = None;
        self
    }

    /// Set the connect attempt bound.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.ttl.is_zero() {
            return Err(PoolError::Config("ttl must be greater than 0".into()));
        }
        if self.acquire_timeout.is_some_and(|t| t.is_zero()) {
            return Err(PoolError::Config(
                "acquire_timeout must be greater than 0".into(),
            ));
        }
        if self.connect_timeout.is_some_and(|t| t.is_zero()) {
            return Err(PoolError::Config(
                "connect_timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.ttl, Duration::from_secs(100));
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_values() {
        assert!(PoolConfig::new().max_connections(0).validate().is_err());
        assert!(PoolConfig::new().ttl(Duration::ZERO).validate().is_err());
        assert!(
            PoolConfig::new()
                .acquire_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            PoolConfig::new()
                .connect_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_config_unbounded_acquire() {
        let config = PoolConfig::new().no_acquire_timeout();
        assert_eq!(config.acquire_timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_target_validation() {
        let target = ConnectTarget::new("127.0.0.1", 5432, "app", "app_user", "secret");
        assert!(target.validate().is_ok());

        let mut missing_host = target.clone();
        missing_host.host = " ".into();
        assert!(missing_host.validate().is_err());

        let mut missing_db = target.clone();
        missing_db.database.clear();
        assert!(missing_db.validate().is_err());

        let mut bad_port = target;
        bad_port.port = 0;
        assert!(bad_port.validate().is_err());
    }

    #[test]
    fn test_target_debug_redacts_password() {
        let target = ConnectTarget::new("db.internal", 5432, "app", "app_user", "hunter2");
        let debug = format!("{target:?}");
        assert!(debug.contains("db.internal"));
        assert!(!debug.contains("hunter2"));
    }
}
