//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Upper bound on the interval between idle-lifetime sweeps.
pub const MAX_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration of a single pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections kept even when idle past their lifetime.
    pub min_connections: u32,
    /// Upper bound on idle plus checked-out connections.
    pub max_connections: u32,
    /// Idle lifetime; zero disables lifetime eviction and the reaper.
    pub connection_lifetime: Duration,
    /// How long a checkout waits for capacity; zero waits indefinitely.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: 100,
            connection_lifetime: Duration::ZERO,
            acquire_timeout: Duration::from_secs(15),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the idle lifetime.
    #[must_use]
    pub fn connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.connection_lifetime = lifetime;
        self
    }

    /// Set the acquire timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Whether idle connections expire.
    #[must_use]
    pub fn idle_eviction_enabled(&self) -> bool {
        !self.connection_lifetime.is_zero()
    }

    /// Interval between reaper sweeps of this pool.
    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        self.connection_lifetime.min(MAX_REAP_INTERVAL)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::Config(
                "max_connections must be greater than zero".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 0);
        assert_eq!(config.max_connections, 100);
        assert!(!config.idle_eviction_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reap_interval_is_capped() {
        let short = PoolConfig::new().connection_lifetime(Duration::from_secs(5));
        assert_eq!(short.reap_interval(), Duration::from_secs(5));

        let long = PoolConfig::new().connection_lifetime(Duration::from_secs(600));
        assert_eq!(long.reap_interval(), MAX_REAP_INTERVAL);
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let config = PoolConfig::new().min_connections(5).max_connections(2);
        assert!(matches!(config.validate(), Err(PoolError::Config(_))));
        assert!(PoolConfig::new().max_connections(0).validate().is_err());
    }
}
