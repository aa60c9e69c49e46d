//! Connection lifecycle contract between the pool and the connections it
//! manages.

use async_trait::async_trait;
use tokio::time::Instant;

/// Stable identity of a physical connection.
pub type ConnectionId = u64;

/// Result of a liveness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckResult {
    /// The server answered.
    Healthy,
    /// The link is unusable.
    Unhealthy(String),
}

impl HealthCheckResult {
    /// Whether the probe succeeded.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Which pool set a connection currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// In the idle set.
    Idle,
    /// In the checked-out set.
    InUse,
}

/// Pool bookkeeping for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Connection id.
    pub id: ConnectionId,
    /// Start of the current idle-lifetime clock. Reset on every checkin.
    pub created_at: Instant,
    /// Number of times the connection was handed out.
    pub checkouts: u64,
    /// Current set.
    pub state: ConnectionState,
}

impl ConnectionMetadata {
    /// Metadata for a connection created for immediate checkout.
    #[must_use]
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            checkouts: 0,
            state: ConnectionState::InUse,
        }
    }

    /// When the connection expires, given an idle lifetime.
    #[must_use]
    pub fn expires_at(&self, lifetime: std::time::Duration) -> Instant {
        self.created_at + lifetime
    }

    /// Whether the connection is past its idle lifetime at `now`.
    #[must_use]
    pub fn is_expired(&self, lifetime: std::time::Duration, now: Instant) -> bool {
        now > self.expires_at(lifetime)
    }
}

/// Operations the pool needs from a managed connection.
#[async_trait]
pub trait ConnectionLifecycle: Send + Sync + 'static {
    /// Stable id of this connection.
    fn connection_id(&self) -> ConnectionId;

    /// No-op server round trip.
    async fn health_check(&self) -> HealthCheckResult;

    /// Close the link. Must not fail; errors are logged by the implementor.
    async fn disconnect(&self);
}

/// Opens new connections for a pool.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Connection type produced.
    type Connection: ConnectionLifecycle;
    /// Error returned when opening fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new pooled connection.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let meta = ConnectionMetadata::new(1);
        let lifetime = Duration::from_secs(10);
        assert!(!meta.is_expired(lifetime, Instant::now()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(meta.is_expired(lifetime, Instant::now()));
    }
}
