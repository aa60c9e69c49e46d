//! The driver entry point.

use std::sync::Arc;

use fb_pool::{Pool, PoolError, PoolMetrics, PoolRegistry, PoolStatus};
use fb_protocol::WireConnector;

use crate::config::ConnectionOptions;
use crate::connection::{PhysicalConnection, PhysicalConnectionFactory};
use crate::error::{Error, Result};
use crate::session::Connection;

/// Opens sessions and owns their connection pools.
///
/// Cloning is cheap; clones share the same pools. Pools are keyed by the
/// normalized connection string, so strings that differ only in key
/// spelling, case or order share a pool.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    connector: Arc<dyn WireConnector>,
    pools: PoolRegistry<PhysicalConnectionFactory>,
}

impl Driver {
    /// A driver that attaches through `connector`.
    pub fn new(connector: Arc<dyn WireConnector>) -> Self {
        Self {
            inner: Arc::new(DriverInner {
                connector,
                pools: PoolRegistry::new(),
            }),
        }
    }

    /// Parse `connection_string` and open a session.
    pub async fn open(&self, connection_string: &str) -> Result<Connection> {
        let mut conn = Connection::new(self, connection_string)?;
        conn.open().await?;
        Ok(conn)
    }

    /// Tear down the pool for `connection_string`, closing its idle
    /// connections. Returns whether a pool existed.
    pub async fn clear_pool(&self, connection_string: &str) -> Result<bool> {
        let key = ConnectionOptions::parse(connection_string)?.pool_key();
        Ok(self.inner.pools.clear_pool(&key).await)
    }

    /// Tear down every pool.
    pub async fn clear_all_pools(&self) {
        self.inner.pools.clear_all().await;
    }

    /// Status of the pool for `connection_string`, if one exists.
    pub fn pool_status(&self, connection_string: &str) -> Result<Option<PoolStatus>> {
        Ok(self.pool_for(connection_string)?.map(|pool| pool.status()))
    }

    /// Metrics of the pool for `connection_string`, if one exists.
    pub fn pool_metrics(&self, connection_string: &str) -> Result<Option<PoolMetrics>> {
        Ok(self.pool_for(connection_string)?.map(|pool| pool.metrics()))
    }

    /// Number of live pools.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.inner.pools.len()
    }

    fn pool_for(&self, connection_string: &str) -> Result<Option<Pool<PhysicalConnectionFactory>>> {
        let key = ConnectionOptions::parse(connection_string)?.pool_key();
        Ok(self.inner.pools.get(&key))
    }

    /// Obtain a physical connection for `options`.
    ///
    /// A pool closed between lookup and checkout is replaced once.
    pub(crate) async fn acquire(
        &self,
        options: &Arc<ConnectionOptions>,
    ) -> Result<(
        Arc<PhysicalConnection>,
        Option<Pool<PhysicalConnectionFactory>>,
    )> {
        if !options.is_pooling() {
            let conn =
                PhysicalConnection::open(&*self.inner.connector, Arc::clone(options), false)
                    .await?;
            return Ok((Arc::new(conn), None));
        }

        let key = options.pool_key();
        for attempt in 0..2 {
            let pool = self
                .inner
                .pools
                .get_or_create(&key, options.pool_config(), || {
                    PhysicalConnectionFactory::new(
                        Arc::clone(&self.inner.connector),
                        Arc::clone(options),
                    )
                })?;
            match pool.checkout().await {
                Ok(conn) => return Ok((conn, Some(pool))),
                Err(PoolError::PoolClosed) if attempt == 0 => {
                    tracing::debug!(pool = %key, "pool closed during checkout, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::PoolClosed)
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("pools", &self.inner.pools.len())
            .finish_non_exhaustive()
    }
}
