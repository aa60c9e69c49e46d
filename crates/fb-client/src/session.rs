//! Sessions.
//!
//! A [`Connection`] is the caller's handle on one physical connection,
//! drawn from a pool or opened directly when pooling is disabled. It
//! creates statements and explicit transactions, and on close hands the
//! physical connection back in a clean state.

use std::sync::Arc;

use fb_pool::Pool;

use crate::config::ConnectionOptions;
use crate::connection::{PhysicalConnection, PhysicalConnectionFactory};
use crate::driver::Driver;
use crate::error::{Result, StateError};
use crate::statement::Statement;
use crate::transaction::{Transaction, TransactionOptions};

/// A session on the server.
///
/// # Example
///
/// ```rust,ignore
/// let driver = Driver::new(connector);
/// let mut conn = driver
///     .open("DataSource=db.local;Database=/data/app.fdb;User=app;Password=secret")
///     .await?;
///
/// let mut stmt = conn.create_statement("SELECT count(*) FROM orders")?;
/// let count: i64 = fb_types::FromSql::from_sql(&stmt.execute_scalar().await?)?;
///
/// conn.close().await?;
/// ```
pub struct Connection {
    driver: Driver,
    options: Arc<ConnectionOptions>,
    pool: Option<Pool<PhysicalConnectionFactory>>,
    physical: Option<Arc<PhysicalConnection>>,
}

impl Connection {
    /// A closed session for `connection_string`.
    ///
    /// The string is parsed and validated here; nothing touches the network
    /// until [`open`](Self::open).
    pub fn new(driver: &Driver, connection_string: &str) -> Result<Self> {
        Self::with_options(driver, ConnectionOptions::parse(connection_string)?)
    }

    /// A closed session for already-built options.
    pub fn with_options(driver: &Driver, options: ConnectionOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            driver: driver.clone(),
            options: Arc::new(options),
            pool: None,
            physical: None,
        })
    }

    /// Options the session was created with.
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Acquire a physical connection. Opening an open session does nothing.
    pub async fn open(&mut self) -> Result<()> {
        if self.physical.is_some() {
            return Ok(());
        }
        let (physical, pool) = self.driver.acquire(&self.options).await?;
        tracing::debug!(connection_id = physical.id(), pooled = pool.is_some(), "session opened");
        self.physical = Some(physical);
        self.pool = pool;
        Ok(())
    }

    /// Whether the session holds a physical connection.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.physical.is_some()
    }

    /// Id of the physical connection, while open.
    #[must_use]
    pub fn connection_id(&self) -> Option<u64> {
        self.physical.as_ref().map(|p| p.id())
    }

    pub(crate) fn physical(&self) -> Result<&Arc<PhysicalConnection>> {
        self.physical
            .as_ref()
            .ok_or_else(|| StateError::NotConnected.into())
    }

    /// Create a statement on this session.
    pub fn create_statement(&self, text: impl Into<String>) -> Result<Statement> {
        Ok(Statement::with_connection(Arc::clone(self.physical()?), text))
    }

    /// Start a transaction at the session's configured isolation level.
    pub async fn begin_transaction(&self) -> Result<Transaction> {
        self.begin_transaction_with(TransactionOptions::new(self.options.isolation()))
            .await
    }

    /// Start a transaction with explicit options.
    ///
    /// Fails with [`StateError::TransactionActive`] while another transaction
    /// on the session is unfinished.
    pub async fn begin_transaction_with(&self, options: TransactionOptions) -> Result<Transaction> {
        self.physical()?.begin_transaction(options).await
    }

    /// The unfinished transaction, if any.
    #[must_use]
    pub fn current_transaction(&self) -> Option<Transaction> {
        self.physical.as_ref()?.current_transaction()
    }

    /// Release the physical connection.
    ///
    /// An unfinished transaction is rolled back and every statement is
    /// released. A pooled connection then goes back to its pool, or is
    /// discarded if the cleanup failed. Closing a closed session does
    /// nothing.
    pub async fn close(&mut self) -> Result<()> {
        let Some(physical) = self.physical.take() else {
            return Ok(());
        };
        let id = physical.id();
        let reset = reset(&physical).await;

        let result = match self.pool.take() {
            Some(pool) => {
                match &reset {
                    Ok(()) => pool.checkin(physical).await,
                    Err(e) => {
                        tracing::warn!(connection_id = id, error = %e, "discarding connection after failed reset");
                        pool.discard(physical).await;
                    }
                }
                reset
            }
            None => {
                let closed = physical.close().await;
                reset.and(closed)
            }
        };
        tracing::debug!(connection_id = id, "session closed");
        result
    }
}

async fn reset(physical: &PhysicalConnection) -> Result<()> {
    let rolled_back = physical.rollback_active().await;
    let released = physical.release_statements().await;
    rolled_back.and(released)
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("options", &self.options)
            .field("connection_id", &self.connection_id())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let Some(physical) = self.physical.take() else {
            return;
        };
        let pool = self.pool.take();
        tracing::warn!(
            connection_id = physical.id(),
            "connection dropped without close; cleaning up in the background"
        );

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let reset = reset(&physical).await;
                    match (pool, reset) {
                        (Some(pool), Ok(())) => pool.checkin(physical).await,
                        (Some(pool), Err(_)) => pool.discard(physical).await,
                        (None, _) => {
                            if let Err(e) = physical.close().await {
                                tracing::warn!(error = %e, "failed to close dropped connection");
                            }
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!("connection dropped outside a runtime; link not released");
            }
        }
    }
}
