//! Physical connections.
//!
//! A [`PhysicalConnection`] owns one attached wire link. Every call on the
//! link goes through [`PhysicalConnection::wire`], which serializes access.
//! The connection also tracks its single active transaction and the
//! statements prepared on it, so that closing the connection can release
//! them.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use fb_pool::{ConnectionFactory, ConnectionId, ConnectionLifecycle, HealthCheckResult};
use fb_protocol::error::codes;
use fb_protocol::{
    ParamDescriptor, ProtocolError, StatementHandle, TransactionHandle, WireConnector,
    WireDatabase,
};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::config::ConnectionOptions;
use crate::error::{Error, Result, StateError};
use crate::statement::StatementCore;
use crate::transaction::{IsolationLevel, Transaction, TransactionOptions};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

struct TransactionSlot {
    id: u64,
    handle: TransactionHandle,
    isolation: IsolationLevel,
    updated: Arc<AtomicBool>,
}

/// One attached link to the server.
pub struct PhysicalConnection {
    id: ConnectionId,
    options: Arc<ConnectionOptions>,
    db: Mutex<Option<Box<dyn WireDatabase>>>,
    active: parking_lot::Mutex<Option<TransactionSlot>>,
    statements: parking_lot::Mutex<Vec<Weak<StatementCore>>>,
    pooled: bool,
    opened_at: Instant,
}

impl PhysicalConnection {
    /// Attach to the server described by `options`.
    ///
    /// A non-zero connection timeout bounds the attach.
    pub(crate) async fn open(
        connector: &dyn WireConnector,
        options: Arc<ConnectionOptions>,
        pooled: bool,
    ) -> Result<Self> {
        let params = options.attach_params();
        let timeout = options.timeout();
        let attach = connector.attach(&params);
        let db = if timeout.is_zero() {
            attach.await?
        } else {
            tokio::time::timeout(timeout, attach).await.map_err(|_| {
                ProtocolError::new(
                    codes::NETWORK_ERROR,
                    format!("timed out after {timeout:?} connecting to {}", params.host),
                )
            })??
        };

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            connection_id = id,
            host = %params.host,
            database = %params.database,
            pooled,
            "connection opened"
        );

        Ok(Self {
            id,
            options,
            db: Mutex::new(Some(db)),
            active: parking_lot::Mutex::new(None),
            statements: parking_lot::Mutex::new(Vec::new()),
            pooled,
            opened_at: Instant::now(),
        })
    }

    /// Process-unique connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Options the connection was opened with.
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Whether the connection belongs to a pool.
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// When the link was attached.
    #[must_use]
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Exclusive access to the link.
    pub(crate) async fn wire(&self) -> Result<WireGuard<'_>> {
        let guard = self.db.lock().await;
        if guard.is_none() {
            return Err(StateError::NotConnected.into());
        }
        Ok(WireGuard(guard))
    }

    /// Start the connection's transaction.
    ///
    /// Fails with [`StateError::TransactionActive`] if one is already
    /// running.
    pub(crate) async fn begin_transaction(
        self: &Arc<Self>,
        options: TransactionOptions,
    ) -> Result<Transaction> {
        let mut db = self.wire().await?;
        if self.active.lock().is_some() {
            return Err(StateError::TransactionActive.into());
        }
        let handle = db.begin_transaction(&options.tpb()).await?;

        let id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        let updated = Arc::new(AtomicBool::new(false));
        *self.active.lock() = Some(TransactionSlot {
            id,
            handle,
            isolation: options.isolation_level,
            updated: Arc::clone(&updated),
        });
        drop(db);

        tracing::debug!(
            connection_id = self.id,
            transaction_id = id,
            isolation = %options.isolation_level,
            read_only = options.read_only,
            "transaction started"
        );
        Ok(Transaction::new(
            Arc::clone(self),
            id,
            handle,
            options.isolation_level,
            updated,
        ))
    }

    /// The unfinished transaction, if any.
    pub(crate) fn current_transaction(self: &Arc<Self>) -> Option<Transaction> {
        self.active.lock().as_ref().map(|slot| {
            Transaction::new(
                Arc::clone(self),
                slot.id,
                slot.handle,
                slot.isolation,
                Arc::clone(&slot.updated),
            )
        })
    }

    /// The unfinished transaction if its id is `id`.
    pub(crate) fn transaction_by_id(self: &Arc<Self>, id: u64) -> Option<Transaction> {
        self.current_transaction().filter(|tx| tx.id() == id)
    }

    /// Clear the active slot if it holds transaction `id`.
    pub(crate) fn finish_transaction(&self, id: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|slot| slot.id == id) {
            if let Some(slot) = active.take() {
                slot.updated.store(true, Ordering::Release);
            }
        }
    }

    /// Roll back the unfinished transaction, if any.
    pub(crate) async fn rollback_active(&self) -> Result<()> {
        let mut db = self.wire().await?;
        let Some(slot) = self.active.lock().take() else {
            return Ok(());
        };
        slot.updated.store(true, Ordering::Release);
        tracing::debug!(
            connection_id = self.id,
            transaction_id = slot.id,
            "rolling back unfinished transaction"
        );
        db.rollback(slot.handle, false).await?;
        Ok(())
    }

    pub(crate) fn register_statement(&self, core: &Arc<StatementCore>) {
        let mut statements = self.statements.lock();
        statements.retain(|s| s.strong_count() > 0);
        statements.push(Arc::downgrade(core));
    }

    pub(crate) fn unregister_statement(&self, core: &Arc<StatementCore>) {
        self.statements
            .lock()
            .retain(|s| s.upgrade().is_some_and(|s| !Arc::ptr_eq(&s, core)));
    }

    /// Detach every registered statement and free its server handle.
    ///
    /// All statements are released even if some fail; the first error is
    /// returned.
    pub(crate) async fn release_statements(&self) -> Result<()> {
        let cores: Vec<Arc<StatementCore>> = self
            .statements
            .lock()
            .drain(..)
            .filter_map(|s| s.upgrade())
            .collect();
        if cores.is_empty() {
            return Ok(());
        }

        let mut db = self.wire().await?;
        let mut first_error = None;
        for core in &cores {
            if let Some(handle) = core.detach() {
                if let Err(e) = db.free_statement(handle).await {
                    tracing::warn!(connection_id = self.id, error = %e, "failed to free statement");
                    first_error.get_or_insert(e);
                }
            }
        }
        tracing::debug!(
            connection_id = self.id,
            count = cores.len(),
            "statements released"
        );
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }

    /// Prepare and run `sql` once within `tr` on a temporary statement.
    pub(crate) async fn execute_immediate(&self, tr: TransactionHandle, sql: &str) -> Result<()> {
        let mut db = self.wire().await?;
        let stmt = db.allocate_statement().await?;
        let result = run_once(&mut *db, stmt, tr, sql, self.options.sql_dialect()).await;
        let freed = db.free_statement(stmt).await;
        result?;
        freed?;
        Ok(())
    }

    /// Detach from the server.
    ///
    /// Marks the active transaction finalized and detaches all statements;
    /// their server handles die with the link.
    pub(crate) async fn close(&self) -> Result<()> {
        let mut guard = self.db.lock().await;
        let Some(mut db) = guard.take() else {
            return Ok(());
        };
        if let Some(slot) = self.active.lock().take() {
            slot.updated.store(true, Ordering::Release);
        }
        for core in self.statements.lock().drain(..).filter_map(|s| s.upgrade()) {
            core.detach();
        }
        let result = db.detach().await;
        tracing::info!(connection_id = self.id, "connection closed");
        result.map_err(Error::from)
    }
}

/// Locked access to an attached link.
///
/// Only built by [`PhysicalConnection::wire`] after checking that the link
/// is still attached, and the lock keeps it that way.
pub(crate) struct WireGuard<'a>(MutexGuard<'a, Option<Box<dyn WireDatabase>>>);

impl Deref for WireGuard<'_> {
    type Target = dyn WireDatabase;

    #[allow(clippy::unreachable)]
    fn deref(&self) -> &Self::Target {
        match self.0.as_deref() {
            Some(db) => db,
            None => unreachable!("wire guard over a detached link"),
        }
    }
}

impl DerefMut for WireGuard<'_> {
    #[allow(clippy::unreachable)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.0.as_deref_mut() {
            Some(db) => db,
            None => unreachable!("wire guard over a detached link"),
        }
    }
}

async fn run_once(
    db: &mut dyn WireDatabase,
    stmt: StatementHandle,
    tr: TransactionHandle,
    sql: &str,
    dialect: u8,
) -> std::result::Result<(), ProtocolError> {
    db.prepare(stmt, tr, sql, dialect).await?;
    db.execute(stmt, tr, &ParamDescriptor::new()).await?;
    Ok(())
}

impl std::fmt::Debug for PhysicalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalConnection")
            .field("id", &self.id)
            .field("pooled", &self.pooled)
            .field(
                "active_transaction",
                &self.active.lock().as_ref().map(|slot| slot.id),
            )
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConnectionLifecycle for PhysicalConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    async fn health_check(&self) -> HealthCheckResult {
        let mut db = match self.wire().await {
            Ok(db) => db,
            Err(e) => return HealthCheckResult::Unhealthy(e.to_string()),
        };
        match db.ping().await {
            Ok(()) => HealthCheckResult::Healthy,
            Err(e) => HealthCheckResult::Unhealthy(e.to_string()),
        }
    }

    async fn disconnect(&self) {
        if let Err(e) = self.close().await {
            tracing::warn!(connection_id = self.id, error = %e, "error while disconnecting");
        }
    }
}

/// Opens pooled connections for one set of options.
pub struct PhysicalConnectionFactory {
    connector: Arc<dyn WireConnector>,
    options: Arc<ConnectionOptions>,
}

impl PhysicalConnectionFactory {
    pub(crate) fn new(connector: Arc<dyn WireConnector>, options: Arc<ConnectionOptions>) -> Self {
        Self { connector, options }
    }
}

#[async_trait]
impl ConnectionFactory for PhysicalConnectionFactory {
    type Connection = PhysicalConnection;
    type Error = Error;

    async fn connect(&self) -> Result<PhysicalConnection> {
        PhysicalConnection::open(&*self.connector, Arc::clone(&self.options), true).await
    }
}
