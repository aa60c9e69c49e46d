//! Transaction support.
//!
//! This module provides isolation levels, the mapping from an isolation
//! level to the server's transaction parameter buffer, savepoints, and the
//! [`Transaction`] handle itself.
//!
//! A connection carries at most one unfinished transaction. Committing or
//! rolling back marks the transaction as finalized and clears the
//! connection's active slot; statements that were bound to it then report
//! no transaction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fb_protocol::{TransactionFlags, TransactionHandle, Tpb};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::connection::PhysicalConnection;
use crate::error::{Error, Result, StateError};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Read uncommitted.
    ///
    /// Read-committed snapshot that always sees the latest committed record
    /// version instead of waiting on uncommitted ones.
    ReadUncommitted,

    /// Read committed (the default).
    ///
    /// Sees committed changes of other transactions; waits on records with
    /// uncommitted versions.
    #[default]
    ReadCommitted,

    /// Repeatable read.
    ///
    /// Snapshot isolation: the transaction sees the database as of its start.
    RepeatableRead,

    /// Serializable.
    ///
    /// Snapshot with table stability; tables read or written are protected
    /// from concurrent writers.
    Serializable,
}

impl IsolationLevel {
    /// The protocol flags that implement this level.
    #[must_use]
    pub fn flags(self) -> TransactionFlags {
        match self {
            Self::Serializable => TransactionFlags::CONSISTENCY,
            Self::RepeatableRead => TransactionFlags::CONCURRENCY,
            Self::ReadUncommitted => {
                TransactionFlags::READ_COMMITTED | TransactionFlags::REC_VERSION
            }
            Self::ReadCommitted => {
                TransactionFlags::READ_COMMITTED | TransactionFlags::NO_REC_VERSION
            }
        }
    }

    /// Get the isolation level name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "ReadUncommitted",
            Self::ReadCommitted => "ReadCommitted",
            Self::RepeatableRead => "RepeatableRead",
            Self::Serializable => "Serializable",
        }
    }

    /// Parse a level name. Case, spaces and underscores are ignored.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let folded: String = value
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match folded.as_str() {
            "readuncommitted" => Some(Self::ReadUncommitted),
            "readcommitted" => Some(Self::ReadCommitted),
            "repeatableread" => Some(Self::RepeatableRead),
            "serializable" => Some(Self::Serializable),
            _ => None,
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Options for starting a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    /// Isolation level.
    pub isolation_level: IsolationLevel,
    /// Start a read-only transaction.
    pub read_only: bool,
    /// Fail immediately on lock conflicts instead of waiting.
    pub no_wait: bool,
}

impl TransactionOptions {
    /// Options with the given isolation level.
    #[must_use]
    pub fn new(isolation_level: IsolationLevel) -> Self {
        Self {
            isolation_level,
            ..Self::default()
        }
    }

    /// Set read-only access.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set no-wait lock resolution.
    #[must_use]
    pub fn no_wait(mut self, no_wait: bool) -> Self {
        self.no_wait = no_wait;
        self
    }

    /// Build the transaction parameter buffer.
    #[must_use]
    pub fn tpb(&self) -> Tpb {
        let mut flags = self.isolation_level.flags();
        flags |= if self.read_only {
            TransactionFlags::READ
        } else {
            TransactionFlags::WRITE
        };
        flags |= if self.no_wait {
            TransactionFlags::NO_WAIT
        } else {
            TransactionFlags::WAIT
        };
        Tpb::new(flags)
    }
}

impl From<IsolationLevel> for TransactionOptions {
    fn from(level: IsolationLevel) -> Self {
        Self::new(level)
    }
}

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]{0,30}$").expect("identifier pattern is valid")
});

/// Check that `name` can be spliced into SQL as an unquoted identifier.
pub fn validate_identifier(name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_owned()))
    }
}

/// A savepoint within a transaction.
///
/// The name is validated when the savepoint is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavePoint {
    name: String,
}

impl SavePoint {
    /// Get the savepoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl AsRef<str> for SavePoint {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

/// A transaction on one physical connection.
///
/// Cloning yields another handle to the same server transaction.
///
/// # Example
///
/// ```rust,ignore
/// let tx = conn.begin_transaction().await?;
///
/// let mut stmt = conn.create_statement("INSERT INTO orders (customer) VALUES (@c)")?;
/// stmt.set_transaction(Some(&tx))?;
/// stmt.parameters_mut().add_with_value("@c", 42);
/// stmt.execute_non_query().await?;
///
/// let sp = tx.save("before_items").await?;
/// // ...
/// tx.rollback_to(&sp).await?;
/// tx.commit().await?;
/// ```
#[derive(Clone)]
pub struct Transaction {
    conn: Arc<PhysicalConnection>,
    id: u64,
    handle: TransactionHandle,
    isolation: IsolationLevel,
    updated: Arc<AtomicBool>,
}

impl Transaction {
    pub(crate) fn new(
        conn: Arc<PhysicalConnection>,
        id: u64,
        handle: TransactionHandle,
        isolation: IsolationLevel,
        updated: Arc<AtomicBool>,
    ) -> Self {
        Self {
            conn,
            id,
            handle,
            isolation,
            updated,
        }
    }

    /// Driver-assigned id, unique within the process.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the isolation level of this transaction.
    #[must_use]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    /// Whether the transaction was committed, rolled back or invalidated.
    #[must_use]
    pub fn is_updated(&self) -> bool {
        self.updated.load(Ordering::Acquire)
    }

    /// Id of the physical connection the transaction runs on.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.conn.id()
    }

    pub(crate) fn handle(&self) -> TransactionHandle {
        self.handle
    }

    pub(crate) fn connection(&self) -> &Arc<PhysicalConnection> {
        &self.conn
    }

    /// Give up on the transaction without a server round trip.
    pub(crate) fn abandon(&self) {
        self.updated.store(true, Ordering::Release);
        self.conn.finish_transaction(self.id);
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_updated() {
            Err(StateError::TransactionFinalized.into())
        } else {
            Ok(())
        }
    }

    /// Commit and finalize the transaction.
    pub async fn commit(&self) -> Result<()> {
        self.finish(true).await
    }

    /// Roll back and finalize the transaction.
    pub async fn rollback(&self) -> Result<()> {
        self.finish(false).await
    }

    async fn finish(&self, commit: bool) -> Result<()> {
        let mut db = self.conn.wire().await?;
        self.ensure_live()?;
        if commit {
            db.commit(self.handle, false).await?;
        } else {
            db.rollback(self.handle, false).await?;
        }
        drop(db);

        self.updated.store(true, Ordering::Release);
        self.conn.finish_transaction(self.id);
        tracing::debug!(
            connection_id = self.conn.id(),
            transaction_id = self.id,
            committed = commit,
            "transaction finished"
        );
        Ok(())
    }

    /// Commit the work done so far and keep the transaction open.
    pub async fn commit_retaining(&self) -> Result<()> {
        let mut db = self.conn.wire().await?;
        self.ensure_live()?;
        db.commit(self.handle, true).await?;
        tracing::debug!(transaction_id = self.id, "transaction committed (retaining)");
        Ok(())
    }

    /// Undo the work done so far and keep the transaction open.
    pub async fn rollback_retaining(&self) -> Result<()> {
        let mut db = self.conn.wire().await?;
        self.ensure_live()?;
        db.rollback(self.handle, true).await?;
        tracing::debug!(transaction_id = self.id, "transaction rolled back (retaining)");
        Ok(())
    }

    /// Create a savepoint.
    pub async fn save(&self, name: &str) -> Result<SavePoint> {
        validate_identifier(name)?;
        self.savepoint_command(&format!("SAVEPOINT {name}")).await?;
        Ok(SavePoint {
            name: name.to_owned(),
        })
    }

    /// Release a savepoint, keeping its changes.
    pub async fn release(&self, savepoint: impl AsRef<str>) -> Result<()> {
        let name = savepoint.as_ref();
        validate_identifier(name)?;
        self.savepoint_command(&format!("RELEASE SAVEPOINT {name}"))
            .await
    }

    /// Undo everything done after a savepoint.
    pub async fn rollback_to(&self, savepoint: impl AsRef<str>) -> Result<()> {
        let name = savepoint.as_ref();
        validate_identifier(name)?;
        self.savepoint_command(&format!("ROLLBACK WORK TO SAVEPOINT {name}"))
            .await
    }

    async fn savepoint_command(&self, sql: &str) -> Result<()> {
        self.ensure_live()?;
        tracing::debug!(transaction_id = self.id, sql, "savepoint command");
        self.conn.execute_immediate(self.handle, sql).await
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("connection_id", &self.conn.id())
            .field("isolation", &self.isolation)
            .field("updated", &self.is_updated())
            .finish()
    }
}
