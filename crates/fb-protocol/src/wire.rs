//! The wire-layer capability contract.
//!
//! The client layer drives a server exclusively through these traits. An
//! implementation owns one authenticated link and hands out opaque handles
//! for transactions, statements and large objects; the client never sees
//! bytes on the socket.

use async_trait::async_trait;
use bytes::Bytes;

use crate::charset::Charset;
use crate::descriptor::{ParamDescriptor, WireValue};
use crate::error::ProtocolError;
use crate::sqltype::{SqlType, StatementType};
use crate::tpb::Tpb;

/// Handle of a started transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(pub u32);

/// Handle of an allocated statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementHandle(pub u32);

/// Id of a server-side large object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(pub u64);

/// Everything needed to attach to a database.
#[derive(Clone)]
pub struct AttachParams {
    /// Server host; empty for an embedded server.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database path or alias.
    pub database: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// SQL role, empty for none.
    pub role: String,
    /// Connection character set.
    pub charset: Charset,
    /// SQL dialect (1-3).
    pub dialect: u8,
    /// Network packet size.
    pub packet_size: u32,
    /// Whether to attach through an embedded server.
    pub embedded: bool,
}

impl std::fmt::Debug for AttachParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .field("charset", &self.charset)
            .field("dialect", &self.dialect)
            .field("embedded", &self.embedded)
            .finish()
    }
}

/// Metadata of one result column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    /// Column alias.
    pub name: String,
    /// Wire type.
    pub sql_type: SqlType,
    /// BLOB sub-type; zero for other types.
    pub sub_type: i16,
    /// Decimal scale.
    pub scale: i16,
    /// Character set of character columns.
    pub charset: Charset,
    /// Whether the column may contain NULL.
    pub nullable: bool,
}

/// What the server reports after preparing a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedInfo {
    /// Kind of statement.
    pub statement_type: StatementType,
    /// Number of input parameters.
    pub input_count: usize,
    /// Output columns (result set or procedure outputs).
    pub columns: Vec<ColumnInfo>,
}

/// What the server reports after executing a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOutcome {
    /// Affected row count, or -1 when not reported.
    pub records_affected: i64,
    /// Singleton output row of an `execute procedure`.
    pub output: Option<Vec<WireValue>>,
}

/// Opens links to a server.
#[async_trait]
pub trait WireConnector: Send + Sync {
    /// Attach to a database.
    async fn attach(&self, params: &AttachParams) -> Result<Box<dyn WireDatabase>, ProtocolError>;
}

/// One attached database link.
///
/// Calls on a single link are strictly sequential; callers serialize access.
#[async_trait]
pub trait WireDatabase: Send {
    /// Detach from the database and drop the link.
    async fn detach(&mut self) -> Result<(), ProtocolError>;

    /// No-op round trip used as a liveness probe.
    async fn ping(&mut self) -> Result<(), ProtocolError>;

    /// Start a transaction.
    async fn begin_transaction(&mut self, tpb: &Tpb) -> Result<TransactionHandle, ProtocolError>;

    /// Commit a transaction; `retaining` keeps the handle usable.
    async fn commit(&mut self, tr: TransactionHandle, retaining: bool) -> Result<(), ProtocolError>;

    /// Roll back a transaction; `retaining` keeps the handle usable.
    async fn rollback(
        &mut self,
        tr: TransactionHandle,
        retaining: bool,
    ) -> Result<(), ProtocolError>;

    /// Allocate a statement handle.
    async fn allocate_statement(&mut self) -> Result<StatementHandle, ProtocolError>;

    /// Prepare SQL text on an allocated statement.
    async fn prepare(
        &mut self,
        stmt: StatementHandle,
        tr: TransactionHandle,
        sql: &str,
        dialect: u8,
    ) -> Result<PreparedInfo, ProtocolError>;

    /// Ask the server to describe the input parameters.
    async fn describe_parameters(
        &mut self,
        stmt: StatementHandle,
    ) -> Result<ParamDescriptor, ProtocolError>;

    /// Execute a prepared statement with bound parameters.
    async fn execute(
        &mut self,
        stmt: StatementHandle,
        tr: TransactionHandle,
        params: &ParamDescriptor,
    ) -> Result<ExecuteOutcome, ProtocolError>;

    /// Fetch up to `count` rows; an empty batch means end of results.
    async fn fetch(
        &mut self,
        stmt: StatementHandle,
        count: u32,
    ) -> Result<Vec<Vec<WireValue>>, ProtocolError>;

    /// Close the open cursor, keeping the prepared statement.
    async fn close_cursor(&mut self, stmt: StatementHandle) -> Result<(), ProtocolError>;

    /// Free the statement handle.
    async fn free_statement(&mut self, stmt: StatementHandle) -> Result<(), ProtocolError>;

    /// Create a large object holding `data`.
    async fn create_blob(
        &mut self,
        tr: TransactionHandle,
        data: &[u8],
    ) -> Result<BlobId, ProtocolError>;

    /// Read a large object in full.
    async fn read_blob(&mut self, tr: TransactionHandle, blob: BlobId)
    -> Result<Bytes, ProtocolError>;

    /// Plan text of a prepared statement.
    async fn execution_plan(&mut self, stmt: StatementHandle) -> Result<String, ProtocolError>;
}
