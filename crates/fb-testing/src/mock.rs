//! In-memory wire layer.
//!
//! [`MockServer`] implements [`WireConnector`] without a network. Each
//! attach creates a link that records every call as a [`WireEvent`], so
//! tests can assert exactly which round trips the client made. Statement
//! behavior is scripted per SQL prefix with [`StatementScript`]; unscripted
//! text gets a statement type guessed from its first keyword.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fb_protocol::error::codes;
use fb_protocol::{
    AttachParams, BlobId, Charset, ColumnInfo, ExecuteOutcome, ParamDescriptor, ParamSlot,
    PreparedInfo, ProtocolError, SqlType, StatementHandle, StatementType, Tpb,
    TransactionFlags, TransactionHandle, WireConnector, WireDatabase, WireValue,
};
use parking_lot::Mutex;

/// One call made on a mock link.
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    /// Link attached.
    Attach {
        /// Host the client asked for.
        host: String,
        /// Database path.
        database: String,
    },
    /// Link detached.
    Detach,
    /// Liveness probe.
    Ping,
    /// Transaction started.
    Begin {
        /// New handle.
        tr: TransactionHandle,
        /// Flags of the parameter buffer.
        flags: TransactionFlags,
    },
    /// Commit.
    Commit {
        /// Handle.
        tr: TransactionHandle,
        /// Whether the handle stays usable.
        retaining: bool,
    },
    /// Rollback.
    Rollback {
        /// Handle.
        tr: TransactionHandle,
        /// Whether the handle stays usable.
        retaining: bool,
    },
    /// Statement handle allocated.
    Allocate(StatementHandle),
    /// SQL prepared.
    Prepare {
        /// Statement.
        stmt: StatementHandle,
        /// Transaction.
        tr: TransactionHandle,
        /// Text as sent.
        sql: String,
    },
    /// Input parameters described by the server.
    Describe(StatementHandle),
    /// Statement executed.
    Execute {
        /// Statement.
        stmt: StatementHandle,
        /// Transaction.
        tr: TransactionHandle,
        /// Bound input slots.
        params: Vec<ParamSlot>,
    },
    /// Rows fetched.
    Fetch {
        /// Statement.
        stmt: StatementHandle,
        /// Rows requested.
        count: u32,
    },
    /// Cursor closed.
    CloseCursor(StatementHandle),
    /// Statement handle freed.
    Free(StatementHandle),
    /// Large object created.
    CreateBlob {
        /// Transaction.
        tr: TransactionHandle,
        /// Content.
        data: Bytes,
    },
    /// Large object read.
    ReadBlob(BlobId),
    /// Plan requested.
    Plan(StatementHandle),
}

/// Scripted server behavior for statements whose text starts with a prefix.
#[derive(Debug, Clone)]
pub struct StatementScript {
    statement_type: StatementType,
    input_count: Option<usize>,
    columns: Vec<ColumnInfo>,
    rows: Vec<Vec<WireValue>>,
    output: Option<Vec<WireValue>>,
    records_affected: Option<i64>,
    described: Option<Vec<ParamSlot>>,
    plan: String,
    prepare_error: Option<ProtocolError>,
    execute_error: Option<ProtocolError>,
}

impl StatementScript {
    /// A script for a statement of the given type.
    #[must_use]
    pub fn new(statement_type: StatementType) -> Self {
        Self {
            statement_type,
            input_count: None,
            columns: Vec::new(),
            rows: Vec::new(),
            output: None,
            records_affected: None,
            described: None,
            plan: "PLAN NATURAL".into(),
            prepare_error: None,
            execute_error: None,
        }
    }

    /// A query returning `rows` with `columns`.
    #[must_use]
    pub fn select(columns: Vec<ColumnInfo>, rows: Vec<Vec<WireValue>>) -> Self {
        Self {
            columns,
            rows,
            ..Self::new(StatementType::Select)
        }
    }

    /// An `execute procedure` returning one output row.
    #[must_use]
    pub fn procedure(columns: Vec<ColumnInfo>, output: Vec<WireValue>) -> Self {
        Self {
            columns,
            output: Some(output),
            ..Self::new(StatementType::ExecProcedure)
        }
    }

    /// Override the number of input placeholders.
    #[must_use]
    pub fn inputs(mut self, count: usize) -> Self {
        self.input_count = Some(count);
        self
    }

    /// Slots returned when the client asks the server to describe inputs.
    #[must_use]
    pub fn described(mut self, slots: Vec<ParamSlot>) -> Self {
        self.input_count.get_or_insert(slots.len());
        self.described = Some(slots);
        self
    }

    /// Affected row count reported on execute.
    #[must_use]
    pub fn affects(mut self, rows: i64) -> Self {
        self.records_affected = Some(rows);
        self
    }

    /// Plan text.
    #[must_use]
    pub fn plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = plan.into();
        self
    }

    /// Fail every prepare of this statement.
    #[must_use]
    pub fn fail_prepare(mut self, error: ProtocolError) -> Self {
        self.prepare_error = Some(error);
        self
    }

    /// Fail every execute of this statement.
    #[must_use]
    pub fn fail_execute(mut self, error: ProtocolError) -> Self {
        self.execute_error = Some(error);
        self
    }
}

/// A result column for scripts.
#[must_use]
pub fn column(name: &str, sql_type: SqlType) -> ColumnInfo {
    ColumnInfo {
        name: name.to_owned(),
        sql_type,
        sub_type: 0,
        scale: 0,
        charset: Charset::UTF8,
        nullable: true,
    }
}

/// A DSQL error with the given message.
#[must_use]
pub fn dsql_error(message: &str) -> ProtocolError {
    ProtocolError::with_messages(
        codes::DSQL_ERROR,
        vec!["Dynamic SQL Error".into(), message.to_owned()],
    )
}

#[derive(Default)]
struct ServerState {
    events: Vec<(u32, WireEvent)>,
    scripts: Vec<(String, StatementScript)>,
    blobs: HashMap<BlobId, Bytes>,
    dead_links: HashSet<u32>,
    open_links: HashSet<u32>,
    refuse: Option<ProtocolError>,
    attach_delay: Option<Duration>,
    fail_commit: bool,
}

struct Shared {
    state: Mutex<ServerState>,
    next_link: AtomicU32,
    next_handle: AtomicU32,
    next_blob: AtomicU64,
}

/// A scriptable in-memory server.
///
/// Cloning yields another handle to the same server.
#[derive(Clone)]
pub struct MockServer {
    shared: Arc<Shared>,
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServer {
    /// A server with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ServerState::default()),
                next_link: AtomicU32::new(1),
                next_handle: AtomicU32::new(1),
                next_blob: AtomicU64::new(1),
            }),
        }
    }

    /// This server as a connector.
    #[must_use]
    pub fn connector(&self) -> Arc<dyn WireConnector> {
        Arc::new(self.clone())
    }

    /// A driver attached to this server.
    #[must_use]
    pub fn driver(&self) -> fb_client::Driver {
        fb_client::Driver::new(self.connector())
    }

    /// Script statements whose text starts with `prefix` (case-insensitive).
    /// Later scripts take precedence.
    pub fn script(&self, prefix: &str, script: StatementScript) {
        self.shared
            .state
            .lock()
            .scripts
            .push((prefix.trim().to_lowercase(), script));
    }

    /// Store a large object and return its id.
    pub fn add_blob(&self, data: impl Into<Bytes>) -> BlobId {
        let id = BlobId(self.shared.next_blob.fetch_add(1, Ordering::Relaxed));
        self.shared.state.lock().blobs.insert(id, data.into());
        id
    }

    /// Content of a large object.
    #[must_use]
    pub fn blob(&self, id: BlobId) -> Option<Bytes> {
        self.shared.state.lock().blobs.get(&id).cloned()
    }

    /// Refuse new attaches with `error`, or accept them again with `None`.
    pub fn refuse_connections(&self, error: Option<ProtocolError>) {
        self.shared.state.lock().refuse = error;
    }

    /// Delay every attach.
    pub fn set_attach_delay(&self, delay: Option<Duration>) {
        self.shared.state.lock().attach_delay = delay;
    }

    /// Fail every non-retaining commit.
    pub fn set_fail_commit(&self, fail: bool) {
        self.shared.state.lock().fail_commit = fail;
    }

    /// Make every call on `link` fail as if the network dropped.
    pub fn kill_link(&self, link: u32) {
        self.shared.state.lock().dead_links.insert(link);
    }

    /// Kill every currently open link.
    pub fn kill_all(&self) {
        let mut state = self.shared.state.lock();
        let open: Vec<u32> = state.open_links.iter().copied().collect();
        state.dead_links.extend(open);
    }

    /// Links attached and not yet detached.
    #[must_use]
    pub fn open_links(&self) -> usize {
        self.shared.state.lock().open_links.len()
    }

    /// Total links ever attached.
    #[must_use]
    pub fn attach_count(&self) -> usize {
        self.count(|e| matches!(e, WireEvent::Attach { .. }))
    }

    /// All recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<WireEvent> {
        self.shared
            .state
            .lock()
            .events
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Events recorded on one link.
    #[must_use]
    pub fn events_for(&self, link: u32) -> Vec<WireEvent> {
        self.shared
            .state
            .lock()
            .events
            .iter()
            .filter(|(l, _)| *l == link)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Number of events matching `pred`.
    #[must_use]
    pub fn count(&self, pred: impl Fn(&WireEvent) -> bool) -> usize {
        self.shared
            .state
            .lock()
            .events
            .iter()
            .filter(|(_, e)| pred(e))
            .count()
    }

    /// SQL texts prepared so far, in order.
    #[must_use]
    pub fn prepared_sql(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                WireEvent::Prepare { sql, .. } => Some(sql),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded events.
    pub fn clear_events(&self) {
        self.shared.state.lock().events.clear();
    }

    fn next_handle(&self) -> u32 {
        self.shared.next_handle.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl WireConnector for MockServer {
    async fn attach(&self, params: &AttachParams) -> Result<Box<dyn WireDatabase>, ProtocolError> {
        let delay = self.shared.state.lock().attach_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.shared.state.lock();
        if let Some(error) = &state.refuse {
            return Err(error.clone());
        }
        let link = self.shared.next_link.fetch_add(1, Ordering::Relaxed);
        state.open_links.insert(link);
        state.events.push((
            link,
            WireEvent::Attach {
                host: params.host.clone(),
                database: params.database.clone(),
            },
        ));
        tracing::trace!(link, "mock link attached");

        Ok(Box::new(MockDatabase {
            server: self.clone(),
            link,
            transactions: HashSet::new(),
            statements: HashMap::new(),
        }))
    }
}

#[derive(Default)]
struct MockStatement {
    script: Option<StatementScript>,
    inputs: usize,
    cursor: Option<VecDeque<Vec<WireValue>>>,
}

/// One link of a [`MockServer`].
pub struct MockDatabase {
    server: MockServer,
    link: u32,
    transactions: HashSet<TransactionHandle>,
    statements: HashMap<StatementHandle, MockStatement>,
}

impl MockDatabase {
    /// Link number, as used by [`MockServer::events_for`].
    #[must_use]
    pub fn link(&self) -> u32 {
        self.link
    }

    /// Record `event`, failing if the link was killed.
    fn record(&self, event: WireEvent) -> Result<(), ProtocolError> {
        let mut state = self.server.shared.state.lock();
        if state.dead_links.contains(&self.link) {
            return Err(ProtocolError::new(
                codes::CONNECTION_LOST,
                "connection lost to database",
            ));
        }
        state.events.push((self.link, event));
        Ok(())
    }

    fn check_transaction(&self, tr: TransactionHandle) -> Result<(), ProtocolError> {
        if self.transactions.contains(&tr) {
            Ok(())
        } else {
            Err(ProtocolError::new(
                codes::BAD_TRANS_HANDLE,
                "invalid transaction handle (expecting explicit transaction start)",
            ))
        }
    }

    fn statement(&mut self, stmt: StatementHandle) -> Result<&mut MockStatement, ProtocolError> {
        self.statements.get_mut(&stmt).ok_or_else(|| {
            ProtocolError::new(codes::DSQL_ERROR, "attempt to reference an unallocated statement")
        })
    }

    fn lookup_script(&self, sql: &str) -> StatementScript {
        let lowered = sql.trim().to_lowercase();
        let state = self.server.shared.state.lock();
        state
            .scripts
            .iter()
            .rev()
            .find(|(prefix, _)| lowered.starts_with(prefix.as_str()))
            .map(|(_, script)| script.clone())
            .unwrap_or_else(|| guess_script(&lowered))
    }
}

fn guess_script(sql: &str) -> StatementScript {
    let first = sql.split_whitespace().next().unwrap_or_default();
    let statement_type = match first {
        "select" => StatementType::Select,
        "insert" => StatementType::Insert,
        "update" => StatementType::Update,
        "delete" => StatementType::Delete,
        "execute" => StatementType::ExecProcedure,
        "savepoint" | "release" => StatementType::SavePoint,
        "rollback" if sql.contains("savepoint") => StatementType::SavePoint,
        "commit" => StatementType::Commit,
        "rollback" => StatementType::Rollback,
        _ => StatementType::Ddl,
    };
    StatementScript::new(statement_type)
}

/// Placeholders outside single-quoted literals.
fn count_placeholders(sql: &str) -> usize {
    let mut in_literal = false;
    let mut count = 0;
    for c in sql.chars() {
        match c {
            '\'' => in_literal = !in_literal,
            '?' if !in_literal => count += 1,
            _ => {}
        }
    }
    count
}

fn default_slot() -> ParamSlot {
    let mut slot = ParamSlot::new(SqlType::Varying, 0, 1024, Charset::UTF8);
    slot.set_nullable();
    slot
}

#[async_trait]
impl WireDatabase for MockDatabase {
    async fn detach(&mut self) -> Result<(), ProtocolError> {
        let result = self.record(WireEvent::Detach);
        self.server
            .shared
            .state
            .lock()
            .open_links
            .remove(&self.link);
        self.transactions.clear();
        self.statements.clear();
        result
    }

    async fn ping(&mut self) -> Result<(), ProtocolError> {
        self.record(WireEvent::Ping)
    }

    async fn begin_transaction(&mut self, tpb: &Tpb) -> Result<TransactionHandle, ProtocolError> {
        let tr = TransactionHandle(self.server.next_handle());
        self.record(WireEvent::Begin {
            tr,
            flags: tpb.flags(),
        })?;
        self.transactions.insert(tr);
        Ok(tr)
    }

    async fn commit(&mut self, tr: TransactionHandle, retaining: bool) -> Result<(), ProtocolError> {
        self.check_transaction(tr)?;
        self.record(WireEvent::Commit { tr, retaining })?;
        if !retaining {
            if self.server.shared.state.lock().fail_commit {
                return Err(ProtocolError::new(
                    codes::DEADLOCK,
                    "deadlock; update conflicts with concurrent update",
                ));
            }
            self.transactions.remove(&tr);
            for stmt in self.statements.values_mut() {
                stmt.cursor = None;
            }
        }
        Ok(())
    }

    async fn rollback(
        &mut self,
        tr: TransactionHandle,
        retaining: bool,
    ) -> Result<(), ProtocolError> {
        self.check_transaction(tr)?;
        self.record(WireEvent::Rollback { tr, retaining })?;
        if !retaining {
            self.transactions.remove(&tr);
            for stmt in self.statements.values_mut() {
                stmt.cursor = None;
            }
        }
        Ok(())
    }

    async fn allocate_statement(&mut self) -> Result<StatementHandle, ProtocolError> {
        let stmt = StatementHandle(self.server.next_handle());
        self.record(WireEvent::Allocate(stmt))?;
        self.statements.insert(stmt, MockStatement::default());
        Ok(stmt)
    }

    async fn prepare(
        &mut self,
        stmt: StatementHandle,
        tr: TransactionHandle,
        sql: &str,
        _dialect: u8,
    ) -> Result<PreparedInfo, ProtocolError> {
        self.check_transaction(tr)?;
        self.record(WireEvent::Prepare {
            stmt,
            tr,
            sql: sql.to_owned(),
        })?;
        let script = self.lookup_script(sql);
        if let Some(error) = &script.prepare_error {
            return Err(error.clone());
        }

        let info = PreparedInfo {
            statement_type: script.statement_type,
            input_count: script.input_count.unwrap_or_else(|| count_placeholders(sql)),
            columns: script.columns.clone(),
        };
        let entry = self.statement(stmt)?;
        entry.script = Some(script);
        entry.inputs = info.input_count;
        entry.cursor = None;
        Ok(info)
    }

    async fn describe_parameters(
        &mut self,
        stmt: StatementHandle,
    ) -> Result<ParamDescriptor, ProtocolError> {
        self.record(WireEvent::Describe(stmt))?;
        let entry = self.statement(stmt)?;
        let script = entry.script.as_ref().ok_or_else(|| {
            ProtocolError::new(codes::DSQL_ERROR, "statement is not prepared")
        })?;
        let slots = match &script.described {
            Some(slots) => slots.clone(),
            None => vec![default_slot(); entry.inputs],
        };
        Ok(ParamDescriptor::from_slots(slots))
    }

    async fn execute(
        &mut self,
        stmt: StatementHandle,
        tr: TransactionHandle,
        params: &ParamDescriptor,
    ) -> Result<ExecuteOutcome, ProtocolError> {
        self.check_transaction(tr)?;
        self.record(WireEvent::Execute {
            stmt,
            tr,
            params: params.slots().to_vec(),
        })?;
        let entry = self.statement(stmt)?;
        let script = entry.script.clone().ok_or_else(|| {
            ProtocolError::new(codes::DSQL_ERROR, "statement is not prepared")
        })?;
        if let Some(error) = script.execute_error {
            return Err(error);
        }
        if params.len() != entry.inputs {
            return Err(dsql_error("count of parameters does not match the statement"));
        }
        if entry.cursor.is_some() {
            return Err(ProtocolError::new(
                codes::DSQL_ERROR,
                "attempt to reopen an open cursor",
            ));
        }

        let returns_rows = script.statement_type.returns_rows();
        if returns_rows {
            entry.cursor = Some(script.rows.iter().cloned().collect());
        }
        let records_affected = script.records_affected.unwrap_or(match script.statement_type {
            StatementType::Insert | StatementType::Update | StatementType::Delete => 1,
            _ => -1,
        });
        Ok(ExecuteOutcome {
            records_affected,
            output: script.output,
        })
    }

    async fn fetch(
        &mut self,
        stmt: StatementHandle,
        count: u32,
    ) -> Result<Vec<Vec<WireValue>>, ProtocolError> {
        self.record(WireEvent::Fetch { stmt, count })?;
        let entry = self.statement(stmt)?;
        let cursor = entry.cursor.as_mut().ok_or_else(|| {
            ProtocolError::new(codes::DSQL_ERROR, "attempt to fetch from a closed cursor")
        })?;
        let take = cursor.len().min(count as usize);
        Ok(cursor.drain(..take).collect())
    }

    async fn close_cursor(&mut self, stmt: StatementHandle) -> Result<(), ProtocolError> {
        self.record(WireEvent::CloseCursor(stmt))?;
        self.statement(stmt)?.cursor = None;
        Ok(())
    }

    async fn free_statement(&mut self, stmt: StatementHandle) -> Result<(), ProtocolError> {
        self.record(WireEvent::Free(stmt))?;
        self.statements.remove(&stmt);
        Ok(())
    }

    async fn create_blob(
        &mut self,
        tr: TransactionHandle,
        data: &[u8],
    ) -> Result<BlobId, ProtocolError> {
        self.check_transaction(tr)?;
        let data = Bytes::copy_from_slice(data);
        self.record(WireEvent::CreateBlob {
            tr,
            data: data.clone(),
        })?;
        Ok(self.server.add_blob(data))
    }

    async fn read_blob(
        &mut self,
        tr: TransactionHandle,
        blob: BlobId,
    ) -> Result<Bytes, ProtocolError> {
        self.check_transaction(tr)?;
        self.record(WireEvent::ReadBlob(blob))?;
        self.server
            .blob(blob)
            .ok_or_else(|| ProtocolError::new(codes::DSQL_ERROR, "invalid BLOB ID"))
    }

    async fn execution_plan(&mut self, stmt: StatementHandle) -> Result<String, ProtocolError> {
        self.record(WireEvent::Plan(stmt))?;
        let entry = self.statement(stmt)?;
        entry
            .script
            .as_ref()
            .map(|s| s.plan.clone())
            .ok_or_else(|| ProtocolError::new(codes::DSQL_ERROR, "statement is not prepared"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_count_skips_literals() {
        assert_eq!(count_placeholders("select ? from t where a = '?' and b = ?"), 2);
        assert_eq!(count_placeholders("select 1"), 0);
    }

    #[test]
    fn test_guess_statement_type() {
        assert_eq!(
            guess_script("rollback work to savepoint a").statement_type,
            StatementType::SavePoint
        );
        assert_eq!(
            guess_script("insert into t values (?)").statement_type,
            StatementType::Insert
        );
        assert_eq!(guess_script("create table t (a int)").statement_type, StatementType::Ddl);
    }
}
