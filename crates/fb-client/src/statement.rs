//! Statements.
//!
//! A [`Statement`] holds SQL text, parameters and an optional explicit
//! transaction. It prepares lazily on first execution and re-prepares only
//! when its effective text changes.
//!
//! When no usable transaction is bound, execution starts an implicit one
//! that ends with the call, or when the reader is closed. It is committed
//! if the statement returns rows and rolled back otherwise, so writes that
//! must persist need an explicit transaction. Any failure rolls back.
//!
//! A failed commit falls back to a rollback. Failures while ending an
//! implicit transaction are logged and never replace the call's result.

use std::sync::Arc;

use fb_protocol::{
    Charset, ColumnInfo, ExecuteOutcome, ParamDescriptor, PreparedInfo, SqlType,
    StatementHandle, StatementType, TransactionHandle, WireDatabase, WireValue,
};
use fb_types::SqlValue;

use crate::connection::PhysicalConnection;
use crate::convert;
use crate::error::{Error, Result, StateError};
use crate::parameter::{ParameterCollection, ParameterDirection};
use crate::reader::DataReader;
use crate::session::Connection;
use crate::sql::{procedure_call_text, rewrite_named_parameters};
use crate::transaction::{Transaction, TransactionOptions};

/// Rows fetched per round trip when the statement has no connection yet.
pub const DEFAULT_FETCH_SIZE: u32 = 200;

/// How the command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandType {
    /// The text is SQL.
    #[default]
    Text,
    /// The text names a stored procedure.
    StoredProcedure,
}

/// Lifecycle state of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementState {
    /// Not prepared on the server.
    Unprepared,
    /// Prepared, not yet executed.
    Prepared,
    /// Executed; no cursor open.
    Executed,
    /// Executed with an open cursor.
    Fetching,
    /// Released, or its connection was closed.
    Closed,
}

/// Server-side state shared with the owning connection.
#[derive(Debug, Default)]
pub(crate) struct StatementCore {
    state: parking_lot::Mutex<CoreState>,
}

#[derive(Debug, Default)]
struct CoreState {
    handle: Option<StatementHandle>,
    cursor_open: bool,
    detached: bool,
}

impl StatementCore {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Cut the statement off from its connection and hand back its handle.
    pub(crate) fn detach(&self) -> Option<StatementHandle> {
        let mut state = self.state.lock();
        state.detached = true;
        state.cursor_open = false;
        state.handle.take()
    }

    fn is_detached(&self) -> bool {
        self.state.lock().detached
    }

    fn handle(&self) -> Option<StatementHandle> {
        self.state.lock().handle
    }

    fn set_handle(&self, handle: StatementHandle) {
        self.state.lock().handle = Some(handle);
    }

    fn take_handle(&self) -> Option<StatementHandle> {
        self.state.lock().handle.take()
    }

    fn cursor_open(&self) -> bool {
        self.state.lock().cursor_open
    }

    fn set_cursor_open(&self, open: bool) {
        self.state.lock().cursor_open = open;
    }
}

#[derive(Debug)]
struct Prepared {
    /// Text before placeholder rewriting; compared to detect changes.
    source: String,
    names: Vec<String>,
    info: PreparedInfo,
}

/// A SQL statement bound to a connection.
///
/// # Example
///
/// ```rust,ignore
/// let mut stmt = conn.create_statement("SELECT name FROM customers WHERE id = @id")?;
/// stmt.parameters_mut().add_with_value("@id", 42);
///
/// let mut reader = stmt.execute_reader().await?;
/// while let Some(row) = reader.next_row().await? {
///     let name: String = row.get(0)?;
/// }
/// reader.close().await?;
/// ```
pub struct Statement {
    core: Arc<StatementCore>,
    conn: Option<Arc<PhysicalConnection>>,
    text: String,
    command_type: CommandType,
    parameters: ParameterCollection,
    fetch_size: u32,
    transaction_id: Option<u64>,
    implicit: bool,
    prepared: Option<Prepared>,
    state: StatementState,
    records_affected: i64,
}

impl Statement {
    /// A statement with no connection. Call
    /// [`set_connection`](Self::set_connection) before executing it.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            core: StatementCore::new(),
            conn: None,
            text: text.into(),
            command_type: CommandType::Text,
            parameters: ParameterCollection::new(),
            fetch_size: DEFAULT_FETCH_SIZE,
            transaction_id: None,
            implicit: false,
            prepared: None,
            state: StatementState::Unprepared,
            records_affected: -1,
        }
    }

    pub(crate) fn with_connection(conn: Arc<PhysicalConnection>, text: impl Into<String>) -> Self {
        let mut stmt = Self::new(text);
        stmt.fetch_size = conn.options().fetch_batch();
        conn.register_statement(&stmt.core);
        stmt.conn = Some(conn);
        stmt
    }

    /// Command text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the command text.
    ///
    /// A statement prepared with different text frees its server handle
    /// first.
    pub async fn set_text(&mut self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        if text == self.text {
            return Ok(());
        }
        if self.core.cursor_open() {
            return Err(StateError::ReaderOpen.into());
        }
        self.free_handle().await?;
        self.prepared = None;
        self.text = text;
        self.state = StatementState::Unprepared;
        Ok(())
    }

    /// How the text is interpreted.
    #[must_use]
    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    /// Set how the text is interpreted.
    pub fn set_command_type(&mut self, command_type: CommandType) {
        self.command_type = command_type;
    }

    /// Parameters.
    #[must_use]
    pub fn parameters(&self) -> &ParameterCollection {
        &self.parameters
    }

    /// Mutable parameters.
    pub fn parameters_mut(&mut self) -> &mut ParameterCollection {
        &mut self.parameters
    }

    /// Rows fetched per round trip.
    #[must_use]
    pub fn fetch_size(&self) -> u32 {
        self.fetch_size
    }

    /// Set the rows fetched per round trip (at least one).
    pub fn set_fetch_size(&mut self, size: u32) {
        self.fetch_size = size.max(1);
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> StatementState {
        if self.core.is_detached() {
            StatementState::Closed
        } else {
            self.state
        }
    }

    /// Rows affected by the last execution, or -1 if unknown.
    #[must_use]
    pub fn records_affected(&self) -> i64 {
        self.records_affected
    }

    /// Kind of the prepared statement.
    #[must_use]
    pub fn statement_type(&self) -> Option<StatementType> {
        self.prepared.as_ref().map(|p| p.info.statement_type)
    }

    /// Whether the statement is prepared on the server.
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some() && self.core.handle().is_some()
    }

    /// Move the statement to another connection.
    ///
    /// Server resources held on the previous connection are freed, an
    /// implicit transaction there is rolled back and any bound transaction
    /// is dropped.
    pub async fn set_connection(&mut self, connection: &Connection) -> Result<()> {
        let physical = Arc::clone(connection.physical()?);
        if let Some(current) = &self.conn {
            if Arc::ptr_eq(current, &physical) && !self.core.is_detached() {
                return Ok(());
            }
        }
        if self.core.cursor_open() {
            return Err(StateError::ReaderOpen.into());
        }

        if let Err(e) = self.free_handle().await {
            tracing::warn!(error = %e, "failed to free statement on previous connection");
        }
        self.finish_implicit(false).await;
        if let Some(old) = self.conn.take() {
            old.unregister_statement(&self.core);
        }

        self.fetch_size = physical.options().fetch_batch();
        self.core = StatementCore::new();
        physical.register_statement(&self.core);
        self.conn = Some(physical);
        self.transaction_id = None;
        self.implicit = false;
        self.prepared = None;
        self.state = StatementState::Unprepared;
        Ok(())
    }

    /// The bound transaction, if it is still unfinished.
    #[must_use]
    pub fn transaction(&self) -> Option<Transaction> {
        let conn = self.conn.as_ref()?;
        conn.transaction_by_id(self.transaction_id?)
    }

    /// Bind an explicit transaction, or unbind with `None`.
    pub fn set_transaction(&mut self, transaction: Option<&Transaction>) -> Result<()> {
        if self.core.cursor_open() {
            return Err(StateError::ReaderOpen.into());
        }
        match transaction {
            None => self.transaction_id = None,
            Some(tx) => {
                let same = self
                    .conn
                    .as_ref()
                    .is_some_and(|c| Arc::ptr_eq(c, tx.connection()));
                if !same {
                    return Err(StateError::TransactionMismatch.into());
                }
                if tx.is_updated() {
                    return Err(StateError::TransactionFinalized.into());
                }
                self.transaction_id = Some(tx.id());
            }
        }
        self.implicit = false;
        Ok(())
    }

    fn connection(&self) -> Result<Arc<PhysicalConnection>> {
        match &self.conn {
            Some(conn) if !self.core.is_detached() => Ok(Arc::clone(conn)),
            _ => Err(StateError::NotConnected.into()),
        }
    }

    /// Prepare the statement on the server.
    ///
    /// Starts an implicit transaction if none is bound; it stays open until
    /// the next execution finishes.
    pub async fn prepare(&mut self) -> Result<()> {
        self.prepare_for(false).await
    }

    async fn prepare_for(&mut self, returns_set: bool) -> Result<()> {
        let conn = self.connection()?;
        if self.text.trim().is_empty() {
            return Err(StateError::EmptyCommandText.into());
        }
        if self.core.cursor_open() {
            return Err(StateError::ReaderOpen.into());
        }

        let tx = self.ensure_transaction(&conn).await?;
        let source = self.command_text(returns_set);
        if self.core.handle().is_some() && self.prepared.as_ref().is_some_and(|p| p.source == source)
        {
            return Ok(());
        }

        if let Err(e) = self.prepare_text(&conn, &tx, source).await {
            self.prepared = None;
            self.state = StatementState::Unprepared;
            if let Err(free_error) = self.free_handle().await {
                tracing::warn!(error = %free_error, "failed to free statement after failed prepare");
            }
            self.finish_implicit(false).await;
            return Err(e);
        }
        Ok(())
    }

    async fn ensure_transaction(&mut self, conn: &Arc<PhysicalConnection>) -> Result<Transaction> {
        if let Some(tx) = self.transaction() {
            return Ok(tx);
        }
        let tx = conn
            .begin_transaction(TransactionOptions::new(conn.options().isolation()))
            .await?;
        self.transaction_id = Some(tx.id());
        self.implicit = true;
        tracing::debug!(
            connection_id = conn.id(),
            transaction_id = tx.id(),
            "implicit transaction started"
        );
        Ok(tx)
    }

    fn command_text(&self, returns_set: bool) -> String {
        match self.command_type {
            CommandType::Text => self.text.clone(),
            CommandType::StoredProcedure => {
                let names: Vec<&str> = self
                    .parameters
                    .iter()
                    .filter(|p| p.direction().is_input())
                    .map(|p| p.name())
                    .collect();
                procedure_call_text(&self.text, &names, returns_set)
            }
        }
    }

    async fn prepare_text(
        &mut self,
        conn: &PhysicalConnection,
        tx: &Transaction,
        source: String,
    ) -> Result<()> {
        let (sql, names) = {
            let rewritten = rewrite_named_parameters(&source);
            (rewritten.sql.into_owned(), rewritten.names)
        };
        let mut db = conn.wire().await?;
        let handle = match self.core.handle() {
            Some(handle) => handle,
            None => {
                let handle = db.allocate_statement().await?;
                self.core.set_handle(handle);
                handle
            }
        };
        let info = db
            .prepare(handle, tx.handle(), &sql, conn.options().sql_dialect())
            .await?;
        drop(db);

        tracing::debug!(
            connection_id = conn.id(),
            statement_type = ?info.statement_type,
            inputs = info.input_count,
            sql = %sql,
            "statement prepared"
        );
        self.prepared = Some(Prepared {
            source,
            names,
            info,
        });
        self.state = StatementState::Prepared;
        Ok(())
    }

    /// Execute a statement that does not return rows.
    ///
    /// Returns the affected row count, or -1 if the server did not report
    /// one. Output parameters receive the values of an `execute procedure`.
    pub async fn execute_non_query(&mut self) -> Result<i64> {
        let (conn, tx, outcome) = self.run(false).await?;
        let mut result = self.apply_outputs(&conn, &tx, outcome.output).await;
        let closed = self.close_cursor().await;
        if result.is_ok() {
            result = closed;
        }

        match result {
            Ok(()) => {
                self.finish_implicit(self.returns_rows()).await;
                Ok(outcome.records_affected)
            }
            Err(e) => {
                self.finish_implicit(false).await;
                Err(e)
            }
        }
    }

    /// Execute and return a reader over the result set.
    ///
    /// The reader must be closed to end an implicit transaction.
    pub async fn execute_reader(&mut self) -> Result<DataReader<'_>> {
        let (conn, tx, outcome) = self.run(true).await?;
        if let Err(e) = self.apply_outputs(&conn, &tx, outcome.output.clone()).await {
            self.abort().await;
            return Err(e);
        }
        Ok(DataReader::new(self, conn, tx, outcome.output))
    }

    /// Execute and return the first column of the first row, or NULL.
    pub async fn execute_scalar(&mut self) -> Result<SqlValue> {
        let (conn, tx, outcome) = self.run(false).await?;
        match self.scalar_value(&conn, &tx, outcome.output).await {
            Ok(value) => {
                self.close().await?;
                Ok(value)
            }
            Err(e) => {
                self.abort().await;
                Err(e)
            }
        }
    }

    async fn scalar_value(
        &mut self,
        conn: &PhysicalConnection,
        tx: &Transaction,
        output: Option<Vec<WireValue>>,
    ) -> Result<SqlValue> {
        if let Some(values) = output {
            let decoded = self.decode(conn, tx, values).await?;
            self.assign_outputs(decoded.clone());
            return Ok(decoded.into_iter().next().unwrap_or_default());
        }

        let Some(handle) = self.cursor_handle() else {
            return Ok(SqlValue::Null);
        };
        let first = conn.wire().await?.fetch(handle, 1).await?.into_iter().next();
        match first {
            Some(values) => Ok(self
                .decode(conn, tx, values)
                .await?
                .into_iter()
                .next()
                .unwrap_or_default()),
            None => Ok(SqlValue::Null),
        }
    }

    async fn run(
        &mut self,
        returns_set: bool,
    ) -> Result<(Arc<PhysicalConnection>, Transaction, ExecuteOutcome)> {
        self.prepare_for(returns_set).await?;
        let conn = self.connection()?;
        let Some(tx) = self.transaction() else {
            return Err(StateError::TransactionFinalized.into());
        };

        match self.execute_prepared(&conn, &tx).await {
            Ok(outcome) => Ok((conn, tx, outcome)),
            Err(e) => {
                self.finish_implicit(false).await;
                Err(e)
            }
        }
    }

    async fn execute_prepared(
        &mut self,
        conn: &PhysicalConnection,
        tx: &Transaction,
    ) -> Result<ExecuteOutcome> {
        let handle = self.core.handle().ok_or(StateError::NotPrepared)?;
        let prepared = self.prepared.as_ref().ok_or(StateError::NotPrepared)?;
        let returns_rows = prepared.info.statement_type.returns_rows();

        let mut db = conn.wire().await?;
        let descriptor = self.bind(&mut *db, conn, tx, handle, prepared).await?;
        let outcome = db.execute(handle, tx.handle(), &descriptor).await?;
        drop(db);

        self.core.set_cursor_open(returns_rows);
        self.state = if returns_rows {
            StatementState::Fetching
        } else {
            StatementState::Executed
        };
        self.records_affected = outcome.records_affected;
        tracing::debug!(
            connection_id = conn.id(),
            records_affected = outcome.records_affected,
            "statement executed"
        );
        Ok(outcome)
    }

    /// Fill the input descriptor for one execution.
    async fn bind(
        &self,
        db: &mut dyn WireDatabase,
        conn: &PhysicalConnection,
        tx: &Transaction,
        handle: StatementHandle,
        prepared: &Prepared,
    ) -> Result<ParamDescriptor> {
        let count = prepared.info.input_count;
        if count == 0 {
            return Ok(ParamDescriptor::new());
        }

        let indices = self.slot_parameters(&prepared.names, count)?;
        let mut descriptor =
            match self.client_descriptor(&indices, conn.options().character_set()) {
                Some(descriptor) => descriptor,
                None => db.describe_parameters(handle).await?,
            };
        if descriptor.len() != count {
            return Err(Error::parameter(format!(
                "server described {} parameters but the statement has {count}",
                descriptor.len()
            )));
        }

        for (slot, &index) in descriptor.slots_mut().iter_mut().zip(&indices) {
            let Some(param) = self.parameters.get(index) else {
                continue;
            };
            let value = param.value();
            if value.is_null() {
                if param.direction() == ParameterDirection::InputOutput {
                    slot.set_nullable();
                }
                slot.set_null();
                continue;
            }
            let wire = if slot.sql_type() == Some(SqlType::Blob) {
                let data = convert::blob_bytes(value, slot)?;
                WireValue::Blob(db.create_blob(tx.handle(), &data).await?)
            } else {
                convert::to_wire(value, slot)?
            };
            slot.set_value(wire);
        }
        Ok(descriptor)
    }

    /// Parameter index for each input slot.
    fn slot_parameters(&self, names: &[String], count: usize) -> Result<Vec<usize>> {
        if !names.is_empty() {
            if names.len() != count {
                return Err(Error::parameter(
                    "statement mixes named and positional placeholders",
                ));
            }
            return names
                .iter()
                .map(|name| {
                    self.parameters.position(name).ok_or_else(|| {
                        Error::parameter(format!("no value supplied for parameter {name}"))
                    })
                })
                .collect();
        }

        let inputs = self.parameters.input_indices();
        if inputs.len() < count {
            return Err(Error::parameter(format!(
                "statement expects {count} parameters but {} were supplied",
                inputs.len()
            )));
        }
        Ok(inputs[..count].to_vec())
    }

    /// Descriptor built from declared parameter types, if every slot can be
    /// resolved locally.
    fn client_descriptor(&self, indices: &[usize], charset: Charset) -> Option<ParamDescriptor> {
        let slots = indices
            .iter()
            .map(|&i| {
                let param = self.parameters.get(i)?;
                if param.db_type().is_indeterminate() {
                    return None;
                }
                convert::client_slot(param, charset)
            })
            .collect::<Option<Vec<_>>>()?;
        Some(ParamDescriptor::from_slots(slots))
    }

    async fn decode(
        &self,
        conn: &PhysicalConnection,
        tx: &Transaction,
        values: Vec<WireValue>,
    ) -> Result<Vec<SqlValue>> {
        let mut db = conn.wire().await?;
        decode_row(&mut *db, tx.handle(), values, self.column_info()).await
    }

    async fn apply_outputs(
        &mut self,
        conn: &PhysicalConnection,
        tx: &Transaction,
        output: Option<Vec<WireValue>>,
    ) -> Result<()> {
        if let Some(values) = output {
            let decoded = self.decode(conn, tx, values).await?;
            self.assign_outputs(decoded);
        }
        Ok(())
    }

    fn assign_outputs(&mut self, values: Vec<SqlValue>) {
        for (index, value) in self.parameters.output_indices().into_iter().zip(values) {
            if let Some(param) = self.parameters.get_mut(index) {
                param.set_output(value);
            }
        }
    }

    pub(crate) fn column_info(&self) -> &[ColumnInfo] {
        self.prepared
            .as_ref()
            .map_or(&[], |p| p.info.columns.as_slice())
    }

    fn returns_rows(&self) -> bool {
        self.statement_type()
            .is_some_and(StatementType::returns_rows)
    }

    pub(crate) fn cursor_handle(&self) -> Option<StatementHandle> {
        if self.core.cursor_open() {
            self.core.handle()
        } else {
            None
        }
    }

    /// Close the open cursor and end an implicit transaction.
    ///
    /// The implicit transaction is committed if the statement returns rows
    /// and rolled back otherwise.
    pub async fn close(&mut self) -> Result<()> {
        let result = self.close_cursor().await;
        self.finish_implicit(self.returns_rows()).await;
        if self.state == StatementState::Fetching {
            self.state = StatementState::Executed;
        }
        result
    }

    async fn abort(&mut self) {
        if let Err(e) = self.close_cursor().await {
            tracing::warn!(error = %e, "failed to close cursor");
        }
        self.finish_implicit(false).await;
    }

    async fn close_cursor(&mut self) -> Result<()> {
        if !self.core.cursor_open() {
            return Ok(());
        }
        self.core.set_cursor_open(false);
        let (Some(conn), Some(handle)) = (&self.conn, self.core.handle()) else {
            return Ok(());
        };
        conn.wire().await?.close_cursor(handle).await?;
        Ok(())
    }

    async fn free_handle(&mut self) -> Result<()> {
        let Some(handle) = self.core.take_handle() else {
            return Ok(());
        };
        let Some(conn) = &self.conn else {
            return Ok(());
        };
        conn.wire().await?.free_statement(handle).await?;
        Ok(())
    }

    /// Close and free the server handle.
    ///
    /// The statement stays with its connection and can be prepared again
    /// until that connection is closed.
    pub async fn release(&mut self) -> Result<()> {
        let closed = self.close().await;
        let freed = self.free_handle().await;
        self.prepared = None;
        self.state = StatementState::Closed;
        closed.and(freed)
    }

    /// Request cancellation of a running execution.
    ///
    /// Not supported by the driver; always fails.
    pub fn cancel(&self) -> Result<()> {
        Err(Error::Unsupported("statement cancellation"))
    }

    /// Plan text of the prepared statement.
    pub async fn plan(&self) -> Result<String> {
        let handle = match (&self.prepared, self.core.handle()) {
            (Some(_), Some(handle)) => handle,
            _ => return Err(StateError::NotPrepared.into()),
        };
        let conn = self.connection()?;
        let plan = conn.wire().await?.execution_plan(handle).await?;
        Ok(plan)
    }

    async fn finish_implicit(&mut self, commit: bool) {
        if !self.implicit {
            return;
        }
        self.implicit = false;
        let tx = self.transaction();
        self.transaction_id = None;
        let Some(tx) = tx else {
            return;
        };

        let outcome = if commit {
            match tx.commit().await {
                Ok(()) => Ok(()),
                Err(e) => {
                    tracing::warn!(
                        transaction_id = tx.id(),
                        error = %e,
                        "implicit commit failed, rolling back"
                    );
                    tx.rollback().await
                }
            }
        } else {
            tx.rollback().await
        };

        match outcome {
            Ok(()) => tracing::debug!(
                transaction_id = tx.id(),
                committed = commit,
                "implicit transaction finished"
            ),
            Err(e) => {
                tracing::warn!(
                    transaction_id = tx.id(),
                    error = %e,
                    "failed to end implicit transaction"
                );
                tx.abandon();
            }
        }
    }
}

/// Decode a fetched row, reading large objects in full.
pub(crate) async fn decode_row(
    db: &mut dyn WireDatabase,
    tr: TransactionHandle,
    values: Vec<WireValue>,
    columns: &[ColumnInfo],
) -> Result<Vec<SqlValue>> {
    let mut row = Vec::with_capacity(values.len());
    for (value, column) in values.into_iter().zip(columns) {
        let value = match value {
            WireValue::Blob(blob) => convert::blob_value(db.read_blob(tr, blob).await?, column),
            other => convert::from_wire(other, column),
        };
        row.push(value);
    }
    Ok(row)
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("text", &self.text)
            .field("command_type", &self.command_type)
            .field("state", &self.state())
            .field("connection_id", &self.conn.as_ref().map(|c| c.id()))
            .field("transaction_id", &self.transaction_id)
            .field("implicit", &self.implicit)
            .finish_non_exhaustive()
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        let tx = if self.implicit { self.transaction() } else { None };
        let Some(conn) = self.conn.take() else {
            return;
        };
        conn.unregister_statement(&self.core);
        let handle = self.core.take_handle();
        if handle.is_none() && tx.is_none() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Some(tx) = tx {
                        if let Err(e) = tx.rollback().await {
                            tracing::warn!(error = %e, "failed to roll back dropped statement's transaction");
                            tx.abandon();
                        }
                    }
                    if let Some(handle) = handle {
                        if let Ok(mut db) = conn.wire().await {
                            if let Err(e) = db.free_statement(handle).await {
                                tracing::debug!(error = %e, "failed to free dropped statement");
                            }
                        }
                    }
                });
            }
            Err(_) => {
                tracing::warn!("statement dropped outside a runtime; server handle not freed");
            }
        }
    }
}
