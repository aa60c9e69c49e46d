//! Forward-only readers over statement results.

use std::collections::VecDeque;
use std::sync::Arc;

use fb_protocol::WireValue;

use crate::connection::PhysicalConnection;
use crate::error::Result;
use crate::row::{Column, Row};
use crate::statement::{Statement, decode_row};
use crate::transaction::Transaction;

/// Rows of an executed statement, fetched in batches.
///
/// The reader borrows its statement. Call [`close`](Self::close) when done;
/// closing ends an implicit transaction. A reader dropped without closing
/// leaves the cursor open until [`Statement::close`] is called.
pub struct DataReader<'a> {
    statement: &'a mut Statement,
    conn: Arc<PhysicalConnection>,
    tx: Transaction,
    columns: Arc<[Column]>,
    buffer: VecDeque<Vec<WireValue>>,
    exhausted: bool,
    rows_read: u64,
}

impl<'a> DataReader<'a> {
    pub(crate) fn new(
        statement: &'a mut Statement,
        conn: Arc<PhysicalConnection>,
        tx: Transaction,
        output: Option<Vec<WireValue>>,
    ) -> Self {
        let columns: Arc<[Column]> = statement
            .column_info()
            .iter()
            .enumerate()
            .map(|(i, info)| Column::from_info(i, info))
            .collect();
        let buffer: VecDeque<_> = output.into_iter().collect();
        Self {
            statement,
            conn,
            tx,
            columns,
            buffer,
            exhausted: false,
            rows_read: 0,
        }
    }

    /// Result-set columns.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of columns.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    /// Rows returned so far.
    #[must_use]
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// The next row, or `None` at the end of the results.
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        let Some(values) = self.buffer.pop_front() else {
            return Ok(None);
        };

        let mut db = self.conn.wire().await?;
        let values = decode_row(
            &mut *db,
            self.tx.handle(),
            values,
            self.statement.column_info(),
        )
        .await?;
        drop(db);

        self.rows_read += 1;
        tracing::trace!(
            connection_id = self.conn.id(),
            row = self.rows_read,
            "row fetched"
        );
        Ok(Some(Row::new(Arc::clone(&self.columns), values)))
    }

    async fn fill(&mut self) -> Result<()> {
        let Some(handle) = self.statement.cursor_handle() else {
            self.exhausted = true;
            return Ok(());
        };
        let batch = self
            .conn
            .wire()
            .await?
            .fetch(handle, self.statement.fetch_size())
            .await?;
        if batch.is_empty() {
            self.exhausted = true;
        } else {
            self.buffer.extend(batch);
        }
        Ok(())
    }

    /// Read every remaining row, then close the reader.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        loop {
            match self.next_row().await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(e) => {
                    if let Err(close) = self.statement.close().await {
                        tracing::warn!(error = %close, "failed to close reader");
                    }
                    return Err(e);
                }
            }
        }
        self.close().await?;
        Ok(rows)
    }

    /// Close the cursor and end an implicit transaction.
    pub async fn close(self) -> Result<()> {
        self.statement.close().await
    }
}

impl std::fmt::Debug for DataReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataReader")
            .field("columns", &self.columns.len())
            .field("buffered", &self.buffer.len())
            .field("exhausted", &self.exhausted)
            .field("rows_read", &self.rows_read)
            .finish_non_exhaustive()
    }
}
