//! Rows returned by a data reader.

use std::sync::Arc;

use fb_protocol::{ColumnInfo, SqlType};
use fb_types::{FromSql, SqlValue, TypeError};

/// A fetched row.
///
/// Rows from the same result set share their column metadata.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<SqlValue>,
}

/// Result-set column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name or alias.
    pub name: String,
    /// Zero-based position.
    pub index: usize,
    /// Wire type.
    pub sql_type: SqlType,
    /// Decimal scale (zero or negative).
    pub scale: i16,
    /// Whether the column is nullable.
    pub nullable: bool,
}

impl Column {
    pub(crate) fn from_info(index: usize, info: &ColumnInfo) -> Self {
        Self {
            name: info.name.clone(),
            index,
            sql_type: info.sql_type,
            scale: info.scale,
            nullable: info.nullable,
        }
    }

    /// SQL type name, e.g. `VARCHAR`.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        if self.scale < 0
            && matches!(self.sql_type, SqlType::Short | SqlType::Long | SqlType::Int64)
        {
            "NUMERIC"
        } else {
            self.sql_type.name()
        }
    }
}

impl Row {
    pub(crate) fn new(columns: Arc<[Column]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Get a value by column index.
    pub fn get<T: FromSql>(&self, index: usize) -> Result<T, TypeError> {
        self.values
            .get(index)
            .ok_or_else(|| TypeError::TypeMismatch {
                expected: "valid column index",
                actual: format!("index {index} out of bounds"),
            })
            .and_then(T::from_sql)
    }

    /// Get a value by column name (case-insensitive).
    pub fn get_by_name<T: FromSql>(&self, name: &str) -> Result<T, TypeError> {
        let index = self.position(name).ok_or_else(|| TypeError::TypeMismatch {
            expected: "valid column name",
            actual: format!("column '{name}' not found"),
        })?;
        self.get(index)
    }

    /// Get a value by index, or `None` if it is NULL, missing or
    /// not convertible.
    pub fn try_get<T: FromSql>(&self, index: usize) -> Option<T> {
        self.values
            .get(index)
            .and_then(|v| T::from_sql_nullable(v).ok().flatten())
    }

    /// Get a value by name, or `None` if it is NULL, missing or
    /// not convertible.
    pub fn try_get_by_name<T: FromSql>(&self, name: &str) -> Option<T> {
        self.try_get(self.position(name)?)
    }

    /// Raw value by index.
    #[must_use]
    pub fn get_raw(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column metadata.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Iterate over (column, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Column, &SqlValue)> {
        self.columns.iter().zip(self.values.iter())
    }
}

impl IntoIterator for Row {
    type Item = SqlValue;
    type IntoIter = std::vec::IntoIter<SqlValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = &'a SqlValue;
    type IntoIter = std::slice::Iter<'a, SqlValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}
