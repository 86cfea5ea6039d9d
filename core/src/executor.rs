//! The SQL executor seam.
//!
//! Everything in this crate talks to the database through [`SqlExecutor`].
//! Backends (see the `dbsnap-postgres` crate) own the connection, render
//! values as text, and supply the server's escaping rules; this crate only
//! decides *what* SQL to run.

use crate::error::DriverError;

/// Result column metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name as returned by the server.
    pub name: String,
    /// Storage type name (for example `int4`, `text`, `bool`).
    pub type_name: String,
}

impl Column {
    /// Creates a column descriptor.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Rows returned by [`SqlExecutor::query`].
///
/// Every value is rendered as text by the backend; `None` is SQL `NULL`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    /// Column metadata in select-list order.
    pub columns: Vec<Column>,
    /// Row values, each row aligned with [`columns`](Self::columns).
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    /// Creates a result from columns and rows.
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    /// Returns `true` if the query produced no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the index of the named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns the text value at `(row, column name)`, flattening `NULL`
    /// and unknown columns to `None`.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }
}

/// Blocking SQL execution against a single database session.
///
/// Implementations are used from one thread at a time and are expected to
/// hold exactly one live session. [`connect_to`](Self::connect_to) replaces
/// that session with one on another database of the same server, which is
/// how the production swap steps off the database it renames.
pub trait SqlExecutor {
    /// Executes one or more statements as a single batch, discarding rows.
    ///
    /// A batch must be all-or-nothing from the caller's point of view: when
    /// any statement fails the whole call fails.
    fn execute(&mut self, sql: &str) -> Result<(), DriverError>;

    /// Runs a single query and returns its rows with column type metadata.
    fn query(&mut self, sql: &str) -> Result<QueryResult, DriverError>;

    /// Quotes `value` as a string literal.
    fn escape_literal(&self, value: &str) -> String;

    /// Quotes `name` as an identifier.
    fn escape_identifier(&self, name: &str) -> String;

    /// Name of the database the current session is connected to.
    fn database(&self) -> &str;

    /// Drops the current session and opens a new one on `database`.
    fn connect_to(&mut self, database: &str) -> Result<(), DriverError>;
}

impl<E: SqlExecutor + ?Sized> SqlExecutor for &mut E {
    fn execute(&mut self, sql: &str) -> Result<(), DriverError> {
        (**self).execute(sql)
    }

    fn query(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        (**self).query(sql)
    }

    fn escape_literal(&self, value: &str) -> String {
        (**self).escape_literal(value)
    }

    fn escape_identifier(&self, name: &str) -> String {
        (**self).escape_identifier(name)
    }

    fn database(&self) -> &str {
        (**self).database()
    }

    fn connect_to(&mut self, database: &str) -> Result<(), DriverError> {
        (**self).connect_to(database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> QueryResult {
        QueryResult::new(
            vec![Column::new("id", "int4"), Column::new("name", "text")],
            vec![
                vec![Some("1".into()), Some("a".into())],
                vec![Some("2".into()), None],
            ],
        )
    }

    #[test]
    fn test_value_lookup_by_column_name() {
        let result = sample();
        assert_eq!(result.value(0, "name"), Some("a"));
        assert_eq!(result.value(1, "id"), Some("2"));
    }

    #[test]
    fn test_value_null_and_missing() {
        let result = sample();
        assert_eq!(result.value(1, "name"), None);
        assert_eq!(result.value(0, "missing"), None);
        assert_eq!(result.value(5, "id"), None);
    }

    #[test]
    fn test_empty_result() {
        assert!(QueryResult::default().is_empty());
        assert!(!sample().is_empty());
    }
}
