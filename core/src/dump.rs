//! SQL dump generation from the live contents of eligible tables.
//!
//! A dump is an ordered list of statements that, replayed against a
//! database with the same schema, brings every eligible table and sequence
//! back to the state it had at generation time:
//!
//! 1. session settings that neutralize timeouts and disable triggers
//! 2. one `DELETE FROM` per table, all before any insert so that circular
//!    foreign keys cannot block the clear
//! 3. one multi-row `INSERT` per non-empty table, with explicit values
//!    for identity columns and none for stored generated columns
//! 4. a single `SELECT setval(...)` covering every sequence
//! 5. trigger behaviour restored for the rest of the session

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{DriverError, Result, SnapshotError};
use crate::executor::{QueryResult, SqlExecutor};
use crate::introspect::SchemaIntrospector;
use crate::value::ColumnKind;

const PREAMBLE: &[&str] = &[
    "SET statement_timeout = 0;",
    "SET lock_timeout = 0;",
    "SET idle_in_transaction_session_timeout = 0;",
    "SET client_encoding = 'UTF8';",
    "SET standard_conforming_strings = on;",
    "SET session_replication_role = replica;",
];

const POSTAMBLE: &[&str] = &["SET session_replication_role = DEFAULT;"];

/// A named, replayable capture of table and sequence contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    name: String,
    statements: Vec<String>,
    tables: Vec<String>,
    sequences: Vec<String>,
    captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Snapshot name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Statements in replay order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Tables cleared and refilled on replay.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Sequences reset on replay.
    pub fn sequences(&self) -> &[String] {
        &self.sequences
    }

    /// When the snapshot was generated.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// The statements joined into one batch, one statement per line.
    pub fn to_sql(&self) -> String {
        self.statements.join("\n")
    }
}

/// One column written by a dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpColumn {
    /// Column name.
    pub name: String,
    /// Escaping kind.
    pub kind: ColumnKind,
    /// Index of the column in the `SELECT *` row.
    pub position: usize,
}

/// Table name and the columns a dump writes for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    /// Table name.
    pub name: String,
    /// Insertable columns in select order.
    pub columns: Vec<DumpColumn>,
}

impl TableDescriptor {
    /// Builds a descriptor from a `SELECT *` result's column metadata,
    /// leaving out the columns named in `generated`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnsupportedType`] for the first remaining
    /// column whose type has no escaping rule.
    pub fn from_result(name: &str, result: &QueryResult, generated: &[String]) -> Result<Self> {
        let mut columns = Vec::with_capacity(result.columns.len());
        for (position, column) in result.columns.iter().enumerate() {
            if generated.contains(&column.name) {
                continue;
            }
            columns.push(DumpColumn {
                name: column.name.clone(),
                kind: ColumnKind::for_column(name, &column.name, &column.type_name)?,
                position,
            });
        }
        Ok(Self {
            name: name.to_string(),
            columns,
        })
    }
}

/// Generates dumps of the current database contents.
pub struct DumpGenerator<'a, E: SqlExecutor + ?Sized> {
    executor: &'a mut E,
    skip_marker: &'a str,
}

impl<'a, E: SqlExecutor + ?Sized> DumpGenerator<'a, E> {
    /// Creates a generator that ignores objects carrying `skip_marker`.
    pub fn new(executor: &'a mut E, skip_marker: &'a str) -> Self {
        Self {
            executor,
            skip_marker,
        }
    }

    /// Generates the replay statements for the current contents.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Introspection`] if listing objects or
    /// reading their contents fails, and [`SnapshotError::UnsupportedType`]
    /// if a non-empty table has a column with no escaping rule.
    pub fn generate(&mut self) -> Result<Vec<String>> {
        Ok(self.collect()?.0)
    }

    /// Generates a [`Snapshot`] named `name`.
    ///
    /// # Errors
    ///
    /// Same as [`generate`](Self::generate).
    pub fn snapshot(&mut self, name: &str) -> Result<Snapshot> {
        let (statements, tables, sequences) = self.collect()?;
        debug!(
            snapshot = name,
            statements = statements.len(),
            tables = tables.len(),
            sequences = sequences.len(),
            "generated snapshot"
        );
        Ok(Snapshot {
            name: name.to_string(),
            statements,
            tables,
            sequences,
            captured_at: Utc::now(),
        })
    }

    #[allow(clippy::type_complexity)]
    fn collect(&mut self) -> Result<(Vec<String>, Vec<String>, Vec<String>)> {
        let (tables, sequences) = {
            let mut introspector = SchemaIntrospector::new(&mut *self.executor, self.skip_marker);
            (introspector.list_tables()?, introspector.list_sequences()?)
        };

        let mut statements: Vec<String> = PREAMBLE.iter().map(|s| s.to_string()).collect();

        for table in &tables {
            statements.push(format!(
                "DELETE FROM {};",
                self.executor.escape_identifier(table)
            ));
        }

        for table in &tables {
            statements.extend(self.table_inserts(table)?);
        }

        if let Some(reset) = self.sequence_reset(&sequences)? {
            statements.push(reset);
        }

        statements.extend(POSTAMBLE.iter().map(|s| s.to_string()));
        Ok((statements, tables, sequences))
    }

    fn table_inserts(&mut self, table: &str) -> Result<Vec<String>> {
        let ident = self.executor.escape_identifier(table);
        let result = self
            .executor
            .query(&format!("SELECT * FROM {ident}"))
            .map_err(SnapshotError::Introspection)?;

        if result.is_empty() {
            return Ok(Vec::new());
        }

        let generated =
            SchemaIntrospector::new(&mut *self.executor, self.skip_marker).generated_columns(table)?;
        let descriptor = TableDescriptor::from_result(table, &result, &generated)?;

        // Rows with nothing insertable are re-created from defaults.
        if descriptor.columns.is_empty() {
            let insert = format!("INSERT INTO {ident} DEFAULT VALUES;");
            return Ok(vec![insert; result.rows.len()]);
        }

        let column_list = descriptor
            .columns
            .iter()
            .map(|column| self.executor.escape_identifier(&column.name))
            .collect::<Vec<_>>()
            .join(", ");

        let executor: &E = &*self.executor;
        let values = result
            .rows
            .iter()
            .map(|row| {
                let rendered = descriptor
                    .columns
                    .iter()
                    .map(|column| {
                        let value = row.get(column.position).and_then(|v| v.as_deref());
                        column.kind.render(executor, value)
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({rendered})")
            })
            .collect::<Vec<_>>()
            .join(", ");

        debug!(table, rows = result.rows.len(), "dumped table");
        Ok(vec![format!(
            "INSERT INTO {ident} ({column_list}) OVERRIDING SYSTEM VALUE VALUES {values};"
        )])
    }

    fn sequence_reset(&mut self, sequences: &[String]) -> Result<Option<String>> {
        if sequences.is_empty() {
            return Ok(None);
        }

        let mut calls = Vec::with_capacity(sequences.len());
        for sequence in sequences {
            let ident = self.executor.escape_identifier(sequence);
            let result = self
                .executor
                .query(&format!("SELECT last_value, is_called FROM {ident}"))
                .map_err(SnapshotError::Introspection)?;

            let last_value = result.value(0, "last_value").ok_or_else(|| {
                SnapshotError::Introspection(DriverError::new(format!(
                    "sequence {sequence} returned no last_value"
                )))
            })?;
            let is_called = ColumnKind::Boolean.render(&*self.executor, result.value(0, "is_called"));

            calls.push(format!(
                "setval({}, {}, {})",
                self.executor.escape_literal(&ident),
                last_value,
                is_called
            ));
        }

        Ok(Some(format!("SELECT {};", calls.join(", "))))
    }
}
