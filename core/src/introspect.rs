//! Discovery of the tables and sequences that take part in snapshots.
//!
//! Only objects in the session's current schema are considered. An object
//! whose catalog comment contains the skip marker is left out of every
//! dump and restore; marking is managed out-of-band, typically with a
//! `COMMENT ON TABLE ... IS '...'` in a migration.

use tracing::debug;

use crate::error::{Result, SnapshotError};
use crate::executor::SqlExecutor;

/// Skip marker used when the configuration does not name one.
pub const DEFAULT_SKIP_MARKER: &str = "dbsnap:skip";

/// Ordinary and partitioned tables. Partitions are excluded because the
/// partitioned parent already reads and deletes their rows.
pub(crate) const TABLES_SQL: &str = "SELECT c.relname AS name, \
     pg_catalog.obj_description(c.oid, 'pg_class') AS comment \
     FROM pg_catalog.pg_class c \
     JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
     WHERE n.nspname = current_schema() \
     AND c.relkind IN ('r', 'p') \
     AND NOT c.relispartition \
     ORDER BY c.relname";

pub(crate) const SEQUENCES_SQL: &str = "SELECT c.relname AS name, \
     pg_catalog.obj_description(c.oid, 'pg_class') AS comment \
     FROM pg_catalog.pg_class c \
     JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
     WHERE n.nspname = current_schema() \
     AND c.relkind = 'S' \
     ORDER BY c.relname";

/// Prefix of the per-table query for stored generated columns; the table
/// follows as a `regclass` literal.
pub(crate) const GENERATED_COLUMNS_SQL: &str = "SELECT a.attname AS name \
     FROM pg_catalog.pg_attribute a \
     WHERE a.attnum > 0 \
     AND NOT a.attisdropped \
     AND a.attgenerated <> '' \
     AND a.attrelid = ";

/// Lists eligible tables and sequences through an executor.
pub struct SchemaIntrospector<'a, E: SqlExecutor + ?Sized> {
    executor: &'a mut E,
    skip_marker: &'a str,
}

impl<'a, E: SqlExecutor + ?Sized> SchemaIntrospector<'a, E> {
    /// Creates an introspector that excludes objects whose comment contains
    /// `skip_marker`.
    pub fn new(executor: &'a mut E, skip_marker: &'a str) -> Self {
        Self {
            executor,
            skip_marker,
        }
    }

    /// Eligible table names, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Introspection`] if the catalog query fails.
    pub fn list_tables(&mut self) -> Result<Vec<String>> {
        let tables = self.list(TABLES_SQL)?;
        debug!(count = tables.len(), "listed eligible tables");
        Ok(tables)
    }

    /// Eligible sequence names, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Introspection`] if the catalog query fails.
    pub fn list_sequences(&mut self) -> Result<Vec<String>> {
        let sequences = self.list(SEQUENCES_SQL)?;
        debug!(count = sequences.len(), "listed eligible sequences");
        Ok(sequences)
    }

    /// Stored generated columns of `table`. The server computes these on
    /// insert and rejects explicit values for them.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Introspection`] if the catalog query fails.
    pub fn generated_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let relation = self
            .executor
            .escape_literal(&self.executor.escape_identifier(table));
        let sql = format!("{GENERATED_COLUMNS_SQL}{relation}::regclass ORDER BY a.attnum");
        let result = self
            .executor
            .query(&sql)
            .map_err(SnapshotError::Introspection)?;
        Ok((0..result.rows.len())
            .filter_map(|row| result.value(row, "name").map(str::to_string))
            .collect())
    }

    fn list(&mut self, sql: &str) -> Result<Vec<String>> {
        let result = self
            .executor
            .query(sql)
            .map_err(SnapshotError::Introspection)?;

        let mut names = Vec::with_capacity(result.rows.len());
        for row in 0..result.rows.len() {
            let Some(name) = result.value(row, "name") else {
                continue;
            };
            let skipped = result
                .value(row, "comment")
                .is_some_and(|comment| comment.contains(self.skip_marker));
            if skipped {
                debug!(object = name, "skipping marked object");
                continue;
            }
            names.push(name.to_string());
        }
        // Byte order, independent of the server's collation.
        names.sort();
        Ok(names)
    }
}
