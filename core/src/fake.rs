//! In-memory executor used by unit tests.
//!
//! Understands exactly the catalog and administrative queries this crate
//! issues, keeps a log of everything executed, and applies database
//! rename/create/drop and `DELETE FROM` so state transitions can be
//! asserted without a server.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::DriverError;
use crate::executor::{Column, QueryResult, SqlExecutor};
use crate::introspect::{GENERATED_COLUMNS_SQL, SEQUENCES_SQL, TABLES_SQL};

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeTable {
    pub comment: Option<String>,
    pub columns: Vec<Column>,
    pub generated: BTreeSet<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeSequence {
    pub comment: Option<String>,
    pub last_value: i64,
    pub is_called: bool,
}

#[derive(Debug)]
pub(crate) struct FakeExecutor {
    pub database: String,
    pub databases: BTreeSet<String>,
    pub tables: BTreeMap<String, FakeTable>,
    pub sequences: BTreeMap<String, FakeSequence>,
    pub executed: Vec<String>,
    pub terminated: Vec<String>,
    pub connections: Vec<String>,
    pub fail_execute: Option<String>,
    pub fail_query: Option<String>,
}

impl FakeExecutor {
    pub fn new(database: &str) -> Self {
        let mut databases = BTreeSet::new();
        databases.insert("postgres".to_string());
        databases.insert(database.to_string());
        Self {
            database: database.to_string(),
            databases,
            tables: BTreeMap::new(),
            sequences: BTreeMap::new(),
            executed: Vec::new(),
            terminated: Vec::new(),
            connections: Vec::new(),
            fail_execute: None,
            fail_query: None,
        }
    }

    pub fn with_table(
        mut self,
        name: &str,
        columns: &[(&str, &str)],
        rows: &[&[Option<&str>]],
    ) -> Self {
        self.tables.insert(
            name.to_string(),
            FakeTable {
                comment: None,
                columns: columns.iter().map(|(n, t)| Column::new(*n, *t)).collect(),
                generated: BTreeSet::new(),
                rows: rows
                    .iter()
                    .map(|row| row.iter().map(|v| v.map(str::to_string)).collect())
                    .collect(),
            },
        );
        self
    }

    pub fn with_sequence(mut self, name: &str, last_value: i64, is_called: bool) -> Self {
        self.sequences.insert(
            name.to_string(),
            FakeSequence {
                comment: None,
                last_value,
                is_called,
            },
        );
        self
    }

    pub fn comment_table(mut self, name: &str, comment: &str) -> Self {
        if let Some(table) = self.tables.get_mut(name) {
            table.comment = Some(comment.to_string());
        }
        self
    }

    pub fn generated_column(mut self, table: &str, column: &str) -> Self {
        if let Some(table) = self.tables.get_mut(table) {
            table.generated.insert(column.to_string());
        }
        self
    }

    pub fn comment_sequence(mut self, name: &str, comment: &str) -> Self {
        if let Some(seq) = self.sequences.get_mut(name) {
            seq.comment = Some(comment.to_string());
        }
        self
    }

    fn catalog(entries: Vec<(String, Option<String>)>) -> QueryResult {
        QueryResult::new(
            vec![Column::new("name", "name"), Column::new("comment", "text")],
            entries
                .into_iter()
                .map(|(name, comment)| vec![Some(name), comment])
                .collect(),
        )
    }

    fn apply(&mut self, statement: &str) -> Result<(), DriverError> {
        let statement = statement.trim().trim_end_matches(';').trim();
        if let Some(rest) = statement.strip_prefix("ALTER DATABASE ") {
            let (from, to) = rest
                .split_once(" RENAME TO ")
                .ok_or_else(|| DriverError::new("malformed rename"))?;
            let (from, to) = (unquote(from), unquote(to));
            if !self.databases.remove(&from) {
                return Err(DriverError::new(format!("database \"{from}\" does not exist")));
            }
            if !self.databases.insert(to.clone()) {
                return Err(DriverError::new(format!("database \"{to}\" already exists")));
            }
        } else if let Some(rest) = statement.strip_prefix("CREATE DATABASE ") {
            let name = unquote(rest);
            if !self.databases.insert(name.clone()) {
                return Err(DriverError::new(format!("database \"{name}\" already exists")));
            }
        } else if let Some(rest) = statement.strip_prefix("DROP DATABASE IF EXISTS ") {
            self.databases.remove(&unquote(rest));
        } else if let Some(rest) = statement.strip_prefix("DELETE FROM ") {
            if let Some(table) = self.tables.get_mut(&unquote(rest)) {
                table.rows.clear();
            }
        }
        Ok(())
    }
}

impl SqlExecutor for FakeExecutor {
    fn execute(&mut self, sql: &str) -> Result<(), DriverError> {
        if let Some(needle) = &self.fail_execute {
            if sql.contains(needle.as_str()) {
                return Err(DriverError::new(format!("forced failure on '{needle}'")));
            }
        }
        self.executed.push(sql.to_string());
        for statement in sql.lines() {
            self.apply(statement)?;
        }
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<QueryResult, DriverError> {
        if let Some(needle) = &self.fail_query {
            if sql.contains(needle.as_str()) {
                return Err(DriverError::new(format!("forced failure on '{needle}'")));
            }
        }
        if sql == TABLES_SQL {
            let entries = self
                .tables
                .iter()
                .rev()
                .map(|(name, t)| (name.clone(), t.comment.clone()))
                .collect();
            return Ok(Self::catalog(entries));
        }
        if sql == SEQUENCES_SQL {
            let entries = self
                .sequences
                .iter()
                .rev()
                .map(|(name, s)| (name.clone(), s.comment.clone()))
                .collect();
            return Ok(Self::catalog(entries));
        }
        if let Some(rest) = sql.strip_prefix(GENERATED_COLUMNS_SQL) {
            let name = unquote(&first_literal(rest));
            let table = self
                .tables
                .get(&name)
                .ok_or_else(|| DriverError::new(format!("relation \"{name}\" does not exist")))?;
            let rows = table
                .columns
                .iter()
                .filter(|c| table.generated.contains(&c.name))
                .map(|c| vec![Some(c.name.clone())])
                .collect();
            return Ok(QueryResult::new(vec![Column::new("name", "name")], rows));
        }
        if let Some(rest) = sql.strip_prefix("SELECT last_value, is_called FROM ") {
            let seq = self
                .sequences
                .get(&unquote(rest))
                .ok_or_else(|| DriverError::new(format!("no sequence {rest}")))?;
            return Ok(QueryResult::new(
                vec![Column::new("last_value", "int8"), Column::new("is_called", "bool")],
                vec![vec![
                    Some(seq.last_value.to_string()),
                    Some(if seq.is_called { "t" } else { "f" }.to_string()),
                ]],
            ));
        }
        if let Some(rest) = sql.strip_prefix("SELECT * FROM ") {
            let table = self
                .tables
                .get(&unquote(rest))
                .ok_or_else(|| DriverError::new(format!("no table {rest}")))?;
            return Ok(QueryResult::new(table.columns.clone(), table.rows.clone()));
        }
        if sql.starts_with("SELECT datname FROM pg_catalog.pg_database") {
            let name = first_literal(sql);
            let rows = if self.databases.contains(&name) {
                vec![vec![Some(name)]]
            } else {
                Vec::new()
            };
            return Ok(QueryResult::new(vec![Column::new("datname", "name")], rows));
        }
        if sql.starts_with("SELECT pg_terminate_backend(pid)") {
            self.terminated.push(first_literal(sql));
            return Ok(QueryResult::default());
        }
        Err(DriverError::new(format!("unexpected query: {sql}")))
    }

    fn escape_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    fn escape_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn connect_to(&mut self, database: &str) -> Result<(), DriverError> {
        if !self.databases.contains(database) {
            return Err(DriverError::new(format!(
                "database \"{database}\" does not exist"
            )));
        }
        self.database = database.to_string();
        self.connections.push(database.to_string());
        Ok(())
    }
}

fn unquote(ident: &str) -> String {
    let ident = ident.trim();
    ident
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .map(|s| s.replace("\"\"", "\""))
        .unwrap_or_else(|| ident.to_string())
}

fn first_literal(sql: &str) -> String {
    sql.split('\'').nth(1).unwrap_or_default().to_string()
}
