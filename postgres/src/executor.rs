//! [`SqlExecutor`] implementation over the `postgres` client.
//!
//! Statements run through the simple query protocol, so a whole snapshot
//! replays as one multi-statement batch and every value comes back in its
//! text form. Column types are read from a prepared statement's
//! description, with domains resolved to their base type.

use std::str::FromStr;

use dbsnap_core::{
    Column, DriverError, QueryResult, Result, SessionConfig, SnapshotError, SqlExecutor,
};
use postgres::types::{Kind, Type};
use postgres::{Client, Config, NoTls, SimpleQueryMessage};
use postgres_protocol::escape;
use tracing::debug;

/// A connection to one PostgreSQL database.
pub struct PgExecutor {
    config: Config,
    client: Client,
    database: String,
}

impl PgExecutor {
    /// Connects using a `postgres://` URI or a key/value connection string.
    ///
    /// When the string names no database, the user name is used, which is
    /// what the server itself does.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::InvalidConfig`] if the string cannot be
    /// parsed or names neither a database nor a user, and
    /// [`SnapshotError::Connection`] if the server cannot be reached.
    pub fn connect(url: &str) -> Result<Self> {
        let config = Config::from_str(url)
            .map_err(|e| SnapshotError::InvalidConfig(format!("database_url: {e}")))?;
        let database = config
            .get_dbname()
            .or(config.get_user())
            .map(str::to_string)
            .ok_or_else(|| {
                SnapshotError::InvalidConfig("database_url names no database".to_string())
            })?;

        let client = open(&config, &database).map_err(|source| SnapshotError::Connection {
            database: database.clone(),
            source,
        })?;
        debug!(database = %database, "connected");
        Ok(Self {
            config,
            client,
            database,
        })
    }

    /// Connects to the database named by `config.database_url`.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        Self::connect(&config.database_url)
    }

    /// The underlying client, for queries the executor interface does not
    /// cover.
    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl SqlExecutor for PgExecutor {
    fn execute(&mut self, sql: &str) -> std::result::Result<(), DriverError> {
        self.client
            .batch_execute(sql)
            .map_err(|e| DriverError::with_source(describe(&e), e))
    }

    fn query(&mut self, sql: &str) -> std::result::Result<QueryResult, DriverError> {
        let statement = self
            .client
            .prepare(sql)
            .map_err(|e| DriverError::with_source(describe(&e), e))?;
        let columns: Vec<Column> = statement
            .columns()
            .iter()
            .map(|column| Column::new(column.name(), base_type_name(column.type_())))
            .collect();

        let messages = self
            .client
            .simple_query(sql)
            .map_err(|e| DriverError::with_source(describe(&e), e))?;
        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let values = (0..row.len())
                    .map(|i| row.get(i).map(str::to_string))
                    .collect();
                rows.push(values);
            }
        }
        Ok(QueryResult::new(columns, rows))
    }

    fn escape_literal(&self, value: &str) -> String {
        // escape_literal pads its output with a leading space.
        escape::escape_literal(value).trim_start().to_string()
    }

    fn escape_identifier(&self, name: &str) -> String {
        escape::escape_identifier(name)
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn connect_to(&mut self, database: &str) -> std::result::Result<(), DriverError> {
        let client = open(&self.config, database)?;
        // Replacing the client closes the old session.
        self.client = client;
        self.database = database.to_string();
        debug!(database, "reconnected");
        Ok(())
    }
}

fn open(config: &Config, database: &str) -> std::result::Result<Client, DriverError> {
    let mut config = config.clone();
    config.dbname(database);
    config
        .connect(NoTls)
        .map_err(|e| DriverError::with_source(format!("cannot connect to '{database}': {e}"), e))
}

/// Reports the server's message when there is one.
fn describe(err: &postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => format!("{}: {}", db.code().code(), db.message()),
        None => err.to_string(),
    }
}

fn base_type_name(ty: &Type) -> String {
    let mut ty = ty;
    while let Kind::Domain(inner) = ty.kind() {
        ty = inner;
    }
    ty.name().to_string()
}
