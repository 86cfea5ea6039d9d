//! Error types for snapshot, fixture, and production-swap operations.
//!
//! Provides a unified error type covering connection, introspection,
//! escaping, replay, swap, and fixture-protocol failures, plus the
//! executor-boundary [`DriverError`] that backends report.

use thiserror::Error;

/// Failure reported by a [`SqlExecutor`](crate::SqlExecutor) backend.
///
/// Backends wrap their native driver error in this type; callers translate
/// it into the [`SnapshotError`] variant that matches the operation in
/// progress.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DriverError {
    /// Creates a driver error from a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a driver error wrapping the backend's native error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors that can occur during snapshot and fixture operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// A database session could not be established or re-established.
    #[error("connection error ({database}): {source}")]
    Connection {
        /// Database the session was opened against.
        database: String,
        #[source]
        source: DriverError,
    },

    /// A catalog query failed.
    #[error("introspection error: {0}")]
    Introspection(#[source] DriverError),

    /// A column's storage type has no escaping rule.
    #[error("unsupported column type '{type_name}' for {table}.{column}")]
    UnsupportedType {
        /// Table owning the column.
        table: String,
        /// Column name.
        column: String,
        /// Type name as reported by the executor.
        type_name: String,
    },

    /// A statement batch failed to execute, including snapshot replay.
    #[error("batch execution error: {0}")]
    BatchExecution(#[source] DriverError),

    /// `restore_production` was called without a prior backup.
    #[error("no backup database '{backup}' found for '{live}'")]
    NoBackupFound {
        /// Live database name.
        live: String,
        /// Expected backup database name.
        backup: String,
    },

    /// A fixture builder returned without restoring a parent state or
    /// performing a clean reset.
    #[error(
        "fixture '{0}' did not restore a parent state or clean the database before returning"
    )]
    InvalidFixture(String),

    /// Configuration is missing or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// File I/O failure while reading or writing configuration.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Convenience alias for results with [`SnapshotError`].
pub type Result<T> = std::result::Result<T, SnapshotError>;
