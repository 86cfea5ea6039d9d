//! Named database snapshots and composable test fixtures.
//!
//! This crate lets a test suite build an expensive database state once,
//! capture it under a name, and replay it cheaply before every later test.
//! It also keeps a live database that shares its name with the test
//! database out of harm's way for the whole test run.
//!
//! - [`SqlExecutor`]: the seam to the database driver (see the
//!   `dbsnap-postgres` crate for the PostgreSQL backend).
//! - [`SchemaIntrospector`]: lists the tables and sequences that take
//!   part, honouring the skip marker in catalog comments.
//! - [`DumpGenerator`]: turns current contents into replayable SQL.
//! - [`SnapshotStore`]: caches dumps by name and replays them.
//! - [`RestoreStack`]: resolves named fixtures, building each one once
//!   and refusing to cache fixtures built on an unknown base state.
//! - [`ProductionSwap`] / [`ProductionGuard`]: parks the live database
//!   under a backup name for the session and restores it on every exit
//!   path.
//! - [`TestSession`]: all of the above behind one handle.
//!
//! # Example
//!
//! ```no_run
//! # fn demo<E: dbsnap_core::SqlExecutor>(executor: E) -> dbsnap_core::Result<()> {
//! use dbsnap_core::{SessionConfig, SnapshotError, TestSession};
//!
//! let config = SessionConfig::load("dbsnap.yml")?.with_env_overrides();
//! let mut session = TestSession::begin(executor, &config)?;
//!
//! session.resolve("two_orders", |stack| {
//!     stack.resolve_clean("empty", |db| {
//!         db.execute("DELETE FROM orders").map_err(SnapshotError::BatchExecution)
//!     })?;
//!     stack
//!         .executor()
//!         .execute("INSERT INTO orders (total) VALUES (10), (20)")
//!         .map_err(SnapshotError::BatchExecution)
//! })?;
//!
//! session.end()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod dump;
mod error;
mod executor;
mod introspect;
mod production;
mod restore;
mod session;
mod store;
mod value;

#[cfg(test)]
mod fake;

pub use config::{DATABASE_URL_ENV, SessionConfig};
pub use dump::{DumpColumn, DumpGenerator, Snapshot, TableDescriptor};
pub use error::{DriverError, Result, SnapshotError};
pub use executor::{Column, QueryResult, SqlExecutor};
pub use introspect::{DEFAULT_SKIP_MARKER, SchemaIntrospector};
pub use production::{DatabaseIdentity, ProductionGuard, ProductionSwap, SwapState};
pub use restore::{Resolution, RestoreStack};
pub use session::TestSession;
pub use store::SnapshotStore;
pub use value::ColumnKind;
