//! Protection of a live database that shares its name with the test
//! database.
//!
//! At session start the live database is renamed to a backup name and an
//! empty database takes its place; at session end the test database is
//! dropped and the backup renamed back. The swap is a two-state machine
//! ([`SwapState`]) whose starting state is read once from the catalog.
//! [`ProductionGuard`] ties the restore to scope exit so it runs on every
//! path out of the session, including panics.
//!
//! All administrative statements run from a maintenance database, because
//! a database cannot be renamed or dropped while sessions are connected to
//! it.

use tracing::{error, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, SnapshotError};
use crate::executor::SqlExecutor;

/// Live database name and the backup name derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseIdentity {
    live: String,
    backup: String,
}

impl DatabaseIdentity {
    /// Derives the backup name by appending `suffix` to `live`.
    pub fn new(live: impl Into<String>, suffix: &str) -> Self {
        let live = live.into();
        let backup = format!("{live}{suffix}");
        Self { live, backup }
    }

    /// Name of the live database.
    pub fn live(&self) -> &str {
        &self.live
    }

    /// Name the live database is moved to while tests run.
    pub fn backup(&self) -> &str {
        &self.backup
    }
}

/// Where the real database currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    /// The live name holds the real database; no backup exists.
    Normal,
    /// The real database is parked under the backup name.
    BackedUp,
}

/// Renames the live database out of the way and back.
#[derive(Debug)]
pub struct ProductionSwap {
    identity: DatabaseIdentity,
    maintenance_database: String,
    state: SwapState,
    inherited: bool,
}

impl ProductionSwap {
    /// Checks the catalog for an existing backup and returns a swap in the
    /// matching state.
    ///
    /// A backup that already exists was left by an earlier session that
    /// never restored it; the swap then starts in [`SwapState::BackedUp`].
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::InvalidConfig`] if the maintenance database
    /// is one of the swapped names, and [`SnapshotError::Introspection`] if
    /// the catalog query fails.
    pub fn detect<E: SqlExecutor + ?Sized>(
        executor: &mut E,
        identity: DatabaseIdentity,
        maintenance_database: impl Into<String>,
    ) -> Result<Self> {
        let maintenance_database = maintenance_database.into();
        if maintenance_database == identity.live || maintenance_database == identity.backup {
            return Err(SnapshotError::InvalidConfig(format!(
                "maintenance database '{maintenance_database}' cannot be the swapped database"
            )));
        }

        let inherited = database_exists(executor, &identity.backup)?;
        let state = if inherited {
            SwapState::BackedUp
        } else {
            SwapState::Normal
        };
        Ok(Self {
            identity,
            maintenance_database,
            state,
            inherited,
        })
    }

    /// Builds the swap for `live` from a session configuration.
    ///
    /// # Errors
    ///
    /// Same as [`detect`](Self::detect).
    pub fn from_config<E: SqlExecutor + ?Sized>(
        executor: &mut E,
        config: &SessionConfig,
    ) -> Result<Self> {
        let identity = DatabaseIdentity::new(executor.database(), &config.backup_suffix);
        Self::detect(executor, identity, config.maintenance_database.clone())
    }

    /// Current state.
    pub fn state(&self) -> SwapState {
        self.state
    }

    /// Database names this swap manages.
    pub fn identity(&self) -> &DatabaseIdentity {
        &self.identity
    }

    /// Returns `true` if the backup pre-dates this swap.
    pub fn is_inherited(&self) -> bool {
        self.inherited
    }

    /// Moves the live database to the backup name and replaces it with an
    /// empty database, leaving `executor` connected to the new one.
    ///
    /// Does nothing if a backup already exists: a leftover test database
    /// must never overwrite the real backup.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Connection`] if a session cannot be opened
    /// and [`SnapshotError::BatchExecution`] if a statement fails.
    pub fn save_production<E: SqlExecutor + ?Sized>(&mut self, executor: &mut E) -> Result<()> {
        if self.state == SwapState::BackedUp {
            if self.inherited {
                warn!(
                    live = %self.identity.live,
                    backup = %self.identity.backup,
                    "backup left by an earlier session; leaving databases as found"
                );
            }
            return Ok(());
        }

        let live = executor.escape_identifier(&self.identity.live);
        let backup = executor.escape_identifier(&self.identity.backup);

        connect(executor, &self.maintenance_database)?;
        terminate_sessions(executor, &self.identity.live)?;
        run(executor, &format!("ALTER DATABASE {live} RENAME TO {backup}"))?;
        self.state = SwapState::BackedUp;

        run(executor, &format!("CREATE DATABASE {live}"))?;
        connect(executor, &self.identity.live)?;

        info!(
            live = %self.identity.live,
            backup = %self.identity.backup,
            "live database moved to backup"
        );
        Ok(())
    }

    /// Drops the test database and renames the backup back to the live
    /// name, leaving `executor` connected to it.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::NoBackupFound`] without touching anything if
    /// there is no backup, [`SnapshotError::Connection`] if a session cannot
    /// be opened, and [`SnapshotError::BatchExecution`] if a statement
    /// fails.
    pub fn restore_production<E: SqlExecutor + ?Sized>(&mut self, executor: &mut E) -> Result<()> {
        if self.state == SwapState::Normal {
            return Err(SnapshotError::NoBackupFound {
                live: self.identity.live.clone(),
                backup: self.identity.backup.clone(),
            });
        }

        let live = executor.escape_identifier(&self.identity.live);
        let backup = executor.escape_identifier(&self.identity.backup);

        connect(executor, &self.maintenance_database)?;
        terminate_sessions(executor, &self.identity.live)?;
        run(executor, &format!("DROP DATABASE IF EXISTS {live}"))?;
        terminate_sessions(executor, &self.identity.backup)?;
        run(executor, &format!("ALTER DATABASE {backup} RENAME TO {live}"))?;
        self.state = SwapState::Normal;
        self.inherited = false;

        connect(executor, &self.identity.live)?;
        info!(live = %self.identity.live, "live database restored from backup");
        Ok(())
    }
}

/// Holds the production backup for the lifetime of a test session.
///
/// [`acquire`](Self::acquire) performs the swap; dropping the guard
/// restores the live database, whether the session ends normally, returns
/// early with an error, or unwinds from a panic. Use
/// [`finish`](Self::finish) to restore explicitly and observe the result.
///
/// A backup inherited from an earlier session is consumed the same way:
/// `acquire` leaves the databases as found, and at session end the
/// database under the live name is dropped and the old backup is renamed
/// back over it.
///
/// Process termination that skips destructors (`std::process::exit`,
/// `panic = "abort"`, signals) also skips the restore; the next session
/// then finds the backup as inherited.
#[derive(Debug)]
pub struct ProductionGuard<E: SqlExecutor> {
    executor: E,
    swap: ProductionSwap,
    released: bool,
}

impl<E: SqlExecutor> ProductionGuard<E> {
    /// Detects the swap state and saves the live database.
    ///
    /// If the save fails part-way the guard is dropped before returning,
    /// which restores whatever was already moved.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`ProductionSwap::detect`] and
    /// [`ProductionSwap::save_production`].
    pub fn acquire(mut executor: E, config: &SessionConfig) -> Result<Self> {
        let swap = ProductionSwap::from_config(&mut executor, config)?;
        let mut guard = Self {
            executor,
            swap,
            released: false,
        };
        guard.swap.save_production(&mut guard.executor)?;
        Ok(guard)
    }

    /// The executor, connected to the (test) live database.
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Mutable access to the executor.
    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    /// The underlying swap.
    pub fn swap(&self) -> &ProductionSwap {
        &self.swap
    }

    /// Restores the live database now and reports the outcome.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`ProductionSwap::restore_production`]. The
    /// restore is not retried on drop.
    pub fn finish(mut self) -> Result<()> {
        self.released = true;
        self.swap.restore_production(&mut self.executor)
    }
}

impl<E: SqlExecutor> Drop for ProductionGuard<E> {
    fn drop(&mut self) {
        if self.released || self.swap.state() == SwapState::Normal {
            return;
        }
        self.released = true;
        if let Err(err) = self.swap.restore_production(&mut self.executor) {
            error!(
                live = %self.swap.identity.live,
                backup = %self.swap.identity.backup,
                error = %err,
                "failed to restore live database"
            );
        }
    }
}

fn database_exists<E: SqlExecutor + ?Sized>(executor: &mut E, name: &str) -> Result<bool> {
    let sql = format!(
        "SELECT datname FROM pg_catalog.pg_database WHERE datname = {}",
        executor.escape_literal(name)
    );
    let result = executor.query(&sql).map_err(SnapshotError::Introspection)?;
    Ok(!result.is_empty())
}

fn terminate_sessions<E: SqlExecutor + ?Sized>(executor: &mut E, database: &str) -> Result<()> {
    let sql = format!(
        "SELECT pg_terminate_backend(pid) FROM pg_catalog.pg_stat_activity \
         WHERE datname = {} AND pid <> pg_backend_pid()",
        executor.escape_literal(database)
    );
    executor
        .query(&sql)
        .map_err(SnapshotError::BatchExecution)?;
    Ok(())
}

fn run<E: SqlExecutor + ?Sized>(executor: &mut E, sql: &str) -> Result<()> {
    executor.execute(sql).map_err(SnapshotError::BatchExecution)
}

fn connect<E: SqlExecutor + ?Sized>(executor: &mut E, database: &str) -> Result<()> {
    executor
        .connect_to(database)
        .map_err(|source| SnapshotError::Connection {
            database: database.to_string(),
            source,
        })
}
