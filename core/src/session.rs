//! One test session: production protection, snapshot cache, and fixture
//! resolution behind a single handle.
//!
//! # Example
//!
//! ```no_run
//! # fn demo<E: dbsnap_core::SqlExecutor>(executor: E) -> dbsnap_core::Result<()> {
//! use dbsnap_core::{SessionConfig, SnapshotError, TestSession};
//!
//! let config = SessionConfig::from_url("postgres://app@localhost/app").with_env_overrides();
//! let mut session = TestSession::begin(executor, &config)?;
//!
//! // Before each test:
//! session.resolve("one_user", |stack| {
//!     stack.resolve_clean("schema", |db| {
//!         db.execute("CREATE TABLE IF NOT EXISTS users (id serial, name text)")
//!             .map_err(SnapshotError::BatchExecution)
//!     })?;
//!     stack
//!         .executor()
//!         .execute("INSERT INTO users (name) VALUES ('alice')")
//!         .map_err(SnapshotError::BatchExecution)
//! })?;
//!
//! session.end()?;
//! # Ok(())
//! # }
//! ```

use tracing::info;

use crate::config::SessionConfig;
use crate::dump::Snapshot;
use crate::error::Result;
use crate::executor::SqlExecutor;
use crate::production::ProductionGuard;
use crate::restore::{Resolution, RestoreStack};
use crate::store::SnapshotStore;

enum Connection<E: SqlExecutor> {
    Guarded(ProductionGuard<E>),
    Unguarded(E),
}

/// Owns everything a test process needs between its first and last test.
pub struct TestSession<E: SqlExecutor> {
    connection: Connection<E>,
    store: SnapshotStore,
    skip_marker: String,
}

impl<E: SqlExecutor> TestSession<E> {
    /// Starts a session on `executor`.
    ///
    /// With `protect_production` set, the live database is swapped out
    /// first and restored when the session ends or is dropped.
    ///
    /// # Errors
    ///
    /// Returns configuration errors from [`SessionConfig::validate`] and
    /// swap errors from [`ProductionGuard::acquire`].
    pub fn begin(executor: E, config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let connection = if config.protect_production {
            Connection::Guarded(ProductionGuard::acquire(executor, config)?)
        } else {
            Connection::Unguarded(executor)
        };
        let session = Self {
            connection,
            store: SnapshotStore::new(),
            skip_marker: config.skip_marker.clone(),
        };
        info!(
            database = session.database(),
            protected = session.is_protected(),
            "test session started"
        );
        Ok(session)
    }

    /// Returns `true` if the live database is swapped out for this session.
    pub fn is_protected(&self) -> bool {
        matches!(self.connection, Connection::Guarded(_))
    }

    /// Name of the database tests run against.
    pub fn database(&self) -> &str {
        match &self.connection {
            Connection::Guarded(guard) => guard.executor().database(),
            Connection::Unguarded(executor) => executor.database(),
        }
    }

    /// The executor tests run their SQL through.
    pub fn executor(&mut self) -> &mut E {
        match &mut self.connection {
            Connection::Guarded(guard) => guard.executor_mut(),
            Connection::Unguarded(executor) => executor,
        }
    }

    /// The session's snapshot cache.
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Resolves the fixture `name`; see [`RestoreStack::resolve`].
    ///
    /// # Errors
    ///
    /// Same as [`RestoreStack::resolve`].
    pub fn resolve<F>(&mut self, name: &str, builder: F) -> Result<Resolution>
    where
        F: FnOnce(&mut RestoreStack<'_, E>) -> Result<()>,
    {
        self.stack().resolve(name, builder)
    }

    /// Resolves `name` as the clean baseline; see
    /// [`RestoreStack::resolve_clean`].
    ///
    /// # Errors
    ///
    /// Same as [`RestoreStack::resolve`].
    pub fn resolve_clean<F>(&mut self, name: &str, initializer: F) -> Result<Resolution>
    where
        F: FnOnce(&mut E) -> Result<()>,
    {
        self.stack().resolve_clean(name, initializer)
    }

    /// Runs a clean reset without caching it.
    ///
    /// # Errors
    ///
    /// Propagates the initializer's error.
    pub fn clean<F>(&mut self, initializer: F) -> Result<()>
    where
        F: FnOnce(&mut E) -> Result<()>,
    {
        self.stack().clean(initializer)
    }

    /// Captures the current contents as `name`.
    ///
    /// # Errors
    ///
    /// See [`SnapshotStore::capture`].
    pub fn capture(&mut self, name: &str) -> Result<&Snapshot> {
        let executor = match &mut self.connection {
            Connection::Guarded(guard) => guard.executor_mut(),
            Connection::Unguarded(executor) => executor,
        };
        self.store.capture(executor, name, &self.skip_marker)
    }

    /// Replays the snapshot `name`; `Ok(false)` if it is not cached.
    ///
    /// # Errors
    ///
    /// See [`SnapshotStore::restore`].
    pub fn restore(&mut self, name: &str) -> Result<bool> {
        let executor = match &mut self.connection {
            Connection::Guarded(guard) => guard.executor_mut(),
            Connection::Unguarded(executor) => executor,
        };
        self.store.restore(executor, name)
    }

    /// Ends the session, restoring the live database if it was swapped.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`ProductionGuard::finish`].
    pub fn end(self) -> Result<()> {
        info!(snapshots = self.store.len(), "test session ending");
        match self.connection {
            Connection::Guarded(guard) => guard.finish(),
            Connection::Unguarded(_) => Ok(()),
        }
    }

    fn stack(&mut self) -> RestoreStack<'_, E> {
        let executor = match &mut self.connection {
            Connection::Guarded(guard) => guard.executor_mut(),
            Connection::Unguarded(executor) => executor,
        };
        RestoreStack::new(executor, &mut self.store, &self.skip_marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnapshotError;
    use crate::fake::FakeExecutor;

    fn executor() -> FakeExecutor {
        FakeExecutor::new("app").with_table(
            "t",
            &[("id", "int4"), ("name", "text")],
            &[&[Some("1"), Some("a")], &[Some("2"), Some("b")]],
        )
    }

    fn unprotected() -> SessionConfig {
        let mut config = SessionConfig::from_url("postgres://localhost/app");
        config.protect_production = false;
        config
    }

    #[test]
    fn test_protected_session_swaps_and_restores() {
        let mut exec = executor();
        let config = SessionConfig::from_url("postgres://localhost/app");
        let session = TestSession::begin(&mut exec, &config).unwrap();
        assert!(session.is_protected());
        assert_eq!(session.database(), "app");
        session.end().unwrap();

        assert!(!exec.databases.contains("app_backup"));
        assert!(exec.databases.contains("app"));
    }

    #[test]
    fn test_dropped_session_restores_production() {
        let mut exec = executor();
        let config = SessionConfig::from_url("postgres://localhost/app");
        {
            let _session = TestSession::begin(&mut exec, &config).unwrap();
        }
        assert!(!exec.databases.contains("app_backup"));
    }

    #[test]
    fn test_unprotected_session_touches_no_databases() {
        let mut exec = executor();
        let session = TestSession::begin(&mut exec, &unprotected()).unwrap();
        assert!(!session.is_protected());
        session.end().unwrap();
        assert!(exec.executed.is_empty());
        assert!(exec.connections.is_empty());
    }

    #[test]
    fn test_resolve_builds_once_then_replays() {
        let mut exec = executor();
        let mut session = TestSession::begin(&mut exec, &unprotected()).unwrap();
        let mut builds = 0;

        for _ in 0..3 {
            session
                .resolve("seeded", |stack| {
                    builds += 1;
                    stack.clean(|_| Ok(()))
                })
                .unwrap();
        }

        assert_eq!(builds, 1);
        assert!(session.store().contains("seeded"));
    }

    #[test]
    fn test_resolve_rejects_dirty_builder() {
        let mut exec = executor();
        let mut session = TestSession::begin(&mut exec, &unprotected()).unwrap();
        let err = session.resolve("dirty", |_| Ok(())).unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidFixture(_)));
        assert!(session.store().is_empty());
    }

    #[test]
    fn test_capture_and_restore() {
        let mut exec = executor();
        let mut session = TestSession::begin(&mut exec, &unprotected()).unwrap();
        session.capture("s1").unwrap();
        assert!(session.restore("s1").unwrap());
        assert!(!session.restore("s2").unwrap());
    }

    #[test]
    fn test_invalid_config_is_rejected_before_swap() {
        let mut exec = executor();
        let mut config = SessionConfig::from_url("postgres://localhost/app");
        config.skip_marker.clear();
        assert!(matches!(
            TestSession::begin(&mut exec, &config),
            Err(SnapshotError::InvalidConfig(_))
        ));
        assert!(exec.executed.is_empty());
    }
}
