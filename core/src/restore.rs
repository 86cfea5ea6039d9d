//! The restore-stack protocol for composable fixtures.
//!
//! A fixture is a named database state plus a builder that produces it.
//! [`RestoreStack::resolve`] replays the cached snapshot when one exists;
//! otherwise it runs the builder and caches whatever the builder leaves
//! behind. A builder must start from a known base state, so it has to call
//! back into [`resolve`](RestoreStack::resolve) for a parent fixture or
//! into [`clean`](RestoreStack::clean) before it mutates anything. The
//! stack counts those calls and refuses to cache the result of a builder
//! that made none.
//!
//! # Example
//!
//! ```no_run
//! # fn demo(executor: &mut impl dbsnap_core::SqlExecutor) -> dbsnap_core::Result<()> {
//! use dbsnap_core::{DEFAULT_SKIP_MARKER, RestoreStack, SnapshotStore};
//!
//! let mut store = SnapshotStore::new();
//! let mut stack = RestoreStack::new(executor, &mut store, DEFAULT_SKIP_MARKER);
//!
//! stack.resolve("with_admin", |stack| {
//!     stack.resolve_clean("empty", |db| {
//!         db.execute("TRUNCATE users")
//!             .map_err(dbsnap_core::SnapshotError::BatchExecution)
//!     })?;
//!     stack
//!         .executor()
//!         .execute("INSERT INTO users (name) VALUES ('admin')")
//!         .map_err(dbsnap_core::SnapshotError::BatchExecution)
//! })?;
//! # Ok(())
//! # }
//! ```

use tracing::{debug, info};

use crate::error::{Result, SnapshotError};
use crate::executor::SqlExecutor;
use crate::store::SnapshotStore;

/// How [`RestoreStack::resolve`] reached the requested state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A cached snapshot was replayed.
    Replayed,
    /// The builder ran and its result was cached.
    Built,
}

/// Context carried through one chain of fixture resolution.
///
/// Holds the restore counter for the chain; create a fresh stack for every
/// top-level request. The executor and store are borrowed, so one stack
/// per worker is all the isolation the protocol needs.
pub struct RestoreStack<'a, E: SqlExecutor + ?Sized> {
    executor: &'a mut E,
    store: &'a mut SnapshotStore,
    skip_marker: &'a str,
    counter: u64,
}

impl<'a, E: SqlExecutor + ?Sized> RestoreStack<'a, E> {
    /// Starts a resolution chain over `executor` and `store`.
    pub fn new(executor: &'a mut E, store: &'a mut SnapshotStore, skip_marker: &'a str) -> Self {
        Self {
            executor,
            store,
            skip_marker,
            counter: 0,
        }
    }

    /// Number of `resolve` and `clean` calls made in this chain so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// The executor, for builders that need to run their own SQL.
    pub fn executor(&mut self) -> &mut E {
        &mut *self.executor
    }

    /// The snapshot cache.
    pub fn store(&self) -> &SnapshotStore {
        &*self.store
    }

    /// Brings the database to the state named `name`.
    ///
    /// Replays the cached snapshot if there is one. Otherwise runs
    /// `builder`, which must call [`resolve`](Self::resolve) or
    /// [`clean`](Self::clean) on the stack it receives, then captures the
    /// result under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::InvalidFixture`] if `builder` made no nested
    /// call; nothing is cached in that case. Builder errors and capture or
    /// replay failures propagate unchanged.
    pub fn resolve<F>(&mut self, name: &str, builder: F) -> Result<Resolution>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.counter += 1;
        let level = self.counter;

        if self.store.restore(&mut *self.executor, name)? {
            debug!(fixture = name, level, "fixture replayed from snapshot");
            return Ok(Resolution::Replayed);
        }

        debug!(fixture = name, level, "building fixture");
        builder(self)?;

        if self.counter == level {
            return Err(SnapshotError::InvalidFixture(name.to_string()));
        }

        self.store
            .capture(&mut *self.executor, name, self.skip_marker)?;
        info!(fixture = name, "fixture built and cached");
        Ok(Resolution::Built)
    }

    /// Resets the database to its clean baseline.
    ///
    /// `initializer` performs the reset itself (cache flushes, schema and
    /// seed loading); the stack only records that a clean happened.
    ///
    /// # Errors
    ///
    /// Propagates the initializer's error.
    pub fn clean<F>(&mut self, initializer: F) -> Result<()>
    where
        F: FnOnce(&mut E) -> Result<()>,
    {
        self.counter += 1;
        debug!(level = self.counter, "cleaning database");
        initializer(&mut *self.executor)
    }

    /// Resolves `name` as the clean baseline itself, so later requests
    /// replay the captured baseline instead of re-running `initializer`.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub fn resolve_clean<F>(&mut self, name: &str, initializer: F) -> Result<Resolution>
    where
        F: FnOnce(&mut E) -> Result<()>,
    {
        self.resolve(name, |stack| stack.clean(initializer))
    }
}
