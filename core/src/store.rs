//! In-process cache of named snapshots.
//!
//! Provides [`SnapshotStore`], the session-lifetime mapping from snapshot
//! name to [`Snapshot`]. Nothing is persisted: the store starts empty in
//! every process and is dropped with it.
//!
//! # Example
//!
//! ```no_run
//! # fn demo(executor: &mut impl dbsnap_core::SqlExecutor) -> dbsnap_core::Result<()> {
//! use dbsnap_core::{DEFAULT_SKIP_MARKER, SnapshotStore};
//!
//! let mut store = SnapshotStore::new();
//! store.capture(executor, "seeded", DEFAULT_SKIP_MARKER)?;
//!
//! // ... a test mutates the database ...
//!
//! assert!(store.restore(executor, "seeded")?);
//! assert!(!store.restore(executor, "unknown")?);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use tracing::{debug, info};

use crate::dump::{DumpGenerator, Snapshot};
use crate::error::{Result, SnapshotError};
use crate::executor::SqlExecutor;

/// Named snapshots captured during this session.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshots: HashMap<String, Snapshot>,
}

impl SnapshotStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `snapshot` under its name, replacing any previous entry.
    pub fn save(&mut self, snapshot: Snapshot) {
        let name = snapshot.name().to_string();
        if self.snapshots.insert(name.clone(), snapshot).is_some() {
            debug!(snapshot = %name, "replaced cached snapshot");
        } else {
            debug!(snapshot = %name, "cached snapshot");
        }
    }

    /// Dumps the current database contents and saves them as `name`.
    ///
    /// # Errors
    ///
    /// Propagates introspection and unsupported-type failures from
    /// [`DumpGenerator`]; nothing is stored when generation fails.
    pub fn capture<E: SqlExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
        name: &str,
        skip_marker: &str,
    ) -> Result<&Snapshot> {
        let snapshot = DumpGenerator::new(executor, skip_marker).snapshot(name)?;
        info!(
            snapshot = name,
            tables = snapshot.tables().len(),
            sequences = snapshot.sequences().len(),
            "captured snapshot"
        );
        self.save(snapshot);
        Ok(&self.snapshots[name])
    }

    /// Replays the snapshot named `name` as a single batch.
    ///
    /// Returns `Ok(false)` without touching the database if no such
    /// snapshot exists.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::BatchExecution`] if the batch fails. The
    /// database is then in an unspecified state.
    pub fn restore<E: SqlExecutor + ?Sized>(&self, executor: &mut E, name: &str) -> Result<bool> {
        let Some(snapshot) = self.snapshots.get(name) else {
            debug!(snapshot = name, "no cached snapshot");
            return Ok(false);
        };
        executor
            .execute(&snapshot.to_sql())
            .map_err(SnapshotError::BatchExecution)?;
        debug!(
            snapshot = name,
            statements = snapshot.statements().len(),
            "replayed snapshot"
        );
        Ok(true)
    }

    /// Looks up a snapshot by name.
    pub fn get(&self, name: &str) -> Option<&Snapshot> {
        self.snapshots.get(name)
    }

    /// Returns `true` if a snapshot named `name` is cached.
    pub fn contains(&self, name: &str) -> bool {
        self.snapshots.contains_key(name)
    }

    /// Number of cached snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Returns `true` if nothing has been cached.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Cached snapshot names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.snapshots.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
