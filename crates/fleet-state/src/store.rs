//! StateStore — redb-backed state persistence for Fleet.
//!
//! Provides typed operations over job states and component hashes. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use fleet_core::Component;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(COMPONENT_HASHES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Insert or update a job state.
    pub fn put_job(&self, job: &JobState) -> StateResult<()> {
        let value = serde_json::to_vec(job).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            table
                .insert(job.table_key(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(job = %job.id, stage = %job.stage, "job stored");
        Ok(())
    }

    /// Get a job by id.
    pub fn get_job(&self, id: &str) -> StateResult<Option<JobState>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let job: JobState =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// List all jobs.
    pub fn list_jobs(&self) -> StateResult<Vec<JobState>> {
        self.scan_jobs(|_| true)
    }

    /// List jobs that have not reached a terminal stage.
    pub fn list_active_jobs(&self) -> StateResult<Vec<JobState>> {
        self.scan_jobs(|job| !job.stage.is_terminal())
    }

    fn scan_jobs(&self, keep: impl Fn(&JobState) -> bool) -> StateResult<Vec<JobState>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let job: JobState =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if keep(&job) {
                results.push(job);
            }
        }
        // Oldest first, so the runner advances jobs in creation order.
        results.sort_by_key(|job| job.ts);
        Ok(results)
    }

    /// Delete a job by id. Returns true if it existed.
    pub fn delete_job(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(job = %id, existed, "job deleted");
        Ok(existed)
    }

    // ── Component hashes ───────────────────────────────────────────

    /// Record the last commit built for a component.
    pub fn put_build_hash(&self, component: Component, sha: &str) -> StateResult<()> {
        self.update_hashes(component, |h| h.build_hash = Some(sha.to_string()))
    }

    /// Record the last commit deployed for a component.
    pub fn put_deploy_hash(&self, component: Component, sha: &str) -> StateResult<()> {
        self.update_hashes(component, |h| h.deploy_hash = Some(sha.to_string()))
    }

    /// Get the recorded hashes for a component.
    pub fn get_component_hashes(
        &self,
        component: Component,
    ) -> StateResult<Option<ComponentHashes>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(COMPONENT_HASHES).map_err(map_err!(Table))?;
        match table.get(component.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let hashes: ComponentHashes =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(hashes))
            }
            None => Ok(None),
        }
    }

    /// Read-modify-write of a component's hashes in one write transaction.
    fn update_hashes(
        &self,
        component: Component,
        apply: impl FnOnce(&mut ComponentHashes),
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(COMPONENT_HASHES).map_err(map_err!(Table))?;
            let mut hashes = match table.get(component.as_str()).map_err(map_err!(Read))? {
                Some(guard) => serde_json::from_slice::<ComponentHashes>(guard.value())
                    .map_err(map_err!(Deserialize))?,
                None => ComponentHashes::new(component),
            };
            apply(&mut hashes);
            hashes.updated_at = epoch_secs();
            let value = serde_json::to_vec(&hashes).map_err(map_err!(Serialize))?;
            table
                .insert(hashes.table_key(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%component, "component hashes stored");
        Ok(())
    }
}
