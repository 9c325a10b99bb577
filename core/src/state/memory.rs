//! In-memory state store, used by tests and short-lived one-shot runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use bintriage_protocol::HashRecord;
use bintriage_protocol::RunRecord;
use bintriage_protocol::RunStatus;

use super::StateStore;
use crate::error::StorageError;

#[derive(Debug, Default)]
struct MemoryInner {
    hashes: HashMap<String, HashRecord>,
    runs: HashMap<Uuid, RunRecord>,
}

/// Mutex-guarded map store. Every operation holds the single lock, which
/// gives per-key atomicity for free.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<dyn StateStore> {
        Arc::new(Self::new())
    }
}

impl StateStore for MemoryStateStore {
    fn upsert_hash(&self, record: &HashRecord) -> Result<(), StorageError> {
        let mut guard = self.inner.lock().expect("state store lock");
        guard.hashes.insert(record.sha256.clone(), record.clone());
        Ok(())
    }

    fn get_hash(&self, sha256: &str) -> Result<Option<HashRecord>, StorageError> {
        let guard = self.inner.lock().expect("state store lock");
        Ok(guard.hashes.get(sha256).cloned())
    }

    fn update_hash(
        &self,
        sha256: &str,
        apply: &mut dyn FnMut(&mut HashRecord),
    ) -> Result<Option<HashRecord>, StorageError> {
        let mut guard = self.inner.lock().expect("state store lock");
        match guard.hashes.get_mut(sha256) {
            Some(record) => {
                apply(record);
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    fn list_hashes(&self, run_id: Uuid) -> Result<Vec<HashRecord>, StorageError> {
        let guard = self.inner.lock().expect("state store lock");
        let Some(run) = guard.runs.get(&run_id) else {
            return Ok(Vec::new());
        };
        let records = run
            .hash_ids
            .iter()
            .filter_map(|sha256| guard.hashes.get(sha256).cloned())
            .collect();
        Ok(records)
    }

    fn upsert_run(&self, record: &RunRecord) -> Result<(), StorageError> {
        let mut guard = self.inner.lock().expect("state store lock");
        guard.runs.insert(record.run_id, record.clone());
        Ok(())
    }

    fn get_run(&self, run_id: Uuid) -> Result<Option<RunRecord>, StorageError> {
        let guard = self.inner.lock().expect("state store lock");
        Ok(guard.runs.get(&run_id).cloned())
    }

    fn latest_incomplete_run(&self) -> Result<Option<RunRecord>, StorageError> {
        let guard = self.inner.lock().expect("state store lock");
        let latest = guard
            .runs
            .values()
            .filter(|run| run.status == RunStatus::InProgress)
            .max_by_key(|run| run.created_at)
            .cloned();
        Ok(latest)
    }

    fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut guard = self.inner.lock().expect("state store lock");
        let hashes_before = guard.hashes.len();
        let runs_before = guard.runs.len();
        guard.hashes.retain(|_, record| record.submitted_at > cutoff);
        guard.runs.retain(|_, run| run.created_at > cutoff);
        let removed = hashes_before - guard.hashes.len() + runs_before - guard.runs.len();
        Ok(removed)
    }
}
