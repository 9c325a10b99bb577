//! Sled-backed state store: two trees keyed by hash digest and run id,
//! JSON-encoded values. Read-modify-write transitions are serialized
//! through an internal mutex so concurrent writers cannot lose updates.

use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use bintriage_protocol::HashRecord;
use bintriage_protocol::RunRecord;
use bintriage_protocol::RunStatus;

use super::StateStore;
use crate::config::DatabaseConfig;
use crate::error::StorageError;

const HASHES_TREE: &str = "hashes";
const RUNS_TREE: &str = "runs";

pub struct SledStateStore {
    hashes: sled::Tree,
    runs: sled::Tree,
    rmw: Mutex<()>,
}

impl SledStateStore {
    /// Open the store at the configured location, or a temporary database
    /// when no location is set.
    pub fn open(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let mut builder = sled::Config::new();
        match config.location.as_ref() {
            Some(path) => builder = builder.path(path),
            None => builder = builder.temporary(true),
        }
        let db = builder.open()?;
        Ok(Self {
            hashes: db.open_tree(HASHES_TREE)?,
            runs: db.open_tree(RUNS_TREE)?,
            rmw: Mutex::new(()),
        })
    }
}

impl StateStore for SledStateStore {
    fn upsert_hash(&self, record: &HashRecord) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec(record)?;
        self.hashes.insert(record.sha256.as_bytes(), encoded)?;
        Ok(())
    }

    fn get_hash(&self, sha256: &str) -> Result<Option<HashRecord>, StorageError> {
        match self.hashes.get(sha256.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn update_hash(
        &self,
        sha256: &str,
        apply: &mut dyn FnMut(&mut HashRecord),
    ) -> Result<Option<HashRecord>, StorageError> {
        let _gate = self.rmw.lock().expect("state store rmw lock");
        let Some(value) = self.hashes.get(sha256.as_bytes())? else {
            return Ok(None);
        };
        let mut record: HashRecord = serde_json::from_slice(&value)?;
        apply(&mut record);
        let encoded = serde_json::to_vec(&record)?;
        self.hashes.insert(sha256.as_bytes(), encoded)?;
        Ok(Some(record))
    }

    fn list_hashes(&self, run_id: Uuid) -> Result<Vec<HashRecord>, StorageError> {
        let Some(run) = self.get_run(run_id)? else {
            return Ok(Vec::new());
        };
        let mut records = Vec::with_capacity(run.hash_ids.len());
        for sha256 in &run.hash_ids {
            if let Some(record) = self.get_hash(sha256)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn upsert_run(&self, record: &RunRecord) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec(record)?;
        self.runs.insert(record.run_id.as_bytes(), encoded)?;
        Ok(())
    }

    fn get_run(&self, run_id: Uuid) -> Result<Option<RunRecord>, StorageError> {
        match self.runs.get(run_id.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn latest_incomplete_run(&self) -> Result<Option<RunRecord>, StorageError> {
        let mut latest: Option<RunRecord> = None;
        for item in self.runs.iter() {
            let (_, value) = item?;
            let run: RunRecord = serde_json::from_slice(&value)?;
            if run.status != RunStatus::InProgress {
                continue;
            }
            let newer = latest
                .as_ref()
                .is_none_or(|current| run.created_at > current.created_at);
            if newer {
                latest = Some(run);
            }
        }
        Ok(latest)
    }

    fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut removed = 0usize;
        for item in self.hashes.iter() {
            let (key, value) = item?;
            let record: HashRecord = serde_json::from_slice(&value)?;
            if record.submitted_at <= cutoff {
                self.hashes.remove(key)?;
                removed += 1;
            }
        }
        for item in self.runs.iter() {
            let (key, value) = item?;
            let run: RunRecord = serde_json::from_slice(&value)?;
            if run.created_at <= cutoff {
                self.runs.remove(key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
