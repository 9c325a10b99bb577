//! Durable, crash-tolerant storage for hash and run lifecycle records.
//! The concrete backend is a configuration detail resolved by provider
//! name through [`StoreRegistry`].

pub mod memory;
pub mod sled_store;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use bintriage_protocol::HashRecord;
use bintriage_protocol::RunRecord;

use crate::config::DatabaseConfig;
use crate::error::ConfigError;
use crate::error::StorageError;

pub use memory::MemoryStateStore;
pub use sled_store::SledStateStore;

/// Contract for lifecycle persistence. Writes are atomic per record key;
/// storage failures always surface as [`StorageError`] because a lost
/// status transition breaks dedup correctness.
pub trait StateStore: Send + Sync {
    /// Insert or overwrite the record keyed by its `sha256`.
    fn upsert_hash(&self, record: &HashRecord) -> Result<(), StorageError>;

    fn get_hash(&self, sha256: &str) -> Result<Option<HashRecord>, StorageError>;

    /// Atomic read-modify-write for a single hash record. Returns the
    /// updated record, or `None` when no record exists for the key.
    fn update_hash(
        &self,
        sha256: &str,
        apply: &mut dyn FnMut(&mut HashRecord),
    ) -> Result<Option<HashRecord>, StorageError>;

    /// Records for a run in its submission-order `hash_ids` snapshot.
    /// Hashes pruned since the run was created are skipped.
    fn list_hashes(&self, run_id: Uuid) -> Result<Vec<HashRecord>, StorageError>;

    fn upsert_run(&self, record: &RunRecord) -> Result<(), StorageError>;

    fn get_run(&self, run_id: Uuid) -> Result<Option<RunRecord>, StorageError>;

    /// Most recently created run still IN_PROGRESS, if any.
    fn latest_incomplete_run(&self) -> Result<Option<RunRecord>, StorageError>;

    /// Delete every hash record with `submitted_at <= cutoff` and every run
    /// record with `created_at <= cutoff`. Returns the number of records
    /// removed; calling again with the same cutoff removes nothing.
    fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;
}

/// Factory resolved from a configured provider name.
pub type StoreFactory =
    Arc<dyn Fn(&DatabaseConfig) -> Result<Arc<dyn StateStore>, ConfigError> + Send + Sync>;

/// Registry of state store providers keyed by name. Unknown names fail with
/// an explicit [`ConfigError`] instead of any runtime dynamic loading.
#[derive(Default)]
pub struct StoreRegistry {
    factories: RwLock<HashMap<String, StoreFactory>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Registry pre-populated with the built-in `memory` and `sled`
    /// providers.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("memory", Arc::new(|_config| Ok(MemoryStateStore::shared())));
        registry.register(
            "sled",
            Arc::new(|config: &DatabaseConfig| {
                let store = SledStateStore::open(config).map_err(|err| {
                    ConfigError::StoreFactory {
                        provider: "sled".to_string(),
                        source: anyhow::Error::new(err),
                    }
                })?;
                Ok(Arc::new(store) as Arc<dyn StateStore>)
            }),
        );
        registry
    }

    pub fn register(&self, provider: impl Into<String>, factory: StoreFactory) {
        let mut guard = self.factories.write().expect("store registry lock");
        guard.insert(provider.into(), factory);
    }

    pub fn create(&self, config: &DatabaseConfig) -> Result<Arc<dyn StateStore>, ConfigError> {
        let factory = {
            let guard = self.factories.read().expect("store registry lock");
            guard.get(&config.provider).cloned()
        };
        match factory {
            Some(factory) => factory(config),
            None => Err(ConfigError::UnknownStoreProvider(config.provider.clone())),
        }
    }
}
