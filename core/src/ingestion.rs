//! Ingestion actor: owns the fetch fan-out for admitted hashes. Commands
//! arrive over an mpsc inbox and answer on oneshot channels, so callers
//! never share mutable state with the fetch workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use bintriage_protocol::HashRecord;
use bintriage_protocol::HashStatus;
use bintriage_protocol::HashSubmission;

use crate::config::IngestionSettings;
use crate::error::ConfigError;
use crate::error::FetchError;
use crate::error::PipelineError;
use crate::error::StorageError;
use crate::source::FetchReply;
use crate::source::MetadataSource;
use crate::state::StateStore;

enum IngestCommand {
    Configure {
        source: Arc<dyn MetadataSource>,
        settings: IngestionSettings,
        reply: oneshot::Sender<()>,
    },
    Submit {
        run_id: Uuid,
        submissions: Vec<HashSubmission>,
        reply: oneshot::Sender<Result<Vec<HashRecord>, PipelineError>>,
    },
    Reload {
        run_id: Uuid,
        reply: oneshot::Sender<Result<Vec<HashRecord>, PipelineError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the ingestion actor. Cheap to clone; dropping every handle
/// stops the actor once its inbox drains.
#[derive(Clone)]
pub struct IngestionCoordinator {
    tx: mpsc::Sender<IngestCommand>,
}

impl IngestionCoordinator {
    /// Spawn the actor task against the given store. The actor starts
    /// unconfigured; `configure` must run before the first `submit`.
    pub fn spawn(store: Arc<dyn StateStore>) -> Self {
        let (tx, rx) = mpsc::channel(32);
        let actor = IngestionActor {
            store,
            source: None,
            settings: IngestionSettings::default(),
            rx,
        };
        tokio::spawn(actor.run());
        Self { tx }
    }

    pub async fn configure(
        &self,
        source: Arc<dyn MetadataSource>,
        settings: IngestionSettings,
    ) -> Result<(), PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IngestCommand::Configure {
                source,
                settings,
                reply,
            })
            .await
            .map_err(|_| PipelineError::ActorClosed)?;
        rx.await.map_err(|_| PipelineError::ActorClosed)
    }

    /// Fetch metadata for every submission and return the records that
    /// reached FETCHED, in submission order.
    pub async fn submit(
        &self,
        run_id: Uuid,
        submissions: Vec<HashSubmission>,
    ) -> Result<Vec<HashRecord>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IngestCommand::Submit {
                run_id,
                submissions,
                reply,
            })
            .await
            .map_err(|_| PipelineError::ActorClosed)?;
        rx.await.map_err(|_| PipelineError::ActorClosed)?
    }

    /// Recover a run's unfinished work: records already FETCHED or
    /// ANALYZING are returned as-is, PENDING and FETCHING ones are fetched
    /// again, terminal ones are skipped. Output follows the run's
    /// submission-order snapshot.
    pub async fn reload(&self, run_id: Uuid) -> Result<Vec<HashRecord>, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IngestCommand::Reload { run_id, reply })
            .await
            .map_err(|_| PipelineError::ActorClosed)?;
        rx.await.map_err(|_| PipelineError::ActorClosed)?
    }

    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(IngestCommand::Shutdown { reply })
            .await
            .map_err(|_| PipelineError::ActorClosed)?;
        rx.await.map_err(|_| PipelineError::ActorClosed)
    }
}

struct IngestionActor {
    store: Arc<dyn StateStore>,
    source: Option<Arc<dyn MetadataSource>>,
    settings: IngestionSettings,
    rx: mpsc::Receiver<IngestCommand>,
}

impl IngestionActor {
    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                IngestCommand::Configure {
                    source,
                    settings,
                    reply,
                } => {
                    self.source = Some(source);
                    self.settings = settings;
                    let _ = reply.send(());
                }
                IngestCommand::Submit {
                    run_id,
                    submissions,
                    reply,
                } => {
                    let _ = reply.send(self.submit(run_id, submissions).await);
                }
                IngestCommand::Reload { run_id, reply } => {
                    let _ = reply.send(self.reload(run_id).await);
                }
                IngestCommand::Shutdown { reply } => {
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    async fn submit(
        &self,
        run_id: Uuid,
        submissions: Vec<HashSubmission>,
    ) -> Result<Vec<HashRecord>, PipelineError> {
        let source = self
            .source
            .clone()
            .ok_or(ConfigError::SourceNotConfigured)?;
        info!(
            op = "ingest.submit",
            run_id = %run_id,
            count = submissions.len(),
            "Fetching metadata batch"
        );
        fetch_batch(
            self.store.clone(),
            source,
            self.settings.clone(),
            submissions,
        )
        .await
    }

    async fn reload(&self, run_id: Uuid) -> Result<Vec<HashRecord>, PipelineError> {
        let source = self
            .source
            .clone()
            .ok_or(ConfigError::SourceNotConfigured)?;
        let Some(run) = self.store.get_run(run_id)? else {
            return Err(PipelineError::UnknownRun { run_id });
        };

        let mut refetch = Vec::new();
        for sha256 in &run.hash_ids {
            let Some(record) = self.store.get_hash(sha256)? else {
                continue;
            };
            if matches!(record.status, HashStatus::Pending | HashStatus::Fetching) {
                refetch.push(HashSubmission::new(
                    record.sha256.clone(),
                    record.expiration_seconds,
                ));
            }
        }
        info!(
            op = "ingest.reload",
            run_id = %run_id,
            refetch = refetch.len(),
            "Reloading unfinished run"
        );
        if !refetch.is_empty() {
            fetch_batch(
                self.store.clone(),
                source,
                self.settings.clone(),
                refetch,
            )
            .await?;
        }

        // Re-read every record after the fetch wave so the merged output
        // reflects final statuses, in the run's submission order.
        let mut ready = Vec::new();
        for sha256 in &run.hash_ids {
            let Some(record) = self.store.get_hash(sha256)? else {
                continue;
            };
            if matches!(record.status, HashStatus::Fetched | HashStatus::Analyzing) {
                ready.push(record);
            }
        }
        Ok(ready)
    }
}

/// Fan a batch out over a bounded worker pool and collect fetched records
/// back into submission order.
async fn fetch_batch(
    store: Arc<dyn StateStore>,
    source: Arc<dyn MetadataSource>,
    settings: IngestionSettings,
    submissions: Vec<HashSubmission>,
) -> Result<Vec<HashRecord>, PipelineError> {
    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let timeout = Duration::from_secs(settings.fetch_timeout_secs);

    let mut join_set = JoinSet::new();
    for (slot, submission) in submissions.iter().cloned().enumerate() {
        let semaphore = semaphore.clone();
        let store = store.clone();
        let source = source.clone();
        join_set.spawn(async move {
            // The semaphore lives for the whole batch, so acquire only
            // fails if the batch future is dropped.
            let _permit = semaphore.acquire_owned().await.ok();
            (slot, fetch_one(store, source, timeout, submission).await)
        });
    }

    let mut slots: Vec<Option<HashRecord>> = vec![None; submissions.len()];
    while let Some(joined) = join_set.join_next().await {
        let (slot, outcome) = joined.map_err(|err| PipelineError::Worker(err.to_string()))?;
        slots[slot] = Some(outcome?);
    }
    Ok(slots
        .into_iter()
        .flatten()
        .filter(|record| record.status == HashStatus::Fetched)
        .collect())
}

/// Fetch metadata for one hash and persist its terminal ingestion status.
/// Fetch failures become FAILED records; only storage errors propagate.
async fn fetch_one(
    store: Arc<dyn StateStore>,
    source: Arc<dyn MetadataSource>,
    timeout: Duration,
    submission: HashSubmission,
) -> Result<HashRecord, PipelineError> {
    let sha256 = submission.sha256.as_str();
    store
        .update_hash(sha256, &mut |record| {
            record.status = HashStatus::Fetching;
            record.error = None;
        })?
        .ok_or_else(|| StorageError::MissingRecord {
            sha256: sha256.to_string(),
        })?;

    let reply = match tokio::time::timeout(
        timeout,
        source.fetch(sha256, submission.expiration_seconds),
    )
    .await
    {
        Ok(reply) => reply,
        Err(_) => Err(FetchError::Timeout {
            seconds: timeout.as_secs(),
        }),
    };

    let updated = match reply {
        Ok(FetchReply::Found(payload)) => store.update_hash(sha256, &mut |record| {
            record.status = HashStatus::Fetched;
            record.metadata = Some(payload.clone());
        })?,
        Ok(FetchReply::NotFound) => {
            warn!(op = "ingest.fetch", sha256, "No metadata for hash");
            store.update_hash(sha256, &mut |record| {
                record.status = HashStatus::NotFound;
            })?
        }
        Err(err) => {
            warn!(op = "ingest.fetch", sha256, %err, "Metadata fetch failed");
            store.update_hash(sha256, &mut |record| {
                record.status = HashStatus::Failed;
                record.error = Some(err.to_string());
            })?
        }
    };
    updated
        .ok_or_else(|| StorageError::MissingRecord {
            sha256: sha256.to_string(),
        })
        .map_err(PipelineError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;

    fn sha(tag: u8) -> String {
        format!("{tag:02x}").repeat(32)
    }

    fn submission(tag: u8) -> HashSubmission {
        HashSubmission::new(sha(tag), 3600)
    }

    /// Source with per-hash scripted outcomes and optional delays to force
    /// out-of-order completion.
    #[derive(Default)]
    struct ScriptedSource {
        delays_ms: HashMap<String, u64>,
        not_found: Vec<String>,
        failing: Vec<String>,
        hang: Vec<String>,
    }

    #[async_trait]
    impl MetadataSource for ScriptedSource {
        async fn fetch(
            &self,
            sha256: &str,
            _expiration_seconds: u64,
        ) -> Result<FetchReply, FetchError> {
            if let Some(delay) = self.delays_ms.get(sha256) {
                tokio::time::sleep(Duration::from_millis(*delay)).await;
            }
            if self.hang.iter().any(|h| h == sha256) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.not_found.iter().any(|h| h == sha256) {
                return Ok(FetchReply::NotFound);
            }
            if self.failing.iter().any(|h| h == sha256) {
                return Err(FetchError::Remote { status: 500 });
            }
            Ok(FetchReply::Found(json!({
                "sha256": sha256,
                "url": format!("https://storage.example/{sha256}"),
                "file_size": 1024,
                "file_available": true,
            })))
        }
    }

    fn admit(store: &Arc<dyn StateStore>, run_id: Uuid, submissions: &[HashSubmission]) {
        for submission in submissions {
            let record = HashRecord::pending(submission, run_id, Utc::now());
            store.upsert_hash(&record).expect("admit");
        }
    }

    async fn coordinator(
        store: Arc<dyn StateStore>,
        source: ScriptedSource,
        settings: IngestionSettings,
    ) -> IngestionCoordinator {
        let coordinator = IngestionCoordinator::spawn(store);
        coordinator
            .configure(Arc::new(source), settings)
            .await
            .expect("configure");
        coordinator
    }

    fn fast_settings() -> IngestionSettings {
        IngestionSettings {
            concurrency: 4,
            fetch_timeout_secs: 1,
            expiration_seconds: 3600,
        }
    }

    #[tokio::test]
    async fn results_keep_submission_order_despite_completion_order() {
        let store = MemoryStateStore::shared();
        let run_id = Uuid::new_v4();
        let batch = vec![submission(1), submission(2), submission(3)];
        admit(&store, run_id, &batch);

        let source = ScriptedSource {
            delays_ms: HashMap::from([(sha(1), 90), (sha(2), 40), (sha(3), 5)]),
            ..Default::default()
        };
        let coordinator = coordinator(store, source, fast_settings()).await;

        let fetched = coordinator.submit(run_id, batch).await.expect("submit");
        let order: Vec<String> = fetched.into_iter().map(|r| r.sha256).collect();
        assert_eq!(order, vec![sha(1), sha(2), sha(3)]);
    }

    #[tokio::test]
    async fn failures_are_isolated_and_recorded() {
        let store = MemoryStateStore::shared();
        let run_id = Uuid::new_v4();
        let batch = vec![submission(1), submission(2), submission(3)];
        admit(&store, run_id, &batch);

        let source = ScriptedSource {
            failing: vec![sha(2)],
            not_found: vec![sha(3)],
            ..Default::default()
        };
        let coordinator = coordinator(store.clone(), source, fast_settings()).await;

        let fetched = coordinator.submit(run_id, batch).await.expect("submit");
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].sha256, sha(1));

        let failed = store.get_hash(&sha(2)).expect("get").expect("record");
        assert_eq!(failed.status, HashStatus::Failed);
        assert!(failed.error.as_deref().expect("error").contains("500"));
        let missing = store.get_hash(&sha(3)).expect("get").expect("record");
        assert_eq!(missing.status, HashStatus::NotFound);
    }

    #[tokio::test]
    async fn slow_fetch_times_out_and_marks_failed() {
        let store = MemoryStateStore::shared();
        let run_id = Uuid::new_v4();
        let batch = vec![submission(1)];
        admit(&store, run_id, &batch);

        let source = ScriptedSource {
            hang: vec![sha(1)],
            ..Default::default()
        };
        let coordinator = coordinator(store.clone(), source, fast_settings()).await;

        let fetched = coordinator.submit(run_id, batch).await.expect("submit");
        assert!(fetched.is_empty());
        let record = store.get_hash(&sha(1)).expect("get").expect("record");
        assert_eq!(record.status, HashStatus::Failed);
        assert!(record.error.as_deref().expect("error").contains("timed out"));
    }

    #[tokio::test]
    async fn submit_before_configure_is_a_config_error() {
        let store = MemoryStateStore::shared();
        let run_id = Uuid::new_v4();
        let batch = vec![submission(1)];
        admit(&store, run_id, &batch);

        let coordinator = IngestionCoordinator::spawn(store);
        let err = coordinator.submit(run_id, batch).await.err().expect("fail");
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::SourceNotConfigured)
        ));
    }

    #[tokio::test]
    async fn reload_refetches_pending_and_keeps_fetched() {
        let store = MemoryStateStore::shared();
        let run_id = Uuid::new_v4();
        let batch = vec![submission(1), submission(2), submission(3)];
        admit(&store, run_id, &batch);
        let run = bintriage_protocol::RunRecord::started(
            run_id,
            Utc::now(),
            batch.iter().map(|s| s.sha256.clone()).collect(),
        );
        store.upsert_run(&run).expect("run");

        // h1 already fetched, h2 interrupted mid-fetch, h3 analyzed.
        store
            .update_hash(&sha(1), &mut |record| {
                record.status = HashStatus::Fetched;
                record.metadata = Some(json!({"sha256": sha(1)}));
            })
            .expect("seed h1");
        store
            .update_hash(&sha(2), &mut |record| {
                record.status = HashStatus::Fetching;
            })
            .expect("seed h2");
        store
            .update_hash(&sha(3), &mut |record| {
                record.status = HashStatus::Analyzed;
            })
            .expect("seed h3");

        let coordinator =
            coordinator(store.clone(), ScriptedSource::default(), fast_settings()).await;
        let ready = coordinator.reload(run_id).await.expect("reload");
        let shas: Vec<String> = ready.iter().map(|r| r.sha256.clone()).collect();
        assert_eq!(shas, vec![sha(1), sha(2)]);

        // h1 kept its original payload rather than being fetched again.
        assert_eq!(
            ready[0].metadata.as_ref().expect("payload"),
            &json!({"sha256": sha(1)})
        );
        assert_eq!(ready[1].status, HashStatus::Fetched);
    }

    #[tokio::test]
    async fn shutdown_stops_the_actor() {
        let store = MemoryStateStore::shared();
        let coordinator = IngestionCoordinator::spawn(store);
        coordinator.shutdown().await.expect("shutdown");
        let err = coordinator
            .submit(Uuid::new_v4(), Vec::new())
            .await
            .err()
            .expect("closed");
        assert!(matches!(err, PipelineError::ActorClosed));
    }
}
