//! Run controller: the command surface tying admission, ingestion,
//! dispatch and reporting into one durable run.

use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use tracing::error;
use tracing::info;
use uuid::Uuid;

use bintriage_protocol::HashRecord;
use bintriage_protocol::HashSubmission;
use bintriage_protocol::RunRecord;
use bintriage_protocol::RunStatus;

use crate::config::TriageConfig;
use crate::dedup::DedupIndex;
use crate::dispatch::AnalysisDispatch;
use crate::engine::AnalysisEngine;
use crate::engine::EngineRegistry;
use crate::error::PipelineError;
use crate::ingestion::IngestionCoordinator;
use crate::report::ReportSink;
use crate::source::MetadataSource;
use crate::state::StateStore;
use crate::state::StoreRegistry;

/// What one analyze/restart invocation did, by the numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub submitted: usize,
    pub new: usize,
    pub in_flight: usize,
    pub already_done: usize,
    pub fetched: usize,
    pub reported: usize,
}

/// Result of a `clear` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// Records at or before the cutoff were removed.
    Pruned(usize),
    /// The operator declined the confirmation prompt.
    Cancelled,
}

pub struct RunController {
    store: Arc<dyn StateStore>,
    dedup: DedupIndex,
    ingest: IngestionCoordinator,
    dispatch: AnalysisDispatch,
    sink: Arc<dyn ReportSink>,
    feed_id: String,
}

impl RunController {
    pub async fn new(
        store: Arc<dyn StateStore>,
        source: Arc<dyn MetadataSource>,
        engine: Arc<dyn AnalysisEngine>,
        sink: Arc<dyn ReportSink>,
        settings: crate::config::IngestionSettings,
        feed_id: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let ingest = IngestionCoordinator::spawn(store.clone());
        ingest.configure(source, settings).await?;
        Ok(Self {
            dedup: DedupIndex::new(store.clone()),
            dispatch: AnalysisDispatch::new(store.clone(), engine),
            store,
            ingest,
            sink,
            feed_id: feed_id.into(),
        })
    }

    /// Assemble a controller from configuration, resolving the store and
    /// engine through their provider registries.
    pub async fn from_config(
        config: &TriageConfig,
        stores: &StoreRegistry,
        engines: &EngineRegistry,
        source: Arc<dyn MetadataSource>,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self, PipelineError> {
        let store = stores.create(&config.database)?;
        let engine = engines.create(&config.engine)?;
        Self::new(
            store,
            source,
            engine,
            sink,
            config.ingestion.clone(),
            config.engine.feed_id.clone(),
        )
        .await
    }

    /// Run the full pipeline over a batch of hashes. With `force`,
    /// already-analyzed hashes are re-admitted.
    pub async fn analyze(
        &self,
        submissions: Vec<HashSubmission>,
        force: bool,
    ) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        let outcome = self.dedup.admit(run_id, &submissions, force)?;
        let hash_ids: Vec<String> = outcome.new.iter().map(|s| s.sha256.clone()).collect();
        let run = RunRecord::started(run_id, Utc::now(), hash_ids);
        self.store.upsert_run(&run)?;
        info!(
            op = "run.analyze",
            run_id = %run_id,
            submitted = submissions.len(),
            new = outcome.new.len(),
            in_flight = outcome.in_flight.len(),
            already_done = outcome.already_done.len(),
            "Run created"
        );

        let mut summary = RunSummary {
            run_id,
            submitted: submissions.len(),
            new: outcome.new.len(),
            in_flight: outcome.in_flight.len(),
            already_done: outcome.already_done.len(),
            fetched: 0,
            reported: 0,
        };
        if outcome.new.is_empty() {
            self.finish_run(run_id, RunStatus::Completed)?;
            return Ok(summary);
        }

        match self.ingest_and_report(run_id, outcome.new).await {
            Ok((fetched, reported)) => {
                summary.fetched = fetched;
                summary.reported = reported;
                self.finish_run(run_id, RunStatus::Completed)?;
                info!(op = "run.analyze", run_id = %run_id, reported, "Run completed");
                Ok(summary)
            }
            Err(err) => {
                error!(op = "run.analyze", run_id = %run_id, %err, "Run failed");
                self.finish_run(run_id, RunStatus::Failed)?;
                Err(err)
            }
        }
    }

    /// Resume the most recent unfinished run: fetched records go straight
    /// to dispatch, interrupted fetches are retried, finished hashes are
    /// left untouched.
    pub async fn restart(&self) -> Result<RunSummary, PipelineError> {
        let run = self
            .store
            .latest_incomplete_run()?
            .ok_or(PipelineError::NoIncompleteRun)?;
        let run_id = run.run_id;
        info!(
            op = "run.restart",
            run_id = %run_id,
            hashes = run.hash_ids.len(),
            "Resuming run"
        );

        let outcome = async {
            let ready = self.ingest.reload(run_id).await?;
            let fetched = ready.len();
            let results = self.dispatch.process(&ready)?;
            self.sink
                .send(&results, &self.feed_id)
                .await
                .map_err(|source| PipelineError::Report { source })?;
            Ok((fetched, results.len()))
        }
        .await;

        match outcome {
            Ok((fetched, reported)) => {
                self.finish_run(run_id, RunStatus::Completed)?;
                Ok(RunSummary {
                    run_id,
                    submitted: run.hash_ids.len(),
                    new: 0,
                    in_flight: 0,
                    already_done: 0,
                    fetched,
                    reported,
                })
            }
            Err(err) => {
                error!(op = "run.restart", run_id = %run_id, %err, "Restart failed");
                self.finish_run(run_id, RunStatus::Failed)?;
                Err(err)
            }
        }
    }

    /// Remove all state at or before `cutoff`. Destructive, so unless
    /// `force` is set the operator is asked to confirm first.
    pub fn clear(
        &self,
        cutoff: DateTime<Utc>,
        force: bool,
        prompt: impl FnOnce(&str) -> bool,
    ) -> Result<ClearOutcome, PipelineError> {
        if !force {
            let question = format!("Remove all pipeline state up to {cutoff}?");
            if !prompt(&question) {
                info!(op = "run.clear", "Clear cancelled by operator");
                return Ok(ClearOutcome::Cancelled);
            }
        }
        let removed = self.store.prune(cutoff)?;
        info!(op = "run.clear", removed, "State cleared");
        Ok(ClearOutcome::Pruned(removed))
    }

    /// Lifecycle records for one run, in submission order.
    pub fn run_records(&self, run_id: Uuid) -> Result<Vec<HashRecord>, PipelineError> {
        if self.store.get_run(run_id)?.is_none() {
            return Err(PipelineError::UnknownRun { run_id });
        }
        Ok(self.store.list_hashes(run_id)?)
    }

    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        self.ingest.shutdown().await
    }

    async fn ingest_and_report(
        &self,
        run_id: Uuid,
        admitted: Vec<HashSubmission>,
    ) -> Result<(usize, usize), PipelineError> {
        let fetched = self.ingest.submit(run_id, admitted).await?;
        let results = self.dispatch.process(&fetched)?;
        self.sink
            .send(&results, &self.feed_id)
            .await
            .map_err(|source| PipelineError::Report { source })?;
        Ok((fetched.len(), results.len()))
    }

    fn finish_run(&self, run_id: Uuid, status: RunStatus) -> Result<(), PipelineError> {
        let Some(mut run) = self.store.get_run(run_id)? else {
            return Err(PipelineError::UnknownRun { run_id });
        };
        run.status = status;
        run.completed_at = Some(Utc::now());
        self.store.upsert_run(&run)?;
        Ok(())
    }
}
