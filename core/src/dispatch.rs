//! Sequential bridge between fetched records and the analysis engine.
//! Validation happens here, at dispatch time, never inside the engine.

use std::sync::Arc;

use tracing::info;
use tracing::warn;

use bintriage_protocol::AnalysisResult;
use bintriage_protocol::HashRecord;
use bintriage_protocol::HashStatus;

use crate::engine::AnalysisEngine;
use crate::error::PipelineError;
use crate::metadata::validate_metadata;
use crate::state::StateStore;

pub struct AnalysisDispatch {
    store: Arc<dyn StateStore>,
    engine: Arc<dyn AnalysisEngine>,
}

impl AnalysisDispatch {
    pub fn new(store: Arc<dyn StateStore>, engine: Arc<dyn AnalysisEngine>) -> Self {
        Self { store, engine }
    }

    /// Process fetched records strictly in order, one at a time. Per-hash
    /// failures mark that record FAILED and never stop the batch; only
    /// storage errors abort.
    pub fn process(&self, records: &[HashRecord]) -> Result<Vec<AnalysisResult>, PipelineError> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            if let Some(result) = self.dispatch_one(record)? {
                results.push(result);
            }
        }
        Ok(results)
    }

    fn dispatch_one(&self, record: &HashRecord) -> Result<Option<AnalysisResult>, PipelineError> {
        let payload = match record.metadata.as_ref() {
            Some(payload) => payload,
            None => {
                warn!(op = "dispatch", sha256 = %record.sha256, "Record has no metadata payload");
                self.mark_failed(&record.sha256, "missing metadata payload")?;
                return Ok(Some(AnalysisResult::validation_failure(
                    Some(record.sha256.clone()),
                    self.engine.name(),
                )));
            }
        };

        let metadata = match validate_metadata(payload) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(op = "dispatch", sha256 = %record.sha256, %err, "Metadata failed validation");
                self.mark_failed(&record.sha256, &err.to_string())?;
                // The payload's own hash claim, when it carries one.
                let claimed = payload
                    .get("sha256")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                return Ok(Some(AnalysisResult::validation_failure(
                    claimed,
                    self.engine.name(),
                )));
            }
        };

        self.store.update_hash(&record.sha256, &mut |record| {
            record.status = HashStatus::Analyzing;
        })?;

        match self.engine.analyze(&metadata) {
            Ok(result) => {
                self.store.update_hash(&record.sha256, &mut |record| {
                    record.status = HashStatus::Analyzed;
                })?;
                info!(
                    op = "dispatch",
                    sha256 = %record.sha256,
                    iocs = result.iocs.len(),
                    "Analysis complete"
                );
                Ok(Some(result))
            }
            Err(err) => {
                warn!(op = "dispatch", sha256 = %record.sha256, %err, "Engine invocation failed");
                self.mark_failed(&record.sha256, &err.to_string())?;
                Ok(None)
            }
        }
    }

    fn mark_failed(&self, sha256: &str, message: &str) -> Result<(), PipelineError> {
        self.store.update_hash(sha256, &mut |record| {
            record.status = HashStatus::Failed;
            record.error = Some(message.to_string());
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AnalysisEngine;
    use crate::error::EngineError;
    use crate::state::MemoryStateStore;
    use bintriage_protocol::BinaryMetadata;
    use bintriage_protocol::HashSubmission;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn sha(tag: u8) -> String {
        format!("{tag:02x}").repeat(32)
    }

    /// Engine that counts invocations and fails on request.
    #[derive(Default)]
    struct CountingEngine {
        calls: AtomicUsize,
        fail_on: Vec<String>,
    }

    impl AnalysisEngine for CountingEngine {
        fn name(&self) -> &str {
            "counting"
        }

        fn analyze(&self, metadata: &BinaryMetadata) -> Result<AnalysisResult, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.iter().any(|h| h == &metadata.sha256) {
                return Err(EngineError::msg("scripted failure"));
            }
            Ok(AnalysisResult {
                binary_hash: Some(metadata.sha256.clone()),
                engine_name: "counting".to_string(),
                iocs: Vec::new(),
                success: true,
            })
        }
    }

    fn fetched(tag: u8, payload: serde_json::Value) -> HashRecord {
        let mut record = HashRecord::pending(
            &HashSubmission::new(sha(tag), 3600),
            Uuid::new_v4(),
            Utc::now(),
        );
        record.status = HashStatus::Fetched;
        record.metadata = Some(payload);
        record
    }

    fn valid_payload(tag: u8) -> serde_json::Value {
        json!({
            "sha256": sha(tag),
            "url": format!("https://storage.example/{}", sha(tag)),
            "file_size": 1024,
            "file_available": true,
        })
    }

    fn seeded(records: &[HashRecord]) -> Arc<dyn StateStore> {
        let store = MemoryStateStore::shared();
        for record in records {
            store.upsert_hash(record).expect("seed");
        }
        store
    }

    #[test]
    fn invalid_payload_never_reaches_the_engine() {
        let records = vec![fetched(1, json!({"sha256": sha(1), "url": "u"}))];
        let store = seeded(&records);
        let engine = Arc::new(CountingEngine::default());
        let dispatch = AnalysisDispatch::new(store.clone(), engine.clone());

        let results = dispatch.process(&records).expect("process");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].binary_hash.as_deref(), Some(sha(1).as_str()));

        let record = store.get_hash(&sha(1)).expect("get").expect("record");
        assert_eq!(record.status, HashStatus::Failed);
        assert!(record.error.as_deref().expect("error").contains("file_size"));
    }

    #[test]
    fn engine_failure_marks_record_and_continues() {
        let records = vec![
            fetched(1, valid_payload(1)),
            fetched(2, valid_payload(2)),
            fetched(3, valid_payload(3)),
        ];
        let store = seeded(&records);
        let engine = Arc::new(CountingEngine {
            fail_on: vec![sha(2)],
            ..Default::default()
        });
        let dispatch = AnalysisDispatch::new(store.clone(), engine.clone());

        let results = dispatch.process(&records).expect("process");
        assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
        let reported: Vec<Option<String>> =
            results.iter().map(|r| r.binary_hash.clone()).collect();
        assert_eq!(reported, vec![Some(sha(1)), Some(sha(3))]);

        assert_eq!(
            store.get_hash(&sha(2)).expect("get").expect("r").status,
            HashStatus::Failed
        );
        assert_eq!(
            store.get_hash(&sha(3)).expect("get").expect("r").status,
            HashStatus::Analyzed
        );
    }

    #[test]
    fn results_follow_input_order() {
        let records = vec![
            fetched(3, valid_payload(3)),
            fetched(1, valid_payload(1)),
            fetched(2, valid_payload(2)),
        ];
        let store = seeded(&records);
        let dispatch = AnalysisDispatch::new(store, Arc::new(CountingEngine::default()));
        let results = dispatch.process(&records).expect("process");
        let order: Vec<Option<String>> =
            results.into_iter().map(|r| r.binary_hash).collect();
        assert_eq!(order, vec![Some(sha(3)), Some(sha(1)), Some(sha(2))]);
    }

    #[test]
    fn payload_without_hash_claim_reports_none() {
        let records = vec![fetched(1, json!({"url": "u"}))];
        let store = seeded(&records);
        let dispatch = AnalysisDispatch::new(store, Arc::new(CountingEngine::default()));
        let results = dispatch.process(&records).expect("process");
        assert_eq!(results[0].binary_hash, None);
        assert!(!results[0].success);
    }
}
