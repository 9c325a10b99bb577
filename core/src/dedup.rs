//! Admission-time deduplication: partitions a candidate batch into new,
//! in-flight and already-done work before any fetch is scheduled.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use bintriage_protocol::HashRecord;
use bintriage_protocol::HashStatus;
use bintriage_protocol::HashSubmission;
use bintriage_protocol::RunStatus;

use crate::error::StorageError;
use crate::state::StateStore;

/// Partition of one submitted batch. `new` preserves the caller's
/// submission order; the three sets are disjoint and cover the input.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DedupOutcome {
    pub new: Vec<HashSubmission>,
    pub in_flight: Vec<String>,
    pub already_done: Vec<String>,
}

enum Class {
    New,
    InFlight,
    AlreadyDone,
}

pub struct DedupIndex {
    store: Arc<dyn StateStore>,
    // Serializes the lookup-classify-upsert sequence so two concurrent
    // submissions cannot both admit the same hash as new.
    admission: Mutex<()>,
}

impl DedupIndex {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            admission: Mutex::new(()),
        }
    }

    /// Classify the batch and persist a PENDING record for every hash
    /// admitted as new, attributed to `run_id`. With `force`, terminal
    /// records (ANALYZED, or FAILED/NOT_FOUND still inside their TTL) are
    /// re-admitted; in-flight work is never forced. A non-terminal record
    /// whose owning run is missing or no longer IN_PROGRESS cannot be
    /// resumed by restart, so it is re-admitted rather than left wedged.
    pub fn admit(
        &self,
        run_id: Uuid,
        submissions: &[HashSubmission],
        force: bool,
    ) -> Result<DedupOutcome, StorageError> {
        let _gate = self.admission.lock().expect("dedup admission lock");
        let now = Utc::now();
        let mut outcome = DedupOutcome::default();
        let mut seen: HashSet<&str> = HashSet::new();

        for submission in submissions {
            if !seen.insert(submission.sha256.as_str()) {
                continue;
            }
            let class = match self.store.get_hash(&submission.sha256)? {
                None => Class::New,
                Some(record) => {
                    let resumable = record.status.is_terminal()
                        || self
                            .store
                            .get_run(record.run_id)?
                            .is_some_and(|run| run.status == RunStatus::InProgress);
                    classify(&record, now, force, resumable)
                }
            };
            match class {
                Class::New => {
                    let record = HashRecord::pending(submission, run_id, now);
                    self.store.upsert_hash(&record)?;
                    outcome.new.push(submission.clone());
                }
                Class::InFlight => outcome.in_flight.push(submission.sha256.clone()),
                Class::AlreadyDone => outcome.already_done.push(submission.sha256.clone()),
            }
        }

        debug!(
            run_id = %run_id,
            new = outcome.new.len(),
            in_flight = outcome.in_flight.len(),
            already_done = outcome.already_done.len(),
            "Batch classified"
        );
        Ok(outcome)
    }
}

fn classify(record: &HashRecord, now: DateTime<Utc>, force: bool, resumable: bool) -> Class {
    match record.status {
        HashStatus::Analyzed => {
            if force {
                Class::New
            } else {
                Class::AlreadyDone
            }
        }
        HashStatus::Failed | HashStatus::NotFound => {
            if force || record.is_expired(now) {
                Class::New
            } else {
                Class::InFlight
            }
        }
        // Non-terminal work is in flight only while a live run can still
        // resume it; an orphaned record gets a fresh admission.
        HashStatus::Pending
        | HashStatus::Fetching
        | HashStatus::Fetched
        | HashStatus::Analyzing => {
            if resumable {
                Class::InFlight
            } else {
                Class::New
            }
        }
    }
}
