//! Persistent lifecycle records for hashes and runs.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of a single submitted hash as it moves through the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HashStatus {
    /// Admitted by dedup, not yet picked up by a fetch wave.
    Pending,
    /// A fetch worker currently owns this hash.
    Fetching,
    /// Metadata retrieved and persisted; awaiting dispatch.
    Fetched,
    /// Handed to the analysis engine.
    Analyzing,
    /// Analysis finished and reported.
    Analyzed,
    /// Fetch or analysis failed; retryable once its TTL elapses.
    Failed,
    /// The remote source has no metadata for this hash.
    NotFound,
}

impl HashStatus {
    /// Terminal states are never mutated by a later pipeline stage.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HashStatus::Analyzed | HashStatus::Failed | HashStatus::NotFound
        )
    }

    /// Failure states that become eligible for re-submission after expiry.
    #[must_use]
    pub fn is_retryable_failure(self) -> bool {
        matches!(self, HashStatus::Failed | HashStatus::NotFound)
    }
}

/// One unit of batch input: a hash plus the caller-supplied TTL hint
/// forwarded to the metadata source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashSubmission {
    pub sha256: String,
    pub expiration_seconds: u64,
}

impl HashSubmission {
    pub fn new(sha256: impl Into<String>, expiration_seconds: u64) -> Self {
        Self {
            sha256: sha256.into(),
            expiration_seconds,
        }
    }
}

/// Durable record tracking one distinct content hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HashRecord {
    pub sha256: String,
    pub status: HashStatus,
    pub submitted_at: DateTime<Utc>,
    pub expiration_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub run_id: Uuid,
}

impl HashRecord {
    /// Fresh PENDING record created at admission time.
    pub fn pending(submission: &HashSubmission, run_id: Uuid, submitted_at: DateTime<Utc>) -> Self {
        Self {
            sha256: submission.sha256.clone(),
            status: HashStatus::Pending,
            submitted_at,
            expiration_seconds: submission.expiration_seconds,
            metadata: None,
            error: None,
            run_id,
        }
    }

    /// Whether a retryable failure has outlived its TTL at `now`.
    /// Compared in `u64` so oversized TTLs cannot wrap negative.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now
            .signed_duration_since(self.submitted_at)
            .num_seconds()
            .max(0) as u64;
        age > self.expiration_seconds
    }
}

/// Outcome of one analyze/restart invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

/// Durable record for one pipeline run. The `hash_ids` snapshot is fixed at
/// creation time and preserves submission order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub hash_ids: Vec<String>,
    pub status: RunStatus,
}

impl RunRecord {
    pub fn started(run_id: Uuid, created_at: DateTime<Utc>, hash_ids: Vec<String>) -> Self {
        Self {
            run_id,
            created_at,
            completed_at: None,
            hash_ids,
            status: RunStatus::InProgress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn record(expiration_seconds: u64, age_seconds: i64) -> HashRecord {
        let submission = HashSubmission::new("a".repeat(64), expiration_seconds);
        let submitted_at = Utc::now() - Duration::seconds(age_seconds);
        HashRecord {
            submitted_at,
            ..HashRecord::pending(&submission, Uuid::new_v4(), submitted_at)
        }
    }

    #[test]
    fn terminal_states() {
        assert!(HashStatus::Analyzed.is_terminal());
        assert!(HashStatus::Failed.is_terminal());
        assert!(HashStatus::NotFound.is_terminal());
        assert!(!HashStatus::Fetched.is_terminal());
        assert!(!HashStatus::Pending.is_terminal());
    }

    #[test]
    fn expiry_respects_ttl_boundary() {
        assert!(record(60, 120).is_expired(Utc::now()));
        assert!(!record(3600, 120).is_expired(Utc::now()));
    }

    #[test]
    fn oversized_ttl_never_reads_as_expired() {
        assert!(!record(u64::MAX, 120).is_expired(Utc::now()));
        // A clock that runs behind the submission time is not expiry.
        let fresh = record(60, 0);
        assert!(!fresh.is_expired(fresh.submitted_at - Duration::seconds(30)));
    }

    #[test]
    fn status_uses_wire_names() {
        let json = serde_json::to_string(&HashStatus::NotFound).expect("serialize");
        assert_eq!(json, "\"NOT_FOUND\"");
        let status: HashStatus = serde_json::from_str("\"ANALYZED\"").expect("deserialize");
        assert_eq!(status, HashStatus::Analyzed);
    }
}
