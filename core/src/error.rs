//! Error taxonomy for the pipeline. Per-hash failures (fetch, validation,
//! engine) are recorded on the hash record and never abort sibling work;
//! configuration and storage failures abort the run.

use thiserror::Error;
use uuid::Uuid;

/// Persistence layer failure. Never swallowed: a lost status transition
/// breaks dedup correctness, so these propagate to the run's caller.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),
    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("no record for hash {sha256}")]
    MissingRecord { sha256: String },
}

/// Failure while fetching metadata for a single hash. Local to that hash;
/// the record becomes FAILED and is retryable once its TTL elapses.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("metadata fetch timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("remote rejected request with status {status}")]
    Remote { status: u16 },
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Metadata payload rejected before engine dispatch.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("metadata payload is not an object")]
    NotAnObject,
    #[error("metadata missing required field `{0}`")]
    MissingField(&'static str),
    #[error("metadata field `{field}` has an invalid value")]
    InvalidField { field: &'static str },
    #[error("`{0}` is not a valid sha256 digest")]
    InvalidSha256(String),
}

/// Analysis engine invocation failure. Local to one hash; the run continues.
#[derive(Debug, Error)]
#[error("engine invocation failed: {source}")]
pub struct EngineError {
    #[from]
    source: anyhow::Error,
}

impl EngineError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self {
            source: anyhow::Error::msg(message.into()),
        }
    }
}

/// Configuration problem. Fatal to the run before any state mutation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no state store provider registered under `{0}`")]
    UnknownStoreProvider(String),
    #[error("no analysis engine provider registered under `{0}`")]
    UnknownEngineProvider(String),
    #[error("state store provider `{provider}` failed: {source}")]
    StoreFactory {
        provider: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("engine provider `{provider}` failed: {source}")]
    EngineFactory {
        provider: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("metadata source not configured")]
    SourceNotConfigured,
}

/// Run-level umbrella surfaced to the command layer.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("run {run_id} not found")]
    UnknownRun { run_id: Uuid },
    #[error("no incomplete run to restart")]
    NoIncompleteRun,
    #[error("ingestion worker failed: {0}")]
    Worker(String),
    #[error("ingestion actor unavailable")]
    ActorClosed,
    #[error("report delivery failed: {source}")]
    Report {
        #[source]
        source: anyhow::Error,
    },
}
