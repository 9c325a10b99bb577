//! Metadata retrieval seam. The pipeline only ever sees this trait; the
//! concrete source (UBS-style REST endpoint, replay file, test double) is
//! injected by the caller.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::FetchError;

/// Outcome of one metadata lookup. `NotFound` is a definitive answer from
/// the source, distinct from transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchReply {
    Found(Value),
    NotFound,
}

/// Async metadata lookup for a single hash. Implementations forward
/// `expiration_seconds` as the remote-side download-URL TTL hint.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn fetch(&self, sha256: &str, expiration_seconds: u64)
    -> Result<FetchReply, FetchError>;
}
