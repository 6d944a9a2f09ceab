use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{BatchEntryResult, EntitySnapshot, EntityType, MutationEntry};

/// Failure to reach the batch endpoint or to read its reply.
///
/// Distinct from an `error` entry result: the entry may never have been seen
/// by the server and must stay queued.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Remote endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Remote endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response from remote endpoint: {0}")]
    MalformedResponse(String),
}

/// Client-side view of the remote batch applier
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RemoteBatchEndpoint: Send + Sync {
    /// Submit a single entry and wait for its result
    async fn apply(&self, entry: MutationEntry) -> Result<BatchEntryResult, TransportError>;

    /// Fetch the full current list of one entity type
    async fn fetch_all(&self, entity_type: EntityType)
        -> Result<Vec<EntitySnapshot>, TransportError>;
}
