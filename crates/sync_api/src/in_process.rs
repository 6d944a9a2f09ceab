use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::domain::{
    BatchEntryResult, EntitySnapshot, EntityType, MutationEntry, RemoteBatchEndpoint,
    TransportError,
};

use crate::domain::{BatchApplier, EntityQueryService};

/// Calls the batch applier directly, without HTTP.
///
/// Used by embedded deployments and tests. The endpoint can be made
/// unreachable to exercise transport failures.
#[derive(Clone)]
pub struct InProcessBatchEndpoint {
    applier: Arc<BatchApplier>,
    queries: Arc<EntityQueryService>,
    reachable: Arc<AtomicBool>,
}

impl InProcessBatchEndpoint {
    pub fn new(applier: Arc<BatchApplier>, queries: Arc<EntityQueryService>) -> Self {
        Self {
            applier,
            queries,
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> Result<(), TransportError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unreachable(
                "in-process endpoint disconnected".to_string(),
            ))
        }
    }
}

#[async_trait]
impl RemoteBatchEndpoint for InProcessBatchEndpoint {
    async fn apply(&self, entry: MutationEntry) -> Result<BatchEntryResult, TransportError> {
        self.ensure_reachable()?;
        Ok(self.applier.apply(entry).await)
    }

    async fn fetch_all(
        &self,
        entity_type: EntityType,
    ) -> Result<Vec<EntitySnapshot>, TransportError> {
        self.ensure_reachable()?;
        self.queries
            .list(entity_type)
            .await
            .map_err(|e| TransportError::Status {
                status: 500,
                body: e.to_string(),
            })
    }
}
