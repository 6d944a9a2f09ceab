use std::sync::Arc;

use common::domain::{
    EntitySnapshot, EntityType, EntryError, EntryErrorKind, EntryStatus, MutationAction,
    MutationEntry, RemoteBatchEndpoint,
};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::connectivity::Connectivity;
use crate::error::LocalStoreError;
use crate::local_store::LocalMutationStore;
use crate::resolve::resolve_references;

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Stored locally for a later sync run
    Queued(u64),
    /// Applied by the server; absent entity for deletes
    Applied(Option<EntitySnapshot>),
    /// The server refused the mutation; nothing was queued
    Rejected(EntryError),
}

/// Write front used by the app: sends directly when it can, queues otherwise
pub struct FieldClient {
    store: Arc<LocalMutationStore>,
    endpoint: Arc<dyn RemoteBatchEndpoint>,
    connectivity: Connectivity,
}

impl FieldClient {
    pub fn new(
        store: Arc<LocalMutationStore>,
        endpoint: Arc<dyn RemoteBatchEndpoint>,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            store,
            endpoint,
            connectivity,
        }
    }

    #[instrument(skip(self, payload), fields(action = %action, entity_type = %entity_type))]
    pub async fn submit(
        &self,
        action: MutationAction,
        entity_type: EntityType,
        payload: Map<String, Value>,
    ) -> Result<SubmitOutcome, LocalStoreError> {
        if !self.connectivity.is_online() {
            return self.queue(action, entity_type, payload);
        }

        // Anything already queued must reach the server first
        if !self.store.list_pending()?.is_empty() {
            return self.queue(action, entity_type, payload);
        }

        let reconciled = self.store.reconciled_ids()?;
        let Ok(resolved) = resolve_references(action, entity_type, &payload, &reconciled) else {
            return self.queue(action, entity_type, payload);
        };

        let entry = MutationEntry {
            action,
            entity_type,
            payload: resolved,
            idempotency_key: None,
        };
        let target_id = entry.target_id();

        let result = match self.endpoint.apply(entry).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "direct dispatch failed, queueing");
                return self.queue(action, entity_type, payload);
            }
        };

        match result.status {
            EntryStatus::Success => {
                match (action, result.entity.as_ref(), target_id) {
                    (MutationAction::Delete, _, Some(id)) => self.store.mirror_remove(entity_type, id)?,
                    (_, Some(entity), _) => self.store.mirror_upsert(entity)?,
                    _ => {}
                }
                Ok(SubmitOutcome::Applied(result.entity))
            }
            EntryStatus::Error => Ok(SubmitOutcome::Rejected(result.error.unwrap_or(EntryError {
                kind: EntryErrorKind::Internal,
                message: "error without reason".to_string(),
            }))),
            EntryStatus::Skipped => self.queue(action, entity_type, payload),
        }
    }

    fn queue(
        &self,
        action: MutationAction,
        entity_type: EntityType,
        payload: Map<String, Value>,
    ) -> Result<SubmitOutcome, LocalStoreError> {
        let local_id = self.store.enqueue(action, entity_type, payload)?;
        debug!(local_id, "mutation queued");
        Ok(SubmitOutcome::Queued(local_id))
    }
}
