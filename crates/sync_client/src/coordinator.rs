use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::domain::{
    idempotency_key, temporary_id, EntitySnapshot, EntityType, EntryStatus, MutationAction,
    MutationEntry, RemoteBatchEndpoint, ID_FIELD,
};
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::connectivity::Connectivity;
use crate::error::{LocalStoreError, SyncErrorKind, SyncFailure};
use crate::local_store::{LocalMutationStore, MutationRecord, RecordState};
use crate::resolve::resolve_references;

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub max_attempts: u32,
    pub refresh_mirror: bool,
    /// How long an unreferenced reconciled id mapping outlives its record
    pub reconciled_retention: chrono::Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            refresh_mirror: true,
            reconciled_retention: chrono::Duration::days(7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Completed,
    /// Another run held the guard; nothing was done
    AlreadyRunning,
    Offline,
    /// The local store failed mid-run; unprocessed records stay queued
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    pub local_id: u64,
    pub failure: SyncFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub status: SyncStatus,
    pub applied: usize,
    pub skipped: usize,
    pub errors: Vec<RecordError>,
    /// Records left out of dispatch because they hit the attempt cap
    pub permanently_failed: Vec<u64>,
}

impl SyncOutcome {
    fn with_status(status: SyncStatus) -> Self {
        Self {
            status,
            applied: 0,
            skipped: 0,
            errors: Vec::new(),
            permanently_failed: Vec::new(),
        }
    }
}

/// Drains the local queue against the remote batch applier
pub struct SyncCoordinator {
    store: Arc<LocalMutationStore>,
    endpoint: Arc<dyn RemoteBatchEndpoint>,
    connectivity: Connectivity,
    options: SyncOptions,
    run_guard: Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<LocalMutationStore>,
        endpoint: Arc<dyn RemoteBatchEndpoint>,
        connectivity: Connectivity,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            endpoint,
            connectivity,
            options,
            run_guard: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<LocalMutationStore> {
        &self.store
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Dispatch every pending record once, in queue order.
    ///
    /// Never fails; per-record problems are reported in the outcome and
    /// the affected records stay queued.
    #[instrument(skip(self))]
    pub async fn run_sync(&self) -> SyncOutcome {
        let Ok(_guard) = self.run_guard.try_lock() else {
            debug!("sync already in progress");
            return SyncOutcome::with_status(SyncStatus::AlreadyRunning);
        };

        if !self.connectivity.is_online() {
            debug!("offline, sync not started");
            return SyncOutcome::with_status(SyncStatus::Offline);
        }

        let mut outcome = SyncOutcome::with_status(SyncStatus::Completed);
        if let Err(e) = self.drain(&mut outcome).await {
            error!(error = %e, "sync run aborted by local store failure");
            outcome.status = SyncStatus::Aborted {
                reason: e.to_string(),
            };
            return outcome;
        }

        if let Err(e) = self
            .store
            .prune_reconciled(Utc::now() - self.options.reconciled_retention)
        {
            warn!(error = %e, "pruning reconciled ids failed");
        }

        if self.options.refresh_mirror {
            self.refresh_mirror().await;
        }

        info!(
            applied = outcome.applied,
            skipped = outcome.skipped,
            errors = outcome.errors.len(),
            permanently_failed = outcome.permanently_failed.len(),
            "sync run completed"
        );
        outcome
    }

    async fn drain(&self, outcome: &mut SyncOutcome) -> Result<(), LocalStoreError> {
        let device_id = self.store.device_id()?;
        let mut reconciled = self.store.reconciled_ids()?;
        // Entities with an earlier record left queued this run
        let mut blocked: HashSet<(EntityType, i64)> = HashSet::new();

        for record in self.store.list_pending()? {
            let resolved = resolve_references(
                record.action,
                record.entity_type,
                &record.payload,
                &reconciled,
            );
            let target = record_target(&record, resolved.as_ref().unwrap_or(&record.payload));

            if record.state == RecordState::PermanentlyFailed {
                outcome.permanently_failed.push(record.local_id);
                blocked.extend(target);
                continue;
            }

            if target.is_some_and(|t| blocked.contains(&t)) {
                debug!(
                    local_id = record.local_id,
                    "skipping record behind a queued record for the same entity"
                );
                outcome.skipped += 1;
                continue;
            }

            let payload = match resolved {
                Ok(payload) => payload,
                Err(unresolved) => {
                    debug!(
                        local_id = record.local_id,
                        unresolved, "skipping record with unreconciled reference"
                    );
                    outcome.skipped += 1;
                    blocked.extend(target);
                    continue;
                }
            };

            let entry = MutationEntry {
                action: record.action,
                entity_type: record.entity_type,
                payload,
                idempotency_key: Some(idempotency_key(&device_id, record.local_id)),
            };
            let target_id = entry.target_id();

            let completed = match self.endpoint.apply(entry).await {
                Ok(result) => match result.status {
                    EntryStatus::Success => {
                        if result.duplicate {
                            debug!(local_id = record.local_id, "server reported replayed entry");
                        }
                        self.complete(
                            &record,
                            target_id,
                            result.entity.as_ref(),
                            &mut reconciled,
                            outcome,
                        )?
                    }
                    EntryStatus::Error => {
                        let failure = result
                            .error
                            .as_ref()
                            .map(SyncFailure::from)
                            .unwrap_or_else(|| {
                                SyncFailure::new(SyncErrorKind::Internal, "error without reason")
                            });
                        self.fail(&record, failure, outcome)?;
                        false
                    }
                    EntryStatus::Skipped => {
                        outcome.skipped += 1;
                        false
                    }
                },
                Err(e) => {
                    warn!(local_id = record.local_id, error = %e, "dispatch failed");
                    self.fail(&record, SyncFailure::from(&e), outcome)?;
                    false
                }
            };

            if !completed {
                blocked.extend(target);
            }
        }

        Ok(())
    }

    /// Returns whether the record left the queue
    fn complete(
        &self,
        record: &MutationRecord,
        target_id: Option<i64>,
        entity: Option<&EntitySnapshot>,
        reconciled: &mut HashMap<u64, i64>,
        outcome: &mut SyncOutcome,
    ) -> Result<bool, LocalStoreError> {
        match record.action {
            MutationAction::Create => {
                let Some(entity) = entity else {
                    let failure =
                        SyncFailure::new(SyncErrorKind::Internal, "create result carried no entity");
                    self.fail(record, failure, outcome)?;
                    return Ok(false);
                };
                self.store.complete_create(record.local_id, entity)?;
                reconciled.insert(record.local_id, entity.id());
                debug!(local_id = record.local_id, server_id = entity.id(), "create reconciled");
            }
            MutationAction::Update => self.store.complete_update(record.local_id, entity)?,
            MutationAction::Delete => match target_id {
                Some(id) => self
                    .store
                    .complete_delete(record.local_id, record.entity_type, id)?,
                None => {
                    self.store.remove(record.local_id)?;
                }
            },
        }
        outcome.applied += 1;
        Ok(true)
    }

    fn fail(
        &self,
        record: &MutationRecord,
        failure: SyncFailure,
        outcome: &mut SyncOutcome,
    ) -> Result<(), LocalStoreError> {
        let state =
            self.store
                .record_failure(record.local_id, failure.clone(), self.options.max_attempts)?;
        if state == RecordState::PermanentlyFailed {
            outcome.permanently_failed.push(record.local_id);
        }
        outcome.errors.push(RecordError {
            local_id: record.local_id,
            failure,
        });
        Ok(())
    }

    async fn refresh_mirror(&self) {
        for entity_type in EntityType::ALL {
            let entities = match self.endpoint.fetch_all(entity_type).await {
                Ok(entities) => entities,
                Err(e) => {
                    warn!(entity_type = %entity_type, error = %e, "mirror refresh failed");
                    continue;
                }
            };
            if let Err(e) = self.store.replace_mirror(entity_type, &entities) {
                warn!(entity_type = %entity_type, error = %e, "mirror rewrite failed");
            }
        }
    }
}

/// Entity a record writes to: its temporary id for a `Create`, else the
/// payload's `id`
fn record_target(
    record: &MutationRecord,
    payload: &Map<String, Value>,
) -> Option<(EntityType, i64)> {
    let id = match record.action {
        MutationAction::Create => temporary_id(record.local_id),
        MutationAction::Update | MutationAction::Delete => payload.get(ID_FIELD)?.as_i64()?,
    };
    Some((record.entity_type, id))
}
