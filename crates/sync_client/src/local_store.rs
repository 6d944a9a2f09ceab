//! Durable queue of pending mutations plus the local read cache.
//!
//! Tables:
//! - mutations: local_id → JSON `MutationRecord`
//! - meta: key → bytes (local id counter, last enqueue stamp, device id)
//! - reconciled_ids: local_id of a completed `Create` → (server id, reconciled at µs)
//! - mirror_*: entity id (negative while provisional) → JSON `MirrorEntry`
//!
//! Every operation is a single redb write transaction committed with
//! immediate durability, so a returned call survives a crash.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use common::domain::{
    temporary_id, EntityRef, EntitySnapshot, EntityType, MutationAction, FUND_FIELD, ID_FIELD,
};
use redb::{
    backends::InMemoryBackend, Database, ReadableTable, TableDefinition, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::error::{LocalStoreError, SyncFailure};

const MUTATIONS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("mutations");
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const RECONCILED_TABLE: TableDefinition<u64, (i64, i64)> = TableDefinition::new("reconciled_ids");
const BENEFICIARY_MIRROR: TableDefinition<i64, &[u8]> =
    TableDefinition::new("mirror_beneficiary");
const FUND_MIRROR: TableDefinition<i64, &[u8]> = TableDefinition::new("mirror_fund");
const TRANSACTION_MIRROR: TableDefinition<i64, &[u8]> =
    TableDefinition::new("mirror_transaction");

const META_NEXT_LOCAL_ID: &str = "next_local_id";
const META_LAST_ENQUEUED_AT: &str = "last_enqueued_at";
const META_DEVICE_ID: &str = "device_id";

fn mirror_table(entity_type: EntityType) -> TableDefinition<'static, i64, &'static [u8]> {
    match entity_type {
        EntityType::Beneficiary => BENEFICIARY_MIRROR,
        EntityType::Fund => FUND_MIRROR,
        EntityType::Transaction => TRANSACTION_MIRROR,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    Pending,
    /// Hit the attempt cap; kept for the user but no longer dispatched
    PermanentlyFailed,
}

/// One queued write intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub local_id: u64,
    pub action: MutationAction,
    pub entity_type: EntityType,
    pub payload: Map<String, Value>,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<SyncFailure>,
    pub state: RecordState,
}

/// Last known field values of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorEntry {
    pub id: i64,
    pub fields: Map<String, Value>,
    /// Created offline and not yet confirmed by the server
    pub provisional: bool,
}

impl MirrorEntry {
    fn authoritative(entity: &EntitySnapshot) -> Self {
        Self {
            id: entity.id(),
            fields: entity.to_fields(),
            provisional: false,
        }
    }
}

pub struct LocalMutationStore {
    db: Database,
}

impl LocalMutationStore {
    /// Open or create the store file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LocalStoreError> {
        let path = path.as_ref();
        info!("opening local mutation store at {}", path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LocalStoreError::from(redb::Error::Io(e)))?;
        }
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Store without a backing file, for tests and previews
    pub fn in_memory() -> Result<Self, LocalStoreError> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, LocalStoreError> {
        let tx = db.begin_write()?;
        {
            tx.open_table(MUTATIONS_TABLE)?;
            tx.open_table(RECONCILED_TABLE)?;
            for entity_type in EntityType::ALL {
                tx.open_table(mirror_table(entity_type))?;
            }

            let mut meta = tx.open_table(META_TABLE)?;
            let has_device_id = meta.get(META_DEVICE_ID)?.is_some();
            if !has_device_id {
                let device_id = xid::new().to_string();
                info!(device_id = %device_id, "assigned new device id");
                meta.insert(META_DEVICE_ID, device_id.as_bytes())?;
            }
        }
        tx.commit()?;
        Ok(Self { db })
    }

    /// Stable identifier of this device, used to build idempotency keys
    pub fn device_id(&self) -> Result<String, LocalStoreError> {
        let tx = self.db.begin_read()?;
        let meta = tx.open_table(META_TABLE)?;
        let raw = meta
            .get(META_DEVICE_ID)?
            .map(|guard| guard.value().to_vec())
            .ok_or_else(|| LocalStoreError::Corrupt {
                key: META_DEVICE_ID.to_string(),
                reason: "missing".to_string(),
            })?;
        String::from_utf8(raw).map_err(|e| LocalStoreError::Corrupt {
            key: META_DEVICE_ID.to_string(),
            reason: e.to_string(),
        })
    }

    /// Durably append a mutation and return its local id.
    ///
    /// A `Create` also gets a provisional mirror entry keyed by its
    /// temporary id.
    #[instrument(skip(self, payload), fields(action = %action, entity_type = %entity_type))]
    pub fn enqueue(
        &self,
        action: MutationAction,
        entity_type: EntityType,
        payload: Map<String, Value>,
    ) -> Result<u64, LocalStoreError> {
        self.enqueue_at(action, entity_type, payload, Utc::now())
    }

    fn enqueue_at(
        &self,
        action: MutationAction,
        entity_type: EntityType,
        payload: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<u64, LocalStoreError> {
        let tx = self.db.begin_write()?;
        let local_id = next_local_id(&tx)?;
        let enqueued_at = next_enqueue_stamp(&tx, now)?;

        if action == MutationAction::Create {
            let temp_id = temporary_id(local_id);
            let mut fields = payload.clone();
            fields.insert(ID_FIELD.to_string(), Value::from(temp_id));
            let entry = MirrorEntry {
                id: temp_id,
                fields,
                provisional: true,
            };
            let mut mirror = tx.open_table(mirror_table(entity_type))?;
            mirror.insert(temp_id, serde_json::to_vec(&entry)?.as_slice())?;
        }

        let record = MutationRecord {
            local_id,
            action,
            entity_type,
            payload,
            enqueued_at,
            attempts: 0,
            last_error: None,
            state: RecordState::Pending,
        };
        {
            let mut mutations = tx.open_table(MUTATIONS_TABLE)?;
            mutations.insert(local_id, serde_json::to_vec(&record)?.as_slice())?;
        }
        tx.commit()?;

        debug!(local_id, "mutation enqueued");
        Ok(local_id)
    }

    /// Every queued record, permanently failed ones included, in
    /// `(enqueued_at, local_id)` order
    pub fn list_pending(&self) -> Result<Vec<MutationRecord>, LocalStoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(MUTATIONS_TABLE)?;

        let mut records = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            records.push(decode_record(key.value(), value.value())?);
        }
        records.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then(a.local_id.cmp(&b.local_id))
        });
        Ok(records)
    }

    pub fn get(&self, local_id: u64) -> Result<Option<MutationRecord>, LocalStoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(MUTATIONS_TABLE)?;
        let Some(value) = table.get(local_id)? else {
            return Ok(None);
        };
        Ok(Some(decode_record(local_id, value.value())?))
    }

    /// Delete a record; returns whether it existed
    pub fn remove(&self, local_id: u64) -> Result<bool, LocalStoreError> {
        let tx = self.db.begin_write()?;
        let removed = {
            let mut table = tx.open_table(MUTATIONS_TABLE)?;
            let existed = table.remove(local_id)?.is_some();
            existed
        };
        tx.commit()?;
        Ok(removed)
    }

    /// Commit a successful `Create`: drop the record, swap the provisional
    /// mirror entry for the server entity and persist the id mapping
    #[instrument(skip(self, entity), fields(server_id = entity.id()))]
    pub fn complete_create(
        &self,
        local_id: u64,
        entity: &EntitySnapshot,
    ) -> Result<(), LocalStoreError> {
        let temp_id = temporary_id(local_id);
        let tx = self.db.begin_write()?;
        take_record(&tx, local_id)?;
        {
            let mut mirror = tx.open_table(mirror_table(entity.entity_type()))?;
            mirror.remove(temp_id)?;
            let entry = MirrorEntry::authoritative(entity);
            mirror.insert(entry.id, serde_json::to_vec(&entry)?.as_slice())?;
        }
        if entity.entity_type() == EntityType::Fund {
            rewrite_provisional_references(
                &tx,
                EntityType::Transaction,
                FUND_FIELD,
                temp_id,
                entity.id(),
            )?;
        }
        {
            let mut reconciled = tx.open_table(RECONCILED_TABLE)?;
            reconciled.insert(local_id, (entity.id(), Utc::now().timestamp_micros()))?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Commit a successful `Update`: drop the record and refresh the mirror
    pub fn complete_update(
        &self,
        local_id: u64,
        entity: Option<&EntitySnapshot>,
    ) -> Result<(), LocalStoreError> {
        let tx = self.db.begin_write()?;
        take_record(&tx, local_id)?;
        if let Some(entity) = entity {
            put_mirror_entry(&tx, entity)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Commit a successful `Delete`: drop the record and evict the entity
    pub fn complete_delete(
        &self,
        local_id: u64,
        entity_type: EntityType,
        server_id: i64,
    ) -> Result<(), LocalStoreError> {
        let tx = self.db.begin_write()?;
        take_record(&tx, local_id)?;
        evict_mirror_entry(&tx, entity_type, server_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Record a failed dispatch and return the record's resulting state.
    ///
    /// Only permanent failures count towards `max_attempts`.
    pub fn record_failure(
        &self,
        local_id: u64,
        failure: SyncFailure,
        max_attempts: u32,
    ) -> Result<RecordState, LocalStoreError> {
        let tx = self.db.begin_write()?;
        let mut record = take_record(&tx, local_id)?;

        if failure.kind.is_permanent() {
            record.attempts += 1;
            if record.attempts >= max_attempts {
                info!(local_id, attempts = record.attempts, "mutation permanently failed");
                record.state = RecordState::PermanentlyFailed;
            }
        }
        record.last_error = Some(failure);
        let state = record.state;

        put_record(&tx, &record)?;
        tx.commit()?;
        Ok(state)
    }

    /// Discard a record at the user's request, with its provisional entity
    pub fn dismiss(&self, local_id: u64) -> Result<MutationRecord, LocalStoreError> {
        let tx = self.db.begin_write()?;
        let record = take_record(&tx, local_id)?;
        if record.action == MutationAction::Create {
            let mut mirror = tx.open_table(mirror_table(record.entity_type))?;
            mirror.remove(temporary_id(local_id))?;
        }
        tx.commit()?;
        info!(local_id, "mutation dismissed");
        Ok(record)
    }

    /// Put a permanently failed record back in line
    pub fn retry(&self, local_id: u64) -> Result<(), LocalStoreError> {
        let tx = self.db.begin_write()?;
        let mut record = take_record(&tx, local_id)?;
        record.attempts = 0;
        record.last_error = None;
        record.state = RecordState::Pending;
        put_record(&tx, &record)?;
        tx.commit()?;
        Ok(())
    }

    pub fn reconciled_id(&self, local_id: u64) -> Result<Option<i64>, LocalStoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(RECONCILED_TABLE)?;
        Ok(table.get(local_id)?.map(|guard| guard.value().0))
    }

    pub fn reconciled_ids(&self) -> Result<HashMap<u64, i64>, LocalStoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(RECONCILED_TABLE)?;
        let mut ids = HashMap::new();
        for item in table.iter()? {
            let (local_id, mapping) = item?;
            ids.insert(local_id.value(), mapping.value().0);
        }
        Ok(ids)
    }

    /// Drop id mappings reconciled before `reconciled_before` that no queued
    /// record still references. Returns how many were dropped.
    pub fn prune_reconciled(
        &self,
        reconciled_before: DateTime<Utc>,
    ) -> Result<usize, LocalStoreError> {
        let cutoff = reconciled_before.timestamp_micros();
        let tx = self.db.begin_write()?;

        let mut referenced = HashSet::new();
        {
            let mutations = tx.open_table(MUTATIONS_TABLE)?;
            for item in mutations.iter()? {
                let (key, value) = item?;
                let record = decode_record(key.value(), value.value())?;
                referenced.extend(referenced_local_ids(&record));
            }
        }

        let pruned = {
            let mut reconciled = tx.open_table(RECONCILED_TABLE)?;
            let mut stale = Vec::new();
            for item in reconciled.iter()? {
                let (local_id, mapping) = item?;
                let (_, reconciled_at) = mapping.value();
                if reconciled_at < cutoff && !referenced.contains(&local_id.value()) {
                    stale.push(local_id.value());
                }
            }
            for local_id in &stale {
                reconciled.remove(*local_id)?;
            }
            stale.len()
        };
        tx.commit()?;

        if pruned > 0 {
            debug!(pruned, "pruned reconciled ids");
        }
        Ok(pruned)
    }

    pub fn mirror_get(
        &self,
        entity_type: EntityType,
        id: i64,
    ) -> Result<Option<MirrorEntry>, LocalStoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(mirror_table(entity_type))?;
        let Some(value) = table.get(id)? else {
            return Ok(None);
        };
        Ok(Some(decode_mirror_entry(id, value.value())?))
    }

    /// Mirror entries of one type: provisional (negative ids) first, then by id
    pub fn mirror_list(&self, entity_type: EntityType) -> Result<Vec<MirrorEntry>, LocalStoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(mirror_table(entity_type))?;
        let mut entries = Vec::new();
        for item in table.iter()? {
            let (key, value) = item?;
            entries.push(decode_mirror_entry(key.value(), value.value())?);
        }
        Ok(entries)
    }

    pub fn mirror_upsert(&self, entity: &EntitySnapshot) -> Result<(), LocalStoreError> {
        let tx = self.db.begin_write()?;
        put_mirror_entry(&tx, entity)?;
        tx.commit()?;
        Ok(())
    }

    pub fn mirror_remove(&self, entity_type: EntityType, id: i64) -> Result<(), LocalStoreError> {
        let tx = self.db.begin_write()?;
        evict_mirror_entry(&tx, entity_type, id)?;
        tx.commit()?;
        Ok(())
    }

    /// Replace every authoritative entry of one type with `entities`,
    /// keeping provisional entries
    pub fn replace_mirror(
        &self,
        entity_type: EntityType,
        entities: &[EntitySnapshot],
    ) -> Result<(), LocalStoreError> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(mirror_table(entity_type))?;
            let mut stale = Vec::new();
            for item in table.iter()? {
                let (key, value) = item?;
                let provisional = decode_mirror_entry(key.value(), value.value())
                    .map(|entry| entry.provisional)
                    .unwrap_or(false);
                if !provisional {
                    stale.push(key.value());
                }
            }
            for id in stale {
                table.remove(id)?;
            }
            for entity in entities {
                let entry = MirrorEntry::authoritative(entity);
                table.insert(entry.id, serde_json::to_vec(&entry)?.as_slice())?;
            }
        }
        tx.commit()?;
        debug!(entity_type = %entity_type, count = entities.len(), "mirror replaced");
        Ok(())
    }
}

fn next_local_id(tx: &WriteTransaction) -> Result<u64, LocalStoreError> {
    let mut meta = tx.open_table(META_TABLE)?;
    let current = match meta.get(META_NEXT_LOCAL_ID)? {
        Some(guard) => {
            let bytes: [u8; 8] =
                guard
                    .value()
                    .try_into()
                    .map_err(|_| LocalStoreError::Corrupt {
                        key: META_NEXT_LOCAL_ID.to_string(),
                        reason: "counter is not 8 bytes".to_string(),
                    })?;
            u64::from_le_bytes(bytes)
        }
        None => 1,
    };
    let following = current + 1;
    meta.insert(META_NEXT_LOCAL_ID, following.to_le_bytes().as_slice())?;
    Ok(current)
}

/// Stamp for a new record: never earlier than the previous one, so a clock
/// stepping back cannot reorder the queue
fn next_enqueue_stamp(
    tx: &WriteTransaction,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, LocalStoreError> {
    let mut meta = tx.open_table(META_TABLE)?;
    let last = match meta.get(META_LAST_ENQUEUED_AT)? {
        Some(guard) => {
            let bytes: [u8; 8] =
                guard
                    .value()
                    .try_into()
                    .map_err(|_| LocalStoreError::Corrupt {
                        key: META_LAST_ENQUEUED_AT.to_string(),
                        reason: "stamp is not 8 bytes".to_string(),
                    })?;
            Some(i64::from_le_bytes(bytes))
        }
        None => None,
    };

    let micros = now.timestamp_micros().max(last.unwrap_or(i64::MIN));
    let stamp = DateTime::from_timestamp_micros(micros).ok_or_else(|| LocalStoreError::Corrupt {
        key: META_LAST_ENQUEUED_AT.to_string(),
        reason: format!("stamp {} out of range", micros),
    })?;
    meta.insert(META_LAST_ENQUEUED_AT, micros.to_le_bytes().as_slice())?;
    Ok(stamp)
}

/// Local ids whose temporary id appears in the record's target or references
fn referenced_local_ids(record: &MutationRecord) -> Vec<u64> {
    let mut fields = record.entity_type.reference_fields().to_vec();
    if record.action != MutationAction::Create {
        fields.push(ID_FIELD);
    }
    fields
        .into_iter()
        .filter_map(|field| record.payload.get(field).and_then(EntityRef::from_value))
        .filter_map(|reference| match reference {
            EntityRef::Local(local_id) => Some(local_id),
            EntityRef::Server(_) => None,
        })
        .collect()
}

/// Remove and return a record inside `tx`
fn take_record(tx: &WriteTransaction, local_id: u64) -> Result<MutationRecord, LocalStoreError> {
    let mut table = tx.open_table(MUTATIONS_TABLE)?;
    let bytes = table
        .remove(local_id)?
        .map(|guard| guard.value().to_vec())
        .ok_or(LocalStoreError::RecordNotFound(local_id))?;
    decode_record(local_id, &bytes)
}

fn put_record(tx: &WriteTransaction, record: &MutationRecord) -> Result<(), LocalStoreError> {
    let mut table = tx.open_table(MUTATIONS_TABLE)?;
    table.insert(record.local_id, serde_json::to_vec(record)?.as_slice())?;
    Ok(())
}

fn put_mirror_entry(tx: &WriteTransaction, entity: &EntitySnapshot) -> Result<(), LocalStoreError> {
    let entry = MirrorEntry::authoritative(entity);
    let mut table = tx.open_table(mirror_table(entity.entity_type()))?;
    table.insert(entry.id, serde_json::to_vec(&entry)?.as_slice())?;
    Ok(())
}

/// Remove an entity from the mirror; a fund takes its transactions with it
fn evict_mirror_entry(
    tx: &WriteTransaction,
    entity_type: EntityType,
    id: i64,
) -> Result<(), LocalStoreError> {
    {
        let mut table = tx.open_table(mirror_table(entity_type))?;
        table.remove(id)?;
    }
    if entity_type == EntityType::Fund {
        let mut transactions = tx.open_table(TRANSACTION_MIRROR)?;
        let mut dependent = Vec::new();
        for item in transactions.iter()? {
            let (key, value) = item?;
            if let Ok(entry) = decode_mirror_entry(key.value(), value.value()) {
                let fund_id = entry
                    .fields
                    .get("fund_id")
                    .or_else(|| entry.fields.get(FUND_FIELD))
                    .and_then(Value::as_i64);
                if fund_id == Some(id) {
                    dependent.push(key.value());
                }
            }
        }
        for key in dependent {
            transactions.remove(key)?;
        }
    }
    Ok(())
}

/// Point provisional entries that reference `temp_id` at `server_id`
fn rewrite_provisional_references(
    tx: &WriteTransaction,
    entity_type: EntityType,
    field: &str,
    temp_id: i64,
    server_id: i64,
) -> Result<(), LocalStoreError> {
    let mut table = tx.open_table(mirror_table(entity_type))?;
    let mut patched = Vec::new();
    for item in table.iter()? {
        let (key, value) = item?;
        let mut entry = decode_mirror_entry(key.value(), value.value())?;
        if entry.provisional && entry.fields.get(field).and_then(Value::as_i64) == Some(temp_id) {
            entry.fields.insert(field.to_string(), Value::from(server_id));
            patched.push(entry);
        }
    }
    for entry in patched {
        table.insert(entry.id, serde_json::to_vec(&entry)?.as_slice())?;
    }
    Ok(())
}

fn decode_record(local_id: u64, bytes: &[u8]) -> Result<MutationRecord, LocalStoreError> {
    serde_json::from_slice(bytes).map_err(|e| LocalStoreError::Corrupt {
        key: format!("mutations/{}", local_id),
        reason: e.to_string(),
    })
}

fn decode_mirror_entry(id: i64, bytes: &[u8]) -> Result<MirrorEntry, LocalStoreError> {
    serde_json::from_slice(bytes).map_err(|e| LocalStoreError::Corrupt {
        key: format!("mirror/{}", id),
        reason: e.to_string(),
    })
}
