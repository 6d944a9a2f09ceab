use std::sync::Arc;

use common::domain::{
    AppliedMutationRepository, BatchEntryResult, BeneficiaryRepository, DomainError,
    DomainResult, EntityType, EntryError, EntitySnapshot, FundRepository, MutationAction,
    MutationEntry, RecordAppliedMutationInput, TransactionRepository,
};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    decode_payload, CreateBeneficiaryPayload, CreateFundPayload, CreateTransactionPayload,
    DeletePayload, UpdateBeneficiaryPayload, UpdateFundPayload, UpdateTransactionPayload,
};

/// Applies mutation entries to the canonical store one at a time.
///
/// Each entry commits or fails on its own: a failing entry is reported in
/// its result and never undoes entries applied before it.
pub struct BatchApplier {
    beneficiary_repository: Arc<dyn BeneficiaryRepository>,
    fund_repository: Arc<dyn FundRepository>,
    transaction_repository: Arc<dyn TransactionRepository>,
    applied_mutation_repository: Arc<dyn AppliedMutationRepository>,
}

impl BatchApplier {
    pub fn new(
        beneficiary_repository: Arc<dyn BeneficiaryRepository>,
        fund_repository: Arc<dyn FundRepository>,
        transaction_repository: Arc<dyn TransactionRepository>,
        applied_mutation_repository: Arc<dyn AppliedMutationRepository>,
    ) -> Self {
        Self {
            beneficiary_repository,
            fund_repository,
            transaction_repository,
            applied_mutation_repository,
        }
    }

    /// Apply raw entries in order, returning one result per entry
    pub async fn apply_batch(&self, entries: Vec<Value>) -> Vec<BatchEntryResult> {
        debug!(count = entries.len(), "Applying mutation batch");

        let mut results = Vec::with_capacity(entries.len());
        for raw in entries {
            results.push(self.apply_value(raw).await);
        }

        info!(
            applied = results
                .iter()
                .filter(|r| r.error.is_none())
                .count(),
            total = results.len(),
            "Mutation batch applied"
        );
        results
    }

    /// Parse and apply one raw entry; malformed entries yield `invalid_entry`
    pub async fn apply_value(&self, raw: Value) -> BatchEntryResult {
        match parse_entry(&raw) {
            Ok(entry) => self.apply_entry(entry, raw).await,
            Err(e) => {
                debug!(error = %e, "Rejecting malformed mutation entry");
                BatchEntryResult::error(raw, EntryError::from(&e))
            }
        }
    }

    /// Apply an already parsed entry
    pub async fn apply(&self, entry: MutationEntry) -> BatchEntryResult {
        let echo = serde_json::to_value(&entry).unwrap_or(Value::Null);
        self.apply_entry(entry, echo).await
    }

    #[instrument(
        skip(self, entry, echo),
        fields(action = %entry.action, entity_type = %entry.entity_type)
    )]
    async fn apply_entry(&self, entry: MutationEntry, echo: Value) -> BatchEntryResult {
        if let Some(key) = entry.idempotency_key.as_deref() {
            match self.applied_mutation_repository.find_applied(key).await {
                Ok(Some(applied)) => {
                    info!(idempotency_key = %key, "Mutation already applied, returning recorded outcome");
                    let mut result = BatchEntryResult::success(echo, applied.entity);
                    result.duplicate = true;
                    return result;
                }
                Ok(None) => {}
                Err(e) => return BatchEntryResult::error(echo, EntryError::from(&e)),
            }
        }

        match self.dispatch(&entry).await {
            Ok(entity) => {
                if let Some(key) = entry.idempotency_key.clone() {
                    let record = RecordAppliedMutationInput {
                        idempotency_key: key,
                        action: entry.action,
                        entity_type: entry.entity_type,
                        entity: entity.clone(),
                    };
                    if let Err(e) = self.applied_mutation_repository.record_applied(record).await {
                        warn!(error = %e, "Failed to record applied mutation");
                    }
                }
                BatchEntryResult::success(echo, entity)
            }
            Err(e) => {
                debug!(error = %e, "Mutation entry failed");
                BatchEntryResult::error(echo, EntryError::from(&e))
            }
        }
    }

    async fn dispatch(&self, entry: &MutationEntry) -> DomainResult<Option<EntitySnapshot>> {
        let payload = &entry.payload;
        match (entry.entity_type, entry.action) {
            (EntityType::Beneficiary, MutationAction::Create) => {
                let p: CreateBeneficiaryPayload = decode_payload(payload)?;
                let created = self
                    .beneficiary_repository
                    .create_beneficiary(p.into())
                    .await?;
                Ok(Some(created.into()))
            }
            (EntityType::Beneficiary, MutationAction::Update) => {
                let p: UpdateBeneficiaryPayload = decode_payload(payload)?;
                let updated = self
                    .beneficiary_repository
                    .update_beneficiary(p.into())
                    .await?;
                Ok(Some(updated.into()))
            }
            (EntityType::Beneficiary, MutationAction::Delete) => {
                let p: DeletePayload = decode_payload(payload)?;
                self.beneficiary_repository.delete_beneficiary(p.id).await?;
                Ok(None)
            }
            (EntityType::Fund, MutationAction::Create) => {
                let p: CreateFundPayload = decode_payload(payload)?;
                let created = self.fund_repository.create_fund(p.into()).await?;
                Ok(Some(created.into()))
            }
            (EntityType::Fund, MutationAction::Update) => {
                let p: UpdateFundPayload = decode_payload(payload)?;
                let updated = self.fund_repository.update_fund(p.into()).await?;
                Ok(Some(updated.into()))
            }
            (EntityType::Fund, MutationAction::Delete) => {
                let p: DeletePayload = decode_payload(payload)?;
                self.fund_repository.delete_fund(p.id).await?;
                Ok(None)
            }
            (EntityType::Transaction, MutationAction::Create) => {
                let p: CreateTransactionPayload = decode_payload(payload)?;
                let created = self
                    .transaction_repository
                    .create_transaction(p.into())
                    .await?;
                Ok(Some(created.into()))
            }
            (EntityType::Transaction, MutationAction::Update) => {
                let p: UpdateTransactionPayload = decode_payload(payload)?;
                let updated = self
                    .transaction_repository
                    .update_transaction(p.into())
                    .await?;
                Ok(Some(updated.into()))
            }
            (EntityType::Transaction, MutationAction::Delete) => {
                let p: DeletePayload = decode_payload(payload)?;
                self.transaction_repository.delete_transaction(p.id).await?;
                Ok(None)
            }
        }
    }
}

/// Read the envelope of a raw entry with closed action and entity type sets
fn parse_entry(raw: &Value) -> DomainResult<MutationEntry> {
    let object = raw
        .as_object()
        .ok_or_else(|| DomainError::InvalidMutation("entry must be a JSON object".to_string()))?;

    let action = object
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| DomainError::InvalidMutation("missing action".to_string()))?
        .parse::<MutationAction>()?;
    let entity_type = object
        .get("entity_type")
        .and_then(Value::as_str)
        .ok_or_else(|| DomainError::InvalidMutation("missing entity_type".to_string()))?
        .parse::<EntityType>()?;

    let payload = match object.get("payload") {
        None | Some(Value::Null) => Default::default(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => {
            return Err(DomainError::InvalidMutation(
                "payload must be a JSON object".to_string(),
            ))
        }
    };
    let idempotency_key = object
        .get("idempotency_key")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(MutationEntry {
        action,
        entity_type,
        payload,
        idempotency_key,
    })
}
