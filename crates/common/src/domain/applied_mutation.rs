use crate::domain::result::DomainResult;
use crate::domain::{EntitySnapshot, EntityType, MutationAction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Ledger row recording that an idempotency key has been applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMutation {
    pub idempotency_key: String,
    pub action: MutationAction,
    pub entity_type: EntityType,
    /// Entity as returned when the mutation was first applied (none for deletes)
    pub entity: Option<EntitySnapshot>,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordAppliedMutationInput {
    pub idempotency_key: String,
    pub action: MutationAction,
    pub entity_type: EntityType,
    pub entity: Option<EntitySnapshot>,
}

/// Ledger of applied idempotency keys used to suppress replayed entries
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AppliedMutationRepository: Send + Sync {
    async fn find_applied(&self, idempotency_key: &str) -> DomainResult<Option<AppliedMutation>>;

    /// Record a key; recording an existing key keeps the first row
    async fn record_applied(&self, input: RecordAppliedMutationInput) -> DomainResult<()>;
}
