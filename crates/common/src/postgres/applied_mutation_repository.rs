use crate::domain::{
    AppliedMutation, AppliedMutationRepository, DomainError, DomainResult, EntitySnapshot,
    EntityType, MutationAction, RecordAppliedMutationInput,
};
use crate::postgres::PostgresClient;
use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

#[derive(Clone)]
pub struct PostgresAppliedMutationRepository {
    client: PostgresClient,
}

impl PostgresAppliedMutationRepository {
    pub fn new(client: PostgresClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AppliedMutationRepository for PostgresAppliedMutationRepository {
    async fn find_applied(&self, idempotency_key: &str) -> DomainResult<Option<AppliedMutation>> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let row = conn
            .query_opt(
                "SELECT idempotency_key, action, entity_type, entity, applied_at
                 FROM applied_mutations
                 WHERE idempotency_key = $1",
                &[&idempotency_key],
            )
            .await
            .map_err(|e| DomainError::RepositoryError(e.into()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let action: String = row.get(1);
        let entity_type: String = row.get(2);
        let entity: Option<serde_json::Value> = row.get(3);
        let entity = entity
            .map(serde_json::from_value::<EntitySnapshot>)
            .transpose()
            .context("stored applied mutation entity is not a valid snapshot")?;

        Ok(Some(AppliedMutation {
            idempotency_key: row.get(0),
            action: action.parse::<MutationAction>()?,
            entity_type: entity_type.parse::<EntityType>()?,
            entity,
            applied_at: row.get(4),
        }))
    }

    async fn record_applied(&self, input: RecordAppliedMutationInput) -> DomainResult<()> {
        let conn = self
            .client
            .get_connection()
            .await
            .map_err(DomainError::RepositoryError)?;

        let entity = input
            .entity
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("failed to encode applied entity")?;

        conn.execute(
            "INSERT INTO applied_mutations (idempotency_key, action, entity_type, entity)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (idempotency_key) DO NOTHING",
            &[
                &input.idempotency_key,
                &input.action.as_str(),
                &input.entity_type.as_str(),
                &entity,
            ],
        )
        .await
        .map_err(|e| DomainError::RepositoryError(e.into()))?;

        debug!(idempotency_key = %input.idempotency_key, "applied mutation recorded");
        Ok(())
    }
}
