use std::sync::Arc;

use common::domain::{
    Beneficiary, BeneficiaryRepository, DomainError, DomainResult, EntitySnapshot, EntityType, Fund,
    FundRepository, Transaction, TransactionRepository,
};
use tracing::debug;

/// Read side of the canonical store used for entity lists and mirror refresh
pub struct EntityQueryService {
    beneficiary_repository: Arc<dyn BeneficiaryRepository>,
    fund_repository: Arc<dyn FundRepository>,
    transaction_repository: Arc<dyn TransactionRepository>,
}

impl EntityQueryService {
    pub fn new(
        beneficiary_repository: Arc<dyn BeneficiaryRepository>,
        fund_repository: Arc<dyn FundRepository>,
        transaction_repository: Arc<dyn TransactionRepository>,
    ) -> Self {
        Self {
            beneficiary_repository,
            fund_repository,
            transaction_repository,
        }
    }

    pub async fn list_beneficiaries(&self) -> DomainResult<Vec<Beneficiary>> {
        self.beneficiary_repository.list_beneficiaries().await
    }

    pub async fn list_funds(&self) -> DomainResult<Vec<Fund>> {
        self.fund_repository.list_funds().await
    }

    pub async fn list_transactions(&self) -> DomainResult<Vec<Transaction>> {
        self.transaction_repository.list_transactions().await
    }

    pub async fn get_beneficiary(&self, id: i64) -> DomainResult<Beneficiary> {
        self.beneficiary_repository
            .get_beneficiary(id)
            .await?
            .ok_or_else(|| DomainError::BeneficiaryNotFound(id.to_string()))
    }

    pub async fn get_fund(&self, id: i64) -> DomainResult<Fund> {
        self.fund_repository
            .get_fund(id)
            .await?
            .ok_or_else(|| DomainError::FundNotFound(id.to_string()))
    }

    pub async fn get_transaction(&self, id: i64) -> DomainResult<Transaction> {
        self.transaction_repository
            .get_transaction(id)
            .await?
            .ok_or_else(|| DomainError::TransactionNotFound(id.to_string()))
    }

    /// Every entity of one type, ordered by identifier
    pub async fn list(&self, entity_type: EntityType) -> DomainResult<Vec<EntitySnapshot>> {
        debug!(entity_type = %entity_type, "Listing entities");

        let snapshots = match entity_type {
            EntityType::Beneficiary => self
                .list_beneficiaries()
                .await?
                .into_iter()
                .map(EntitySnapshot::from)
                .collect(),
            EntityType::Fund => self
                .list_funds()
                .await?
                .into_iter()
                .map(EntitySnapshot::from)
                .collect(),
            EntityType::Transaction => self
                .list_transactions()
                .await?
                .into_iter()
                .map(EntitySnapshot::from)
                .collect(),
        };
        Ok(snapshots)
    }
}
