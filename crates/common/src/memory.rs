//! In-memory canonical store used by tests and embedded deployments.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{
    ensure_within_fund, AppliedMutation, AppliedMutationRepository, Beneficiary,
    BeneficiaryRepository, CreateBeneficiaryRepoInput, CreateFundRepoInput,
    CreateTransactionRepoInput, DomainError, DomainResult, Fund, FundRepository,
    RecordAppliedMutationInput, Transaction, TransactionRepository, UpdateBeneficiaryRepoInput,
    UpdateFundRepoInput, UpdateTransactionRepoInput,
};

#[derive(Default)]
struct Tables {
    beneficiaries: BTreeMap<i64, Beneficiary>,
    funds: BTreeMap<i64, Fund>,
    transactions: BTreeMap<i64, Transaction>,
    applied: BTreeMap<String, AppliedMutation>,
    next_beneficiary_id: i64,
    next_fund_id: i64,
    next_transaction_id: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

/// Canonical store backed by ordered maps behind one lock.
///
/// Every repository call holds the write lock for its whole duration, so each
/// call is atomic with respect to the others. Identifiers are assigned from
/// per-table sequences starting at 1.
#[derive(Clone, Default)]
pub struct InMemoryCanonicalStore {
    tables: Arc<RwLock<Tables>>,
    writes: Arc<AtomicU64>,
}

impl InMemoryCanonicalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entity writes committed so far (ledger writes excluded)
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BeneficiaryRepository for InMemoryCanonicalStore {
    async fn create_beneficiary(
        &self,
        input: CreateBeneficiaryRepoInput,
    ) -> DomainResult<Beneficiary> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let beneficiary = Beneficiary {
            id: next_id(&mut tables.next_beneficiary_id),
            name: input.name,
            age: input.age,
            location: input.location,
            created_at: now,
            updated_at: now,
        };
        tables
            .beneficiaries
            .insert(beneficiary.id, beneficiary.clone());
        self.count_write();
        debug!(beneficiary_id = beneficiary.id, "beneficiary created");
        Ok(beneficiary)
    }

    async fn get_beneficiary(&self, id: i64) -> DomainResult<Option<Beneficiary>> {
        Ok(self.tables.read().await.beneficiaries.get(&id).cloned())
    }

    async fn update_beneficiary(
        &self,
        input: UpdateBeneficiaryRepoInput,
    ) -> DomainResult<Beneficiary> {
        let mut tables = self.tables.write().await;
        let beneficiary = tables
            .beneficiaries
            .get_mut(&input.id)
            .ok_or_else(|| DomainError::BeneficiaryNotFound(input.id.to_string()))?;

        if let Some(name) = input.name {
            beneficiary.name = name;
        }
        if let Some(age) = input.age {
            beneficiary.age = age;
        }
        if let Some(location) = input.location {
            beneficiary.location = location;
        }
        beneficiary.updated_at = Utc::now();

        let updated = beneficiary.clone();
        self.count_write();
        Ok(updated)
    }

    async fn delete_beneficiary(&self, id: i64) -> DomainResult<()> {
        let mut tables = self.tables.write().await;
        if tables.beneficiaries.remove(&id).is_none() {
            return Err(DomainError::BeneficiaryNotFound(id.to_string()));
        }
        self.count_write();
        Ok(())
    }

    async fn list_beneficiaries(&self) -> DomainResult<Vec<Beneficiary>> {
        Ok(self
            .tables
            .read()
            .await
            .beneficiaries
            .values()
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FundRepository for InMemoryCanonicalStore {
    async fn create_fund(&self, input: CreateFundRepoInput) -> DomainResult<Fund> {
        let mut tables = self.tables.write().await;
        let fund = Fund {
            id: next_id(&mut tables.next_fund_id),
            amount_cents: input.amount_cents,
            source: input.source,
            description: input.description,
            allocated_at: Utc::now(),
        };
        tables.funds.insert(fund.id, fund.clone());
        self.count_write();
        debug!(fund_id = fund.id, "fund created");
        Ok(fund)
    }

    async fn get_fund(&self, id: i64) -> DomainResult<Option<Fund>> {
        Ok(self.tables.read().await.funds.get(&id).cloned())
    }

    async fn update_fund(&self, input: UpdateFundRepoInput) -> DomainResult<Fund> {
        let mut tables = self.tables.write().await;
        let fund = tables
            .funds
            .get_mut(&input.id)
            .ok_or_else(|| DomainError::FundNotFound(input.id.to_string()))?;

        if let Some(amount_cents) = input.amount_cents {
            fund.amount_cents = amount_cents;
        }
        if let Some(source) = input.source {
            fund.source = source;
        }
        if let Some(description) = input.description {
            fund.description = description;
        }

        let updated = fund.clone();
        self.count_write();
        Ok(updated)
    }

    async fn delete_fund(&self, id: i64) -> DomainResult<()> {
        let mut tables = self.tables.write().await;
        if tables.funds.remove(&id).is_none() {
            return Err(DomainError::FundNotFound(id.to_string()));
        }
        tables.transactions.retain(|_, t| t.fund_id != id);
        self.count_write();
        Ok(())
    }

    async fn list_funds(&self) -> DomainResult<Vec<Fund>> {
        Ok(self.tables.read().await.funds.values().cloned().collect())
    }
}

#[async_trait]
impl TransactionRepository for InMemoryCanonicalStore {
    async fn create_transaction(
        &self,
        input: CreateTransactionRepoInput,
    ) -> DomainResult<Transaction> {
        let mut tables = self.tables.write().await;
        let fund_amount_cents = tables
            .funds
            .get(&input.fund_id)
            .map(|f| f.amount_cents)
            .ok_or_else(|| DomainError::FundNotFound(input.fund_id.to_string()))?;
        ensure_within_fund(input.amount_cents, input.fund_id, fund_amount_cents)?;

        let transaction = Transaction {
            id: next_id(&mut tables.next_transaction_id),
            fund_id: input.fund_id,
            amount_cents: input.amount_cents,
            recipient: input.recipient,
            date: Utc::now(),
            status: input.status,
        };
        tables
            .transactions
            .insert(transaction.id, transaction.clone());
        self.count_write();
        debug!(transaction_id = transaction.id, fund_id = transaction.fund_id, "transaction created");
        Ok(transaction)
    }

    async fn get_transaction(&self, id: i64) -> DomainResult<Option<Transaction>> {
        Ok(self.tables.read().await.transactions.get(&id).cloned())
    }

    async fn update_transaction(
        &self,
        input: UpdateTransactionRepoInput,
    ) -> DomainResult<Transaction> {
        let mut tables = self.tables.write().await;
        let mut merged = tables
            .transactions
            .get(&input.id)
            .cloned()
            .ok_or_else(|| DomainError::TransactionNotFound(input.id.to_string()))?;

        if let Some(fund_id) = input.fund_id {
            merged.fund_id = fund_id;
        }
        if let Some(amount_cents) = input.amount_cents {
            merged.amount_cents = amount_cents;
        }
        if let Some(recipient) = input.recipient {
            merged.recipient = recipient;
        }
        if let Some(status) = input.status {
            merged.status = status;
        }

        let fund_amount_cents = tables
            .funds
            .get(&merged.fund_id)
            .map(|f| f.amount_cents)
            .ok_or_else(|| DomainError::FundNotFound(merged.fund_id.to_string()))?;
        ensure_within_fund(merged.amount_cents, merged.fund_id, fund_amount_cents)?;

        tables.transactions.insert(merged.id, merged.clone());
        self.count_write();
        Ok(merged)
    }

    async fn delete_transaction(&self, id: i64) -> DomainResult<()> {
        let mut tables = self.tables.write().await;
        if tables.transactions.remove(&id).is_none() {
            return Err(DomainError::TransactionNotFound(id.to_string()));
        }
        self.count_write();
        Ok(())
    }

    async fn list_transactions(&self) -> DomainResult<Vec<Transaction>> {
        Ok(self
            .tables
            .read()
            .await
            .transactions
            .values()
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AppliedMutationRepository for InMemoryCanonicalStore {
    async fn find_applied(&self, idempotency_key: &str) -> DomainResult<Option<AppliedMutation>> {
        Ok(self.tables.read().await.applied.get(idempotency_key).cloned())
    }

    async fn record_applied(&self, input: RecordAppliedMutationInput) -> DomainResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .applied
            .entry(input.idempotency_key.clone())
            .or_insert_with(|| AppliedMutation {
                idempotency_key: input.idempotency_key,
                action: input.action,
                entity_type: input.entity_type,
                entity: input.entity,
                applied_at: Utc::now(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityType, MutationAction, TransactionStatus};

    async fn seeded_fund(store: &InMemoryCanonicalStore, amount_cents: i64) -> Fund {
        store
            .create_fund(CreateFundRepoInput {
                amount_cents,
                source: "County".to_string(),
                description: "School meals".to_string(),
            })
            .await
            .unwrap()
    }

    fn transaction_input(fund_id: i64, amount_cents: i64) -> CreateTransactionRepoInput {
        CreateTransactionRepoInput {
            fund_id,
            amount_cents,
            recipient: "Ukunda Primary".to_string(),
            status: TransactionStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_identifiers_are_positive_and_sequential() {
        let store = InMemoryCanonicalStore::new();
        let first = store
            .create_beneficiary(CreateBeneficiaryRepoInput {
                name: "Jane".to_string(),
                age: 25,
                location: "Ukunda".to_string(),
            })
            .await
            .unwrap();
        let second = store
            .create_beneficiary(CreateBeneficiaryRepoInput {
                name: "Amina".to_string(),
                age: 31,
                location: "Kwale".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(store.list_beneficiaries().await.unwrap().len(), 2);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_partial_update_keeps_unset_fields() {
        let store = InMemoryCanonicalStore::new();
        let created = store
            .create_beneficiary(CreateBeneficiaryRepoInput {
                name: "Jane".to_string(),
                age: 25,
                location: "Ukunda".to_string(),
            })
            .await
            .unwrap();

        let updated = store
            .update_beneficiary(UpdateBeneficiaryRepoInput {
                id: created.id,
                name: None,
                age: Some(26),
                location: None,
            })
            .await
            .unwrap();

        assert_eq!(updated.name, "Jane");
        assert_eq!(updated.age, 26);
        assert_eq!(updated.location, "Ukunda");
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_are_not_found() {
        let store = InMemoryCanonicalStore::new();

        let update = store
            .update_fund(UpdateFundRepoInput {
                id: 99,
                amount_cents: Some(10),
                source: None,
                description: None,
            })
            .await;
        assert!(matches!(update, Err(DomainError::FundNotFound(_))));

        let delete = store.delete_transaction(99).await;
        assert!(matches!(delete, Err(DomainError::TransactionNotFound(_))));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_transaction_cannot_exceed_fund() {
        let store = InMemoryCanonicalStore::new();
        let fund = seeded_fund(&store, 1_000).await;

        let over = store.create_transaction(transaction_input(fund.id, 1_001)).await;
        assert!(matches!(
            over,
            Err(DomainError::TransactionExceedsFund { fund_amount_cents: 1_000, .. })
        ));

        let within = store
            .create_transaction(transaction_input(fund.id, 1_000))
            .await
            .unwrap();
        let raised = store
            .update_transaction(UpdateTransactionRepoInput {
                id: within.id,
                fund_id: None,
                amount_cents: Some(5_000),
                recipient: None,
                status: None,
            })
            .await;
        assert!(matches!(raised, Err(DomainError::TransactionExceedsFund { .. })));
        assert_eq!(
            store.get_transaction(within.id).await.unwrap().unwrap().amount_cents,
            1_000
        );
    }

    #[tokio::test]
    async fn test_transaction_requires_existing_fund() {
        let store = InMemoryCanonicalStore::new();
        let result = store.create_transaction(transaction_input(7, 10)).await;
        assert!(matches!(result, Err(DomainError::FundNotFound(_))));
    }

    #[tokio::test]
    async fn test_fund_delete_cascades_to_transactions() {
        let store = InMemoryCanonicalStore::new();
        let kept = seeded_fund(&store, 500).await;
        let dropped = seeded_fund(&store, 500).await;
        store
            .create_transaction(transaction_input(kept.id, 100))
            .await
            .unwrap();
        store
            .create_transaction(transaction_input(dropped.id, 100))
            .await
            .unwrap();

        store.delete_fund(dropped.id).await.unwrap();

        let remaining = store.list_transactions().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].fund_id, kept.id);
    }

    #[tokio::test]
    async fn test_record_applied_keeps_first_row() {
        let store = InMemoryCanonicalStore::new();
        let fund = seeded_fund(&store, 500).await;

        store
            .record_applied(RecordAppliedMutationInput {
                idempotency_key: "dev:1".to_string(),
                action: MutationAction::Create,
                entity_type: EntityType::Fund,
                entity: Some(fund.clone().into()),
            })
            .await
            .unwrap();
        store
            .record_applied(RecordAppliedMutationInput {
                idempotency_key: "dev:1".to_string(),
                action: MutationAction::Delete,
                entity_type: EntityType::Fund,
                entity: None,
            })
            .await
            .unwrap();

        let applied = store.find_applied("dev:1").await.unwrap().unwrap();
        assert_eq!(applied.action, MutationAction::Create);
        assert_eq!(applied.entity.map(|e| e.id()), Some(fund.id));
        assert!(store.find_applied("dev:2").await.unwrap().is_none());
    }
}
