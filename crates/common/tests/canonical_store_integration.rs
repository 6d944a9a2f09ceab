#![cfg(feature = "integration-tests")]

use common::domain::{
    AppliedMutationRepository, BeneficiaryRepository, CreateBeneficiaryRepoInput,
    CreateFundRepoInput, CreateTransactionRepoInput, DomainError, EntityType, FundRepository,
    MutationAction, RecordAppliedMutationInput, TransactionRepository, TransactionStatus,
    UpdateBeneficiaryRepoInput, UpdateTransactionRepoInput,
};
use common::postgres::{
    PostgresAppliedMutationRepository, PostgresBeneficiaryRepository, PostgresClient,
    PostgresFundRepository, PostgresTransactionRepository,
};
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;

struct TestDb {
    _container: ContainerAsync<Postgres>,
    beneficiaries: PostgresBeneficiaryRepository,
    funds: PostgresFundRepository,
    transactions: PostgresTransactionRepository,
    applied: PostgresAppliedMutationRepository,
}

async fn setup_test_db() -> TestDb {
    let postgres = Postgres::default().start().await.unwrap();
    let host = postgres.get_host().await.unwrap();
    let port = postgres.get_host_port_ipv4(5432).await.unwrap();

    let client = PostgresClient::new(
        &host.to_string(),
        port,
        "postgres",
        "postgres",
        "postgres",
        5,
    )
    .expect("Failed to create client");

    let migrations_dir = format!("{}/migrations/postgres", env!("CARGO_MANIFEST_DIR"));
    let applied = client
        .run_migrations(&migrations_dir)
        .await
        .expect("Migrations failed");
    assert_eq!(applied, 2);

    TestDb {
        _container: postgres,
        beneficiaries: PostgresBeneficiaryRepository::new(client.clone()),
        funds: PostgresFundRepository::new(client.clone()),
        transactions: PostgresTransactionRepository::new(client.clone()),
        applied: PostgresAppliedMutationRepository::new(client),
    }
}

async fn create_fund(db: &TestDb, amount_cents: i64) -> i64 {
    db.funds
        .create_fund(CreateFundRepoInput {
            amount_cents,
            source: "County".to_string(),
            description: "Maize flour".to_string(),
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_beneficiary_create_update_delete() {
    let db = setup_test_db().await;

    let created = db
        .beneficiaries
        .create_beneficiary(CreateBeneficiaryRepoInput {
            name: "Jane".to_string(),
            age: 25,
            location: "Ukunda".to_string(),
        })
        .await
        .unwrap();
    assert!(created.id > 0);

    let updated = db
        .beneficiaries
        .update_beneficiary(UpdateBeneficiaryRepoInput {
            id: created.id,
            name: None,
            age: None,
            location: Some("Diani".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(updated.name, "Jane");
    assert_eq!(updated.location, "Diani");

    db.beneficiaries.delete_beneficiary(created.id).await.unwrap();
    let missing = db.beneficiaries.delete_beneficiary(created.id).await;
    assert!(matches!(missing, Err(DomainError::BeneficiaryNotFound(_))));
}

#[tokio::test]
async fn test_transaction_amount_checked_against_fund() {
    let db = setup_test_db().await;
    let fund_id = create_fund(&db, 1_000).await;

    let over = db
        .transactions
        .create_transaction(CreateTransactionRepoInput {
            fund_id,
            amount_cents: 1_500,
            recipient: "Kwale Clinic".to_string(),
            status: TransactionStatus::Pending,
        })
        .await;
    assert!(matches!(over, Err(DomainError::TransactionExceedsFund { .. })));

    let created = db
        .transactions
        .create_transaction(CreateTransactionRepoInput {
            fund_id,
            amount_cents: 800,
            recipient: "Kwale Clinic".to_string(),
            status: TransactionStatus::Pending,
        })
        .await
        .unwrap();

    let completed = db
        .transactions
        .update_transaction(UpdateTransactionRepoInput {
            id: created.id,
            fund_id: None,
            amount_cents: None,
            recipient: None,
            status: Some(TransactionStatus::Completed),
        })
        .await
        .unwrap();
    assert_eq!(completed.status, TransactionStatus::Completed);
    assert_eq!(completed.amount_cents, 800);
}

#[tokio::test]
async fn test_fund_delete_cascades() {
    let db = setup_test_db().await;
    let fund_id = create_fund(&db, 1_000).await;
    db.transactions
        .create_transaction(CreateTransactionRepoInput {
            fund_id,
            amount_cents: 100,
            recipient: "Msambweni".to_string(),
            status: TransactionStatus::Pending,
        })
        .await
        .unwrap();

    db.funds.delete_fund(fund_id).await.unwrap();

    assert!(db.transactions.list_transactions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_applied_mutation_ledger() {
    let db = setup_test_db().await;
    let fund_id = create_fund(&db, 1_000).await;
    let fund = db.funds.get_fund(fund_id).await.unwrap().unwrap();

    db.applied
        .record_applied(RecordAppliedMutationInput {
            idempotency_key: "d1:5".to_string(),
            action: MutationAction::Create,
            entity_type: EntityType::Fund,
            entity: Some(fund.into()),
        })
        .await
        .unwrap();
    // second record with the same key is ignored
    db.applied
        .record_applied(RecordAppliedMutationInput {
            idempotency_key: "d1:5".to_string(),
            action: MutationAction::Delete,
            entity_type: EntityType::Fund,
            entity: None,
        })
        .await
        .unwrap();

    let found = db.applied.find_applied("d1:5").await.unwrap().unwrap();
    assert_eq!(found.action, MutationAction::Create);
    assert_eq!(found.entity.map(|e| e.id()), Some(fund_id));
    assert!(db.applied.find_applied("d1:6").await.unwrap().is_none());
}
