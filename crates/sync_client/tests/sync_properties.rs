use std::sync::Arc;

use common::domain::{
    idempotency_key, temporary_id, BeneficiaryRepository, CreateFundRepoInput, EntityType,
    EntryErrorKind, EntryStatus, FundRepository, MutationAction, MutationEntry,
    RemoteBatchEndpoint, TransactionRepository,
};
use common::memory::InMemoryCanonicalStore;
use serde_json::{json, Map, Value};
use sync_api::{BatchApplier, EntityQueryService, InProcessBatchEndpoint};
use sync_client::{
    Connectivity, ConnectivityState, FieldClient, LocalMutationStore, RecordState, SubmitOutcome,
    SyncCoordinator, SyncErrorKind, SyncOptions, SyncStatus,
};

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

struct Harness {
    canonical: Arc<InMemoryCanonicalStore>,
    applier: Arc<BatchApplier>,
    endpoint: Arc<InProcessBatchEndpoint>,
    store: Arc<LocalMutationStore>,
    connectivity: Connectivity,
    coordinator: SyncCoordinator,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(
            Arc::new(LocalMutationStore::in_memory().unwrap()),
            SyncOptions::default(),
        )
    }

    fn with_store(store: Arc<LocalMutationStore>, options: SyncOptions) -> Self {
        Self::with_canonical(Arc::new(InMemoryCanonicalStore::new()), store, options)
    }

    fn with_canonical(
        canonical: Arc<InMemoryCanonicalStore>,
        store: Arc<LocalMutationStore>,
        options: SyncOptions,
    ) -> Self {
        let applier = Arc::new(BatchApplier::new(
            canonical.clone(),
            canonical.clone(),
            canonical.clone(),
            canonical.clone(),
        ));
        let queries = Arc::new(EntityQueryService::new(
            canonical.clone(),
            canonical.clone(),
            canonical.clone(),
        ));
        let endpoint = Arc::new(InProcessBatchEndpoint::new(applier.clone(), queries));
        let connectivity = Connectivity::new(ConnectivityState::Online);
        let coordinator = SyncCoordinator::new(
            store.clone(),
            endpoint.clone(),
            connectivity.clone(),
            options,
        );
        Self {
            canonical,
            applier,
            endpoint,
            store,
            connectivity,
            coordinator,
        }
    }

    async fn seed_fund(&self, amount_cents: i64) -> i64 {
        self.canonical
            .create_fund(CreateFundRepoInput {
                amount_cents,
                source: "County".to_string(),
                description: "Relief".to_string(),
            })
            .await
            .unwrap()
            .id
    }
}

#[tokio::test]
async fn test_offline_beneficiary_reaches_server_once_online() {
    let harness = Harness::new();
    harness.connectivity.set(ConnectivityState::Offline);

    harness
        .store
        .enqueue(
            MutationAction::Create,
            EntityType::Beneficiary,
            object(json!({"name": "Jane", "age": 25, "location": "Ukunda"})),
        )
        .unwrap();
    assert_eq!(harness.store.list_pending().unwrap().len(), 1);

    harness.connectivity.set(ConnectivityState::Online);
    let outcome = harness.coordinator.run_sync().await;

    assert_eq!(outcome.status, SyncStatus::Completed);
    assert_eq!(outcome.applied, 1);
    assert!(harness.store.list_pending().unwrap().is_empty());

    let rows = harness.canonical.list_beneficiaries().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "Jane");
    assert_eq!(rows[0].age, 25);
    assert_eq!(rows[0].location, "Ukunda");

    let mirrored = harness
        .store
        .mirror_list(EntityType::Beneficiary)
        .unwrap();
    assert_eq!(mirrored.len(), 1);
    assert_eq!(mirrored[0].id, rows[0].id);
    assert!(!mirrored[0].provisional);
    assert_eq!(mirrored[0].fields["name"], json!("Jane"));
}

#[tokio::test]
async fn test_second_run_on_empty_queue_writes_nothing() {
    let harness = Harness::new();
    harness
        .store
        .enqueue(
            MutationAction::Create,
            EntityType::Fund,
            object(json!({"amount_cents": 5000, "source": "NGO"})),
        )
        .unwrap();

    harness.coordinator.run_sync().await;
    let writes = harness.canonical.write_count();
    assert_eq!(writes, 1);

    let outcome = harness.coordinator.run_sync().await;
    assert_eq!(outcome.applied, 0);
    assert_eq!(harness.canonical.write_count(), writes);
}

#[tokio::test]
async fn test_later_record_wins_for_same_entity() {
    let harness = Harness::new();
    let local = harness
        .store
        .enqueue(
            MutationAction::Create,
            EntityType::Beneficiary,
            object(json!({"name": "Amina", "age": 30, "location": "Kwale"})),
        )
        .unwrap();
    for age in [31, 32] {
        harness
            .store
            .enqueue(
                MutationAction::Update,
                EntityType::Beneficiary,
                object(json!({"id": temporary_id(local), "age": age})),
            )
            .unwrap();
    }

    let outcome = harness.coordinator.run_sync().await;

    assert_eq!(outcome.applied, 3);
    let rows = harness.canonical.list_beneficiaries().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].age, 32);
}

#[tokio::test]
async fn test_transaction_references_reconciled_fund() {
    let harness = Harness::new();
    let fund_local = harness
        .store
        .enqueue(
            MutationAction::Create,
            EntityType::Fund,
            object(json!({"amount_cents": 10000, "source": "NGO"})),
        )
        .unwrap();
    harness
        .store
        .enqueue(
            MutationAction::Create,
            EntityType::Transaction,
            object(json!({
                "fund": temporary_id(fund_local),
                "amount_cents": 2500,
                "recipient": "Kinondo Clinic",
            })),
        )
        .unwrap();

    let outcome = harness.coordinator.run_sync().await;
    assert_eq!(outcome.applied, 2);

    let funds = harness.canonical.list_funds().await.unwrap();
    let transactions = harness.canonical.list_transactions().await.unwrap();
    assert_eq!(funds.len(), 1);
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].fund_id, funds[0].id);
    assert_eq!(
        harness.store.reconciled_id(fund_local).unwrap(),
        Some(funds[0].id)
    );
}

#[tokio::test]
async fn test_failing_record_does_not_block_neighbours() {
    let harness = Harness::new();
    let fund_id = harness.seed_fund(1_000).await;

    let amounts = [500, 5_000, 300];
    let mut local_ids = Vec::new();
    for amount in amounts {
        local_ids.push(
            harness
                .store
                .enqueue(
                    MutationAction::Create,
                    EntityType::Transaction,
                    object(json!({"fund": fund_id, "amount_cents": amount, "recipient": "Msambweni"})),
                )
                .unwrap(),
        );
    }

    let outcome = harness.coordinator.run_sync().await;

    assert_eq!(outcome.status, SyncStatus::Completed);
    assert_eq!(outcome.applied, 2);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].local_id, local_ids[1]);
    assert_eq!(outcome.errors[0].failure.kind, SyncErrorKind::Validation);

    let pending = harness.store.list_pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].local_id, local_ids[1]);
    assert!(pending[0].last_error.is_some());

    let stored: Vec<i64> = harness
        .canonical
        .list_transactions()
        .await
        .unwrap()
        .iter()
        .map(|t| t.amount_cents)
        .collect();
    assert_eq!(stored, vec![500, 300]);
}

#[tokio::test]
async fn test_queued_record_survives_reopen_and_syncs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.redb");

    {
        let store = LocalMutationStore::open(&path).unwrap();
        store
            .enqueue(
                MutationAction::Create,
                EntityType::Beneficiary,
                object(json!({"name": "Baraka", "age": 8, "location": "Lunga Lunga"})),
            )
            .unwrap();
    }

    let reopened = Arc::new(LocalMutationStore::open(&path).unwrap());
    assert_eq!(reopened.list_pending().unwrap().len(), 1);

    let harness = Harness::with_store(reopened, SyncOptions::default());
    let outcome = harness.coordinator.run_sync().await;
    assert_eq!(outcome.applied, 1);
    assert_eq!(harness.canonical.list_beneficiaries().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reconciled_ids_outlive_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.redb");
    let canonical = Arc::new(InMemoryCanonicalStore::new());

    let fund_local = {
        let store = Arc::new(LocalMutationStore::open(&path).unwrap());
        let local = store
            .enqueue(
                MutationAction::Create,
                EntityType::Fund,
                object(json!({"amount_cents": 4000, "source": "NGO"})),
            )
            .unwrap();
        let harness = Harness::with_canonical(canonical.clone(), store, SyncOptions::default());
        harness.coordinator.run_sync().await;
        local
    };

    let store = Arc::new(LocalMutationStore::open(&path).unwrap());
    store
        .enqueue(
            MutationAction::Create,
            EntityType::Transaction,
            object(json!({"fund": temporary_id(fund_local), "amount_cents": 100, "recipient": "Shimba"})),
        )
        .unwrap();
    let harness = Harness::with_canonical(canonical.clone(), store, SyncOptions::default());
    let outcome = harness.coordinator.run_sync().await;

    assert_eq!(outcome.applied, 1);
    let funds = canonical.list_funds().await.unwrap();
    let transactions = canonical.list_transactions().await.unwrap();
    assert_eq!(transactions[0].fund_id, funds[0].id);
}

#[tokio::test]
async fn test_dependents_of_failed_create_are_skipped() {
    let harness = Harness::new();
    let fund_local = harness
        .store
        .enqueue(
            MutationAction::Create,
            EntityType::Fund,
            object(json!({"amount_cents": 0, "source": "NGO"})),
        )
        .unwrap();
    let dependent = harness
        .store
        .enqueue(
            MutationAction::Create,
            EntityType::Transaction,
            object(json!({"fund": temporary_id(fund_local), "amount_cents": 10, "recipient": "Diani"})),
        )
        .unwrap();

    let outcome = harness.coordinator.run_sync().await;

    assert_eq!(outcome.applied, 0);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(harness.canonical.write_count(), 0);
    let pending: Vec<u64> = harness
        .store
        .list_pending()
        .unwrap()
        .iter()
        .map(|r| r.local_id)
        .collect();
    assert_eq!(pending, vec![fund_local, dependent]);
}

#[tokio::test]
async fn test_unreachable_endpoint_keeps_queue_intact() {
    let harness = Harness::new();
    harness.endpoint.set_reachable(false);
    let local = harness
        .store
        .enqueue(
            MutationAction::Create,
            EntityType::Fund,
            object(json!({"amount_cents": 700, "source": "NGO"})),
        )
        .unwrap();

    let outcome = harness.coordinator.run_sync().await;
    assert_eq!(outcome.applied, 0);
    assert_eq!(outcome.errors[0].failure.kind, SyncErrorKind::TransientNetwork);
    assert_eq!(harness.store.get(local).unwrap().unwrap().attempts, 0);

    harness.endpoint.set_reachable(true);
    let outcome = harness.coordinator.run_sync().await;
    assert_eq!(outcome.applied, 1);
    assert!(harness.store.list_pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_not_found_record_becomes_permanently_failed() {
    let harness = Harness::with_store(
        Arc::new(LocalMutationStore::in_memory().unwrap()),
        SyncOptions {
            max_attempts: 2,
            ..SyncOptions::default()
        },
    );
    let local = harness
        .store
        .enqueue(
            MutationAction::Delete,
            EntityType::Fund,
            object(json!({"id": 999})),
        )
        .unwrap();

    let first = harness.coordinator.run_sync().await;
    assert!(first.permanently_failed.is_empty());
    assert_eq!(first.errors[0].failure.kind, SyncErrorKind::NotFound);

    let second = harness.coordinator.run_sync().await;
    assert_eq!(second.permanently_failed, vec![local]);

    let third = harness.coordinator.run_sync().await;
    assert!(third.errors.is_empty());
    assert_eq!(third.permanently_failed, vec![local]);
    assert_eq!(
        harness.store.get(local).unwrap().unwrap().state,
        RecordState::PermanentlyFailed
    );

    harness.store.dismiss(local).unwrap();
    assert!(harness.store.list_pending().unwrap().is_empty());
}

#[tokio::test]
async fn test_replayed_entry_is_not_applied_twice() {
    let harness = Harness::new();
    let local = harness
        .store
        .enqueue(
            MutationAction::Create,
            EntityType::Beneficiary,
            object(json!({"name": "Zawadi", "age": 41, "location": "Kinango"})),
        )
        .unwrap();

    // Server applied the entry but the device never saw the reply
    let key = idempotency_key(&harness.store.device_id().unwrap(), local);
    let first = harness
        .endpoint
        .apply(MutationEntry {
            action: MutationAction::Create,
            entity_type: EntityType::Beneficiary,
            payload: object(json!({"name": "Zawadi", "age": 41, "location": "Kinango"})),
            idempotency_key: Some(key),
        })
        .await
        .unwrap();
    assert_eq!(first.status, EntryStatus::Success);

    let outcome = harness.coordinator.run_sync().await;

    assert_eq!(outcome.applied, 1);
    let rows = harness.canonical.list_beneficiaries().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        harness.store.reconciled_id(local).unwrap(),
        first.entity.map(|e| e.id())
    );
}

#[tokio::test]
async fn test_unknown_action_is_rejected_per_entry() {
    let harness = Harness::new();
    let results = harness
        .applier
        .apply_batch(vec![
            json!({"action": "upsert", "entity_type": "Fund", "payload": {"id": 1}}),
            json!({"action": "create", "entity_type": "Fund", "payload": {"amount_cents": 100, "source": "NGO"}}),
        ])
        .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status, EntryStatus::Error);
    assert_eq!(
        results[0].error.as_ref().map(|e| e.kind),
        Some(EntryErrorKind::InvalidEntry)
    );
    assert_eq!(results[1].status, EntryStatus::Success);
}

#[tokio::test]
async fn test_field_client_queues_offline_and_drains_online() {
    let harness = Harness::new();
    let client = FieldClient::new(
        harness.store.clone(),
        harness.endpoint.clone(),
        harness.connectivity.clone(),
    );

    harness.connectivity.set(ConnectivityState::Offline);
    let queued = client
        .submit(
            MutationAction::Create,
            EntityType::Beneficiary,
            object(json!({"name": "Jane", "age": 25, "location": "Ukunda"})),
        )
        .await
        .unwrap();
    assert!(matches!(queued, SubmitOutcome::Queued(_)));

    harness.connectivity.set(ConnectivityState::Online);
    harness.coordinator.run_sync().await;

    let applied = client
        .submit(
            MutationAction::Create,
            EntityType::Fund,
            object(json!({"amount_cents": 900, "source": "NGO"})),
        )
        .await
        .unwrap();
    assert!(matches!(applied, SubmitOutcome::Applied(Some(_))));
    assert_eq!(harness.canonical.list_beneficiaries().await.unwrap().len(), 1);
    assert_eq!(harness.canonical.list_funds().await.unwrap().len(), 1);
}
