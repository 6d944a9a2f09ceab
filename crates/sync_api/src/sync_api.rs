use std::sync::Arc;

use common::domain::{
    AppliedMutationRepository, BeneficiaryRepository, FundRepository, TransactionRepository,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::{BatchApplier, EntityQueryService};
use crate::http::{run_http_server, AppState, HttpServerConfig};
use crate::in_process::InProcessBatchEndpoint;

/// Canonical store repositories the API is built on
#[derive(Clone)]
pub struct SyncApiRepositories {
    pub beneficiaries: Arc<dyn BeneficiaryRepository>,
    pub funds: Arc<dyn FundRepository>,
    pub transactions: Arc<dyn TransactionRepository>,
    pub applied_mutations: Arc<dyn AppliedMutationRepository>,
}

pub struct SyncApi {
    state: AppState,
    config: HttpServerConfig,
}

impl SyncApi {
    pub fn new(repositories: SyncApiRepositories, config: HttpServerConfig) -> Self {
        debug!("Initializing sync API module");
        let applier = Arc::new(BatchApplier::new(
            repositories.beneficiaries.clone(),
            repositories.funds.clone(),
            repositories.transactions.clone(),
            repositories.applied_mutations,
        ));
        let queries = Arc::new(EntityQueryService::new(
            repositories.beneficiaries,
            repositories.funds,
            repositories.transactions,
        ));
        Self {
            state: AppState { applier, queries },
            config,
        }
    }

    /// Endpoint sharing this API's applier, for embedded clients
    pub fn in_process_endpoint(&self) -> InProcessBatchEndpoint {
        InProcessBatchEndpoint::new(self.state.applier.clone(), self.state.queries.clone())
    }

    pub fn into_runner_process(
        self,
    ) -> impl FnOnce(
        CancellationToken,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>,
    > {
        move |ctx| Box::pin(async move { run_http_server(self.config, self.state, ctx).await })
    }
}
