mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::postgres::{
    PostgresAppliedMutationRepository, PostgresBeneficiaryRepository, PostgresClient,
    PostgresFundRepository, PostgresTransactionRepository,
};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use fieldsync_runner::Runner;
use sync_api::http::HttpServerConfig;
use sync_api::{SyncApi, SyncApiRepositories};
use tracing::{debug, error, info};

use crate::config::ServiceConfig;

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        "Starting fieldsync-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let repositories = match initialize_repositories(&config).await {
        Ok(repos) => repos,
        Err(e) => {
            error!("Failed to initialize PostgreSQL: {:#}", e);
            shutdown_telemetry(telemetry_providers);
            std::process::exit(1);
        }
    };

    let sync_api = SyncApi::new(
        repositories,
        HttpServerConfig {
            host: config.http_host.clone(),
            port: config.http_port,
        },
    );

    let runner = Runner::new()
        .with_named_process("sync_api", sync_api.into_runner_process())
        .with_closer(move || {
            Box::pin(async move {
                info!("Running cleanup tasks...");
                shutdown_telemetry(telemetry_providers);
                info!("Cleanup complete");
                Ok(())
            })
        })
        .with_closer_timeout(Duration::from_secs(config.shutdown_timeout_secs));

    runner.run().await;
}

async fn initialize_repositories(config: &ServiceConfig) -> anyhow::Result<SyncApiRepositories> {
    info!("Initializing PostgreSQL...");
    let client = PostgresClient::new(
        &config.postgres_host,
        config.postgres_port,
        &config.postgres_database,
        &config.postgres_username,
        &config.postgres_password,
        config.postgres_max_pool_size,
    )?;
    client.ping().await.context("PostgreSQL is not reachable")?;

    client
        .run_migrations(&config.postgres_migrations_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to run migrations from {}",
                config.postgres_migrations_dir
            )
        })?;

    Ok(SyncApiRepositories {
        beneficiaries: Arc::new(PostgresBeneficiaryRepository::new(client.clone())),
        funds: Arc::new(PostgresFundRepository::new(client.clone())),
        transactions: Arc::new(PostgresTransactionRepository::new(client.clone())),
        applied_mutations: Arc::new(PostgresAppliedMutationRepository::new(client)),
    })
}
