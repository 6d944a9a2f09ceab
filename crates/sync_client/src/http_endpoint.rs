use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use common::domain::{
    BatchEntryResult, BatchResponse, Beneficiary, EntitySnapshot, EntityType, Fund, MutationEntry,
    RemoteBatchEndpoint, Transaction, TransportError,
};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::client_config::ClientConfig;

/// Remote batch applier reached over the sync API's HTTP surface
pub struct HttpBatchEndpoint {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBatchEndpoint {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        Self::new(
            config.server_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    async fn get_list<T>(&self, url: &str) -> Result<Vec<T>, TransportError>
    where
        T: DeserializeOwned,
    {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        let response = ensure_success(response).await?;
        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

fn snapshots<T: Into<EntitySnapshot>>(items: Vec<T>) -> Vec<EntitySnapshot> {
    items.into_iter().map(Into::into).collect()
}

#[async_trait]
impl RemoteBatchEndpoint for HttpBatchEndpoint {
    #[instrument(skip(self, entry), fields(action = %entry.action, entity_type = %entry.entity_type))]
    async fn apply(&self, entry: MutationEntry) -> Result<BatchEntryResult, TransportError> {
        let url = format!("{}/api/sync/", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&vec![entry])
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;
        let response = ensure_success(response).await?;

        let batch: BatchResponse = response
            .json()
            .await
            .map_err(|e| TransportError::MalformedResponse(e.to_string()))?;
        debug!(results = batch.results.len(), "batch response received");

        batch.results.into_iter().next().ok_or_else(|| {
            TransportError::MalformedResponse("response carried no results".to_string())
        })
    }

    async fn fetch_all(
        &self,
        entity_type: EntityType,
    ) -> Result<Vec<EntitySnapshot>, TransportError> {
        let url = format!("{}/api/{}/", self.base_url, entity_type.collection());
        match entity_type {
            EntityType::Beneficiary => self.get_list::<Beneficiary>(&url).await.map(snapshots),
            EntityType::Fund => self.get_list::<Fund>(&url).await.map(snapshots),
            EntityType::Transaction => self.get_list::<Transaction>(&url).await.map(snapshots),
        }
    }
}
