use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Allocated fund that transactions draw from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fund {
    pub id: i64,
    /// Amount in minor currency units
    pub amount_cents: i64,
    pub source: String,
    pub description: String,
    pub allocated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFundRepoInput {
    pub amount_cents: i64,
    pub source: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFundRepoInput {
    pub id: i64,
    pub amount_cents: Option<i64>,
    pub source: Option<String>,
    pub description: Option<String>,
}

/// Repository trait for fund storage operations
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait FundRepository: Send + Sync {
    async fn create_fund(&self, input: CreateFundRepoInput) -> DomainResult<Fund>;

    async fn get_fund(&self, id: i64) -> DomainResult<Option<Fund>>;

    async fn update_fund(&self, input: UpdateFundRepoInput) -> DomainResult<Fund>;

    /// Delete a fund together with its transactions
    async fn delete_fund(&self, id: i64) -> DomainResult<()>;

    async fn list_funds(&self) -> DomainResult<Vec<Fund>>;
}
