use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Person enrolled in the feeding programme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: i64,
    pub name: String,
    pub age: i32,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Repository input for creating a beneficiary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateBeneficiaryRepoInput {
    pub name: String,
    pub age: i32,
    pub location: String,
}

/// Repository input for a partial beneficiary update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateBeneficiaryRepoInput {
    pub id: i64,
    pub name: Option<String>,
    pub age: Option<i32>,
    pub location: Option<String>,
}

/// Repository trait for beneficiary storage operations
/// Infrastructure layer (e.g., common::postgres) implements this trait
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BeneficiaryRepository: Send + Sync {
    /// Create a beneficiary, assigning a new identifier
    async fn create_beneficiary(
        &self,
        input: CreateBeneficiaryRepoInput,
    ) -> DomainResult<Beneficiary>;

    /// Get a beneficiary by ID
    async fn get_beneficiary(&self, id: i64) -> DomainResult<Option<Beneficiary>>;

    /// Merge the provided fields into an existing beneficiary
    async fn update_beneficiary(
        &self,
        input: UpdateBeneficiaryRepoInput,
    ) -> DomainResult<Beneficiary>;

    /// Delete a beneficiary, failing with `BeneficiaryNotFound` if absent
    async fn delete_beneficiary(&self, id: i64) -> DomainResult<()>;

    /// List all beneficiaries ordered by ID
    async fn list_beneficiaries(&self) -> DomainResult<Vec<Beneficiary>>;
}
