use std::fmt;
use std::str::FromStr;

use crate::domain::result::{DomainError, DomainResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Disbursement from a fund to a recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub fund_id: i64,
    /// Amount in minor currency units, never above the fund amount
    pub amount_cents: i64,
    pub recipient: String,
    pub date: DateTime<Utc>,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            other => Err(DomainError::ValidationError(format!(
                "status: unknown transaction status {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTransactionRepoInput {
    pub fund_id: i64,
    pub amount_cents: i64,
    pub recipient: String,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTransactionRepoInput {
    pub id: i64,
    pub fund_id: Option<i64>,
    pub amount_cents: Option<i64>,
    pub recipient: Option<String>,
    pub status: Option<TransactionStatus>,
}

/// Repository trait for transaction storage operations
///
/// Implementations enforce `amount_cents <= fund.amount_cents` inside the same
/// storage transaction that writes the row, failing with
/// `DomainError::TransactionExceedsFund`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn create_transaction(
        &self,
        input: CreateTransactionRepoInput,
    ) -> DomainResult<Transaction>;

    async fn get_transaction(&self, id: i64) -> DomainResult<Option<Transaction>>;

    async fn update_transaction(
        &self,
        input: UpdateTransactionRepoInput,
    ) -> DomainResult<Transaction>;

    async fn delete_transaction(&self, id: i64) -> DomainResult<()>;

    async fn list_transactions(&self) -> DomainResult<Vec<Transaction>>;
}

/// Check the fund invariant for a transaction amount
pub fn ensure_within_fund(amount_cents: i64, fund_id: i64, fund_amount_cents: i64) -> DomainResult<()> {
    if amount_cents > fund_amount_cents {
        return Err(DomainError::TransactionExceedsFund {
            amount_cents,
            fund_id,
            fund_amount_cents,
        });
    }
    Ok(())
}
