use thiserror::Error;

use crate::domain::EntryErrorKind;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Beneficiary not found: {0}")]
    BeneficiaryNotFound(String),

    #[error("Fund not found: {0}")]
    FundNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error(
        "Transaction amount {amount_cents} exceeds available fund {fund_id} amount {fund_amount_cents}"
    )]
    TransactionExceedsFund {
        amount_cents: i64,
        fund_id: i64,
        fund_amount_cents: i64,
    },

    #[error("Invalid mutation entry: {0}")]
    InvalidMutation(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    /// Classify the error for a per-entry batch result
    pub fn entry_error_kind(&self) -> EntryErrorKind {
        match self {
            DomainError::BeneficiaryNotFound(_)
            | DomainError::FundNotFound(_)
            | DomainError::TransactionNotFound(_) => EntryErrorKind::NotFound,

            DomainError::TransactionExceedsFund { .. } | DomainError::ValidationError(_) => {
                EntryErrorKind::Validation
            }

            DomainError::InvalidMutation(_) => EntryErrorKind::InvalidEntry,

            DomainError::RepositoryError(_) => EntryErrorKind::Internal,
        }
    }
}
