//! Typed views of mutation payloads with their field rules.
//!
//! Payloads arrive as free-form JSON objects; each action/entity pair is
//! decoded into one of these structs and checked with garde before anything
//! touches the canonical store. Unknown fields are ignored.

use common::domain::{
    CreateBeneficiaryRepoInput, CreateFundRepoInput, CreateTransactionRepoInput, DomainError,
    DomainResult, TransactionStatus, UpdateBeneficiaryRepoInput, UpdateFundRepoInput,
    UpdateTransactionRepoInput,
};
use common::garde::validate_struct;
use garde::Validate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Decode a payload object into `T` and run its garde rules
pub fn decode_payload<T>(payload: &Map<String, Value>) -> DomainResult<T>
where
    T: DeserializeOwned + Validate,
    T::Context: Default,
{
    let decoded: T = serde_json::from_value(Value::Object(payload.clone()))
        .map_err(|e| DomainError::ValidationError(format!("payload: {}", e)))?;
    validate_struct(&decoded)?;
    Ok(decoded)
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DeletePayload {
    #[garde(range(min = 1))]
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBeneficiaryPayload {
    #[garde(length(chars, min = 1, max = 100))]
    pub name: String,
    #[garde(range(min = 0))]
    pub age: i32,
    #[garde(length(chars, min = 1, max = 100))]
    pub location: String,
}

impl From<CreateBeneficiaryPayload> for CreateBeneficiaryRepoInput {
    fn from(p: CreateBeneficiaryPayload) -> Self {
        Self {
            name: p.name,
            age: p.age,
            location: p.location,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateBeneficiaryPayload {
    #[garde(range(min = 1))]
    pub id: i64,
    #[serde(default)]
    #[garde(length(chars, min = 1, max = 100))]
    pub name: Option<String>,
    #[serde(default)]
    #[garde(range(min = 0))]
    pub age: Option<i32>,
    #[serde(default)]
    #[garde(length(chars, min = 1, max = 100))]
    pub location: Option<String>,
}

impl From<UpdateBeneficiaryPayload> for UpdateBeneficiaryRepoInput {
    fn from(p: UpdateBeneficiaryPayload) -> Self {
        Self {
            id: p.id,
            name: p.name,
            age: p.age,
            location: p.location,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateFundPayload {
    #[garde(range(min = 1))]
    pub amount_cents: i64,
    #[garde(length(chars, min = 1, max = 100))]
    pub source: String,
    #[serde(default)]
    #[garde(skip)]
    pub description: String,
}

impl From<CreateFundPayload> for CreateFundRepoInput {
    fn from(p: CreateFundPayload) -> Self {
        Self {
            amount_cents: p.amount_cents,
            source: p.source,
            description: p.description,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateFundPayload {
    #[garde(range(min = 1))]
    pub id: i64,
    #[serde(default)]
    #[garde(range(min = 1))]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    #[garde(length(chars, min = 1, max = 100))]
    pub source: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub description: Option<String>,
}

impl From<UpdateFundPayload> for UpdateFundRepoInput {
    fn from(p: UpdateFundPayload) -> Self {
        Self {
            id: p.id,
            amount_cents: p.amount_cents,
            source: p.source,
            description: p.description,
        }
    }
}

/// `fund` is the referenced fund's server identifier
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTransactionPayload {
    #[garde(range(min = 1))]
    pub fund: i64,
    #[garde(range(min = 1))]
    pub amount_cents: i64,
    #[garde(length(chars, min = 1, max = 100))]
    pub recipient: String,
    #[serde(default)]
    #[garde(skip)]
    pub status: TransactionStatus,
}

impl From<CreateTransactionPayload> for CreateTransactionRepoInput {
    fn from(p: CreateTransactionPayload) -> Self {
        Self {
            fund_id: p.fund,
            amount_cents: p.amount_cents,
            recipient: p.recipient,
            status: p.status,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateTransactionPayload {
    #[garde(range(min = 1))]
    pub id: i64,
    #[serde(default)]
    #[garde(range(min = 1))]
    pub fund: Option<i64>,
    #[serde(default)]
    #[garde(range(min = 1))]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    #[garde(length(chars, min = 1, max = 100))]
    pub recipient: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub status: Option<TransactionStatus>,
}

impl From<UpdateTransactionPayload> for UpdateTransactionRepoInput {
    fn from(p: UpdateTransactionPayload) -> Self {
        Self {
            id: p.id,
            fund_id: p.fund,
            amount_cents: p.amount_cents,
            recipient: p.recipient,
            status: p.status,
        }
    }
}
