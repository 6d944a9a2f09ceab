use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{DomainError, EntitySnapshot};

/// Kind of write carried by a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl MutationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationAction::Create => "create",
            MutationAction::Update => "update",
            MutationAction::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(MutationAction::Create),
            "update" => Ok(MutationAction::Update),
            "delete" => Ok(MutationAction::Delete),
            other => Err(DomainError::InvalidMutation(format!(
                "Invalid action: {}",
                other
            ))),
        }
    }
}

/// Entity types that can be mutated offline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityType {
    Beneficiary,
    Fund,
    Transaction,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [
        EntityType::Beneficiary,
        EntityType::Fund,
        EntityType::Transaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Beneficiary => "Beneficiary",
            EntityType::Fund => "Fund",
            EntityType::Transaction => "Transaction",
        }
    }

    /// Path segment of the list endpoint for this entity type
    pub fn collection(&self) -> &'static str {
        match self {
            EntityType::Beneficiary => "beneficiaries",
            EntityType::Fund => "funds",
            EntityType::Transaction => "transactions",
        }
    }

    /// Payload fields holding identifiers of other entities
    pub fn reference_fields(&self) -> &'static [&'static str] {
        match self {
            EntityType::Transaction => &[FUND_FIELD],
            EntityType::Beneficiary | EntityType::Fund => &[],
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Beneficiary" => Ok(EntityType::Beneficiary),
            "Fund" => Ok(EntityType::Fund),
            "Transaction" => Ok(EntityType::Transaction),
            other => Err(DomainError::InvalidMutation(format!(
                "Invalid entity_type: {}",
                other
            ))),
        }
    }
}

/// Payload field carrying the target entity identifier
pub const ID_FIELD: &str = "id";

/// Payload field carrying a transaction's fund identifier
pub const FUND_FIELD: &str = "fund";

/// An identifier as carried in a payload.
///
/// Server identifiers are positive. An entity created offline is addressed by
/// the negated local id of the `Create` record that introduced it until the
/// server assigns its permanent identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Server(i64),
    Local(u64),
}

impl EntityRef {
    pub fn from_raw(raw: i64) -> Self {
        if raw < 0 {
            EntityRef::Local(raw.unsigned_abs())
        } else {
            EntityRef::Server(raw)
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().map(Self::from_raw)
    }
}

/// Temporary identifier for an entity introduced by the `Create` record `local_id`
pub fn temporary_id(local_id: u64) -> i64 {
    -(local_id as i64)
}

/// One mutation as sent over the wire to the batch endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEntry {
    pub action: MutationAction,
    pub entity_type: EntityType,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl MutationEntry {
    /// Target identifier for update and delete entries
    pub fn target_id(&self) -> Option<i64> {
        self.payload.get(ID_FIELD).and_then(Value::as_i64)
    }
}

/// Build the idempotency key for a record dispatched from a device
pub fn idempotency_key(device_id: &str, local_id: u64) -> String {
    format!("{}:{}", device_id, local_id)
}

/// Per-entry outcome reported by the batch applier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Success,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryErrorKind {
    /// Unknown action or entity type, or a malformed entry
    InvalidEntry,
    /// Business rule or field validation failure
    Validation,
    /// Target identifier does not exist in the canonical store
    NotFound,
    Internal,
}

/// Structured reason attached to an `error` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryError {
    pub kind: EntryErrorKind,
    pub message: String,
}

impl From<&DomainError> for EntryError {
    fn from(err: &DomainError) -> Self {
        Self {
            kind: err.entry_error_kind(),
            message: err.to_string(),
        }
    }
}

/// Result for one submitted entry, parallel to the request list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntryResult {
    pub entry: Value,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EntryError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntitySnapshot>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

impl BatchEntryResult {
    pub fn success(entry: Value, entity: Option<EntitySnapshot>) -> Self {
        Self {
            entry,
            status: EntryStatus::Success,
            error: None,
            entity,
            duplicate: false,
        }
    }

    pub fn error(entry: Value, error: EntryError) -> Self {
        Self {
            entry,
            status: EntryStatus::Error,
            error: Some(error),
            entity: None,
            duplicate: false,
        }
    }

    pub fn skipped(entry: Value) -> Self {
        Self {
            entry,
            status: EntryStatus::Skipped,
            error: None,
            entity: None,
            duplicate: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<BatchEntryResult>,
}
