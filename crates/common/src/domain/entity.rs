use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{Beneficiary, EntityType, Fund, Transaction};

/// Authoritative entity returned by the canonical store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "fields")]
pub enum EntitySnapshot {
    Beneficiary(Beneficiary),
    Fund(Fund),
    Transaction(Transaction),
}

impl EntitySnapshot {
    pub fn id(&self) -> i64 {
        match self {
            EntitySnapshot::Beneficiary(b) => b.id,
            EntitySnapshot::Fund(f) => f.id,
            EntitySnapshot::Transaction(t) => t.id,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            EntitySnapshot::Beneficiary(_) => EntityType::Beneficiary,
            EntitySnapshot::Fund(_) => EntityType::Fund,
            EntitySnapshot::Transaction(_) => EntityType::Transaction,
        }
    }

    /// Field values as a JSON object, suitable for a read cache
    pub fn to_fields(&self) -> Map<String, Value> {
        let value = match self {
            EntitySnapshot::Beneficiary(b) => serde_json::to_value(b),
            EntitySnapshot::Fund(f) => serde_json::to_value(f),
            EntitySnapshot::Transaction(t) => serde_json::to_value(t),
        };
        match value {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        }
    }
}

impl From<Beneficiary> for EntitySnapshot {
    fn from(value: Beneficiary) -> Self {
        EntitySnapshot::Beneficiary(value)
    }
}

impl From<Fund> for EntitySnapshot {
    fn from(value: Fund) -> Self {
        EntitySnapshot::Fund(value)
    }
}

impl From<Transaction> for EntitySnapshot {
    fn from(value: Transaction) -> Self {
        EntitySnapshot::Transaction(value)
    }
}
