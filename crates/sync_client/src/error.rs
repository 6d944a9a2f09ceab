use std::io;

use chrono::{DateTime, Utc};
use common::domain::{EntryError, EntryErrorKind, TransportError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the durable local store
#[derive(Error, Debug)]
pub enum LocalStoreError {
    /// The device ran out of space; nothing was written
    #[error("Local storage exhausted: {0}")]
    StorageExhausted(String),

    #[error("Local storage error: {0}")]
    Storage(#[source] redb::Error),

    #[error("Corrupt local record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Failed to encode local record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("No queued mutation with local id {0}")]
    RecordNotFound(u64),
}

fn is_storage_full(err: &io::Error) -> bool {
    // ENOSPC
    err.kind() == io::ErrorKind::StorageFull || err.raw_os_error() == Some(28)
}

impl From<redb::Error> for LocalStoreError {
    fn from(err: redb::Error) -> Self {
        match err {
            redb::Error::Io(io_err) if is_storage_full(&io_err) => {
                LocalStoreError::StorageExhausted(io_err.to_string())
            }
            other => LocalStoreError::Storage(other),
        }
    }
}

impl From<redb::DatabaseError> for LocalStoreError {
    fn from(err: redb::DatabaseError) -> Self {
        redb::Error::from(err).into()
    }
}

impl From<redb::TransactionError> for LocalStoreError {
    fn from(err: redb::TransactionError) -> Self {
        redb::Error::from(err).into()
    }
}

impl From<redb::TableError> for LocalStoreError {
    fn from(err: redb::TableError) -> Self {
        redb::Error::from(err).into()
    }
}

impl From<redb::StorageError> for LocalStoreError {
    fn from(err: redb::StorageError) -> Self {
        redb::Error::from(err).into()
    }
}

impl From<redb::CommitError> for LocalStoreError {
    fn from(err: redb::CommitError) -> Self {
        redb::Error::from(err).into()
    }
}

/// Failure categories surfaced to the user for a queued record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// Endpoint unreachable or reply unreadable; always retried
    TransientNetwork,
    Validation,
    NotFound,
    InvalidEntry,
    Internal,
}

impl SyncErrorKind {
    /// Whether the failure counts towards the attempt cap
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SyncErrorKind::Validation | SyncErrorKind::NotFound | SyncErrorKind::InvalidEntry
        )
    }
}

impl From<EntryErrorKind> for SyncErrorKind {
    fn from(kind: EntryErrorKind) -> Self {
        match kind {
            EntryErrorKind::InvalidEntry => SyncErrorKind::InvalidEntry,
            EntryErrorKind::Validation => SyncErrorKind::Validation,
            EntryErrorKind::NotFound => SyncErrorKind::NotFound,
            EntryErrorKind::Internal => SyncErrorKind::Internal,
        }
    }
}

/// Last failure recorded against a queued record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub kind: SyncErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl SyncFailure {
    pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

impl From<&EntryError> for SyncFailure {
    fn from(err: &EntryError) -> Self {
        Self::new(err.kind.into(), err.message.clone())
    }
}

impl From<&TransportError> for SyncFailure {
    fn from(err: &TransportError) -> Self {
        Self::new(SyncErrorKind::TransientNetwork, err.to_string())
    }
}
