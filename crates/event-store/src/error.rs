use migrate::MigrationError;
use thiserror::Error;

use crate::{AggregateId, Version};

/// A stored row could not be turned back into a record.
///
/// Indicates corrupted data or a schema mismatch; the whole record is
/// discarded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A column was missing or had an unexpected type.
    #[error("could not read column {column}: {source}")]
    Column {
        column: &'static str,
        source: sqlx::Error,
    },

    /// The stored timestamp is not valid RFC3339.
    #[error("invalid RFC3339 timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        source: chrono::ParseError,
    },
}

/// Errors that can occur when interacting with the event or snapshot store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The first event of a batch is not the aggregate's next version, or a
    /// concurrent writer stored the same version first.
    ///
    /// The caller should re-read the aggregate and retry.
    #[error(
        "Concurrency conflict for aggregate {aggregate_type}/{aggregate_id}: expected next version {expected}, store is at {actual}"
    )]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        aggregate_type: String,
        expected: Version,
        actual: Version,
    },

    /// The events passed to a single save do not form one contiguous batch.
    #[error("Invalid event batch: {0}")]
    InvalidBatch(String),

    /// No snapshot exists for the aggregate.
    #[error("Snapshot not found: {aggregate_type}/{id}")]
    SnapshotNotFound {
        id: AggregateId,
        aggregate_type: String,
    },

    /// A stored row could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Converging the store schema failed.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// True for errors the caller may resolve by re-reading and retrying.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
