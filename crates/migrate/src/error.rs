use thiserror::Error;

/// Errors that can occur while converging a database schema.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The tracking table name is not a plain SQL identifier.
    #[error("Invalid migration table name: {0:?}")]
    InvalidTableName(String),

    /// The tracking table records more migrations than are defined.
    ///
    /// This usually means an older binary is running against a database
    /// migrated by a newer one. It is never recovered automatically.
    #[error("Too many applied migrations: {applied} recorded, {defined} defined")]
    TooManyAppliedMigrations { applied: usize, defined: usize },

    /// An applied migration does not sit at the position it was recorded at.
    #[error(
        "Migration mismatch at position {sequence_id}: expected {expected:?}, tracking table has {found:?}"
    )]
    MigrationMismatch {
        sequence_id: usize,
        expected: String,
        found: String,
    },

    /// An applied migration kept its name but its definition changed.
    #[error("Checksum mismatch for migration {sequence_id} ({name})")]
    ChecksumMismatch { sequence_id: usize, name: String },

    /// The migration action itself failed. Its transaction was rolled back.
    #[error("Error executing migration {sequence_id} ({name}): {source}")]
    Execution {
        sequence_id: usize,
        name: String,
        source: sqlx::Error,
    },

    /// The action succeeded but recording it failed. The transaction was rolled back.
    #[error("Error recording migration {sequence_id}: {source}")]
    Tracking {
        sequence_id: usize,
        source: sqlx::Error,
    },

    /// A database error occurred outside a migration action.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
