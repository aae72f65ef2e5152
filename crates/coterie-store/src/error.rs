use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// An insert collided with an existing row for the same key.
    #[error("Record already exists")]
    AlreadyExists,

    /// A message body exceeds the storage column limit.
    #[error("Message body too long: {size} bytes (max {max})")]
    BodyTooLong { size: usize, max: usize },

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Identifier parsing error.
    #[error("Identifier error: {0}")]
    BadId(#[from] coterie_shared::types::ParseIdError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
