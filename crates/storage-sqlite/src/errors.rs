//! Storage-layer error type and its mapping onto the core error model.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Diesel(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be interpreted (bad timestamp, bad JSON
    /// envelope shape).
    #[error("Invalid stored row: {0}")]
    InvalidRow(String),

    /// The write actor's thread is gone; no further writes are possible.
    #[error("Database writer is unavailable")]
    WriterGone,
}

impl StorageError {
    fn is_corruption(&self) -> bool {
        match self {
            Self::Diesel(diesel::result::Error::DatabaseError(_, info)) => {
                let message = info.message();
                message.contains("malformed") || message.contains("corrupt")
            }
            _ => false,
        }
    }
}

impl From<StorageError> for mirrorkit_core::Error {
    fn from(err: StorageError) -> Self {
        use mirrorkit_core::DatabaseError;

        let message = err.to_string();
        let database = if err.is_corruption() {
            DatabaseError::Corruption(message)
        } else {
            match err {
                StorageError::Diesel(_) => DatabaseError::QueryFailed(message),
                StorageError::Json(_) | StorageError::InvalidRow(_) => {
                    DatabaseError::Internal(message)
                }
                StorageError::WriterGone => DatabaseError::WriteFailed(message),
                _ => DatabaseError::Internal(message),
            }
        };
        mirrorkit_core::Error::Database(database)
    }
}
