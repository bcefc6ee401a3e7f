//! Error types shared across the workspace.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Store-level failures reported by a `MirrorStore`/`ChangeLogStore`
/// implementation.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A query failed to execute.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A write could not be committed.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// The on-disk store reported a corruption signature. Recovery is an
    /// external collaborator's responsibility; callers log this as critical
    /// and continue degraded.
    #[error("Store corruption detected: {0}")]
    Corruption(String),

    /// Catch-all for unexpected store conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors surfaced by the core synchronization layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// A remote batch contained the same id twice. Reconciliation refuses
    /// to pick a winner; the batch is rejected before any store mutation.
    #[error("Duplicate remote id {id} in collection '{collection}'")]
    DuplicateRemoteId { collection: String, id: i64 },

    /// A response envelope could not be decoded at all.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Secret store error: {0}")]
    SecretStore(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }

    /// True when the underlying store reported corruption.
    pub fn is_store_corruption(&self) -> bool {
        matches!(self, Self::Database(DatabaseError::Corruption(_)))
    }
}
