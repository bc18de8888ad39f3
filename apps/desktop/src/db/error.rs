//! Database error types.

use folio_core::StoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("settings encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("card not found: {0}")]
    CardNotFound(Uuid),

    #[error("duplicate card id: {0}")]
    DuplicateCard(Uuid),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::CardNotFound(id) => StoreError::NotFound(id),
            DbError::DuplicateCard(id) => StoreError::Duplicate(id),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
