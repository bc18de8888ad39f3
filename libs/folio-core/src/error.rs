//! Error types for folio-core.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Rejected scheduler input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("quality rating {0} is outside 0..=5")]
    InvalidQuality(u8),

    #[error("ease factor {0} is below the 1.3 floor or not finite")]
    InvalidEaseFactor(f64),
}

/// Errors raised by a vocabulary store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("card not found: {0}")]
    NotFound(Uuid),

    #[error("duplicate card id: {0}")]
    Duplicate(Uuid),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Errors produced while rasterizing a page.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("failed to decode page {page}: {message}")]
    Decode { page: u32, message: String },

    #[error("page {0} does not exist in this document")]
    PageNotFound(u32),

    #[error("render timed out after {0:?}")]
    Timeout(Duration),

    /// The cache was shut down before the render started.
    #[error("render cancelled")]
    Cancelled,
}

/// Errors surfaced by a document session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("page {page} is outside 1..={total}")]
    PageOutOfRange { page: u32, total: u32 },

    #[error("document is unavailable after {failures} consecutive render failures")]
    DocumentUnavailable { failures: u32 },

    #[error("document session is closed")]
    Closed,

    #[error(transparent)]
    Render(#[from] RenderError),
}
