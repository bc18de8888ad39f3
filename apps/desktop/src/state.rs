//! Application state.

use crate::db::SqliteRepository;
use folio_core::{Clock, ReviewSession, SystemClock};
use parking_lot::Mutex;
use std::sync::Arc;

/// Global application state.
pub struct AppState {
    pub repository: Arc<SqliteRepository>,
    pub clock: Arc<dyn Clock>,
    /// Review sitting in progress, if any.
    pub review: Mutex<Option<ReviewSession>>,
}

impl AppState {
    pub fn new(repository: SqliteRepository) -> Self {
        Self::with_clock(repository, Arc::new(SystemClock))
    }

    pub fn with_clock(repository: SqliteRepository, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository: Arc::new(repository),
            clock,
            review: Mutex::new(None),
        }
    }
}
