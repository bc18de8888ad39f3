//! Commands exposed to the frontend.

pub mod reader;
pub mod settings;
pub mod study;

use folio_core::{ScheduleError, SessionError, StoreError};

pub use reader::{get_progress, open_document, recent_documents, ProgressSink};
pub use settings::{get_reader_settings, get_review_settings, save_reader_settings, save_review_settings};
pub use study::{add_word, answer_review, due_count, start_review, toggle_mastered, words_from_document, AddWordRequest, AnswerResponse, ReviewState};

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct CommandError {
    pub message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<crate::db::DbError> for CommandError {
    fn from(e: crate::db::DbError) -> Self {
        Self { message: e.to_string() }
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        Self { message: e.to_string() }
    }
}

impl From<ScheduleError> for CommandError {
    fn from(e: ScheduleError) -> Self {
        Self { message: e.to_string() }
    }
}

impl From<SessionError> for CommandError {
    fn from(e: SessionError) -> Self {
        Self { message: e.to_string() }
    }
}
