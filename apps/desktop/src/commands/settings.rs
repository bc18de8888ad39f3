//! Settings commands.

use crate::db::SettingsRepository;
use crate::state::AppState;
use folio_core::{ReaderSettings, ReviewSettings};

use super::CommandError;

/// Get reader settings (defaults if never saved).
pub fn get_reader_settings(state: &AppState) -> Result<ReaderSettings, CommandError> {
    state.repository.get_reader_settings().map_err(Into::into)
}

/// Save reader settings. Applies to documents opened afterwards.
pub fn save_reader_settings(settings: ReaderSettings, state: &AppState) -> Result<(), CommandError> {
    if settings.initial_scale <= 0.0 || !settings.initial_scale.is_finite() {
        return Err(CommandError::new(format!("invalid scale {}", settings.initial_scale)));
    }
    state.repository.save_reader_settings(&settings).map_err(Into::into)
}

pub fn get_review_settings(state: &AppState) -> Result<ReviewSettings, CommandError> {
    state.repository.get_review_settings().map_err(Into::into)
}

pub fn save_review_settings(settings: ReviewSettings, state: &AppState) -> Result<(), CommandError> {
    if settings.mastery_min_quality > folio_core::Quality::MAX {
        return Err(CommandError::new(format!(
            "mastery quality {} is outside 0..=5",
            settings.mastery_min_quality
        )));
    }
    state.repository.save_review_settings(&settings).map_err(Into::into)
}
