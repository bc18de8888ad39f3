//! Vocabulary and review commands.

use crate::db::SettingsRepository;
use crate::state::AppState;
use chrono::Utc;
use folio_core::{review, Quality, ReviewOutcome, ReviewSession, SessionSummary, VocabularyCard, VocabularyStore};
use uuid::Uuid;

use super::CommandError;

#[derive(Debug, serde::Deserialize)]
pub struct AddWordRequest {
    pub word: String,
    pub meaning: String,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
}

/// Position within the active review sitting.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ReviewState {
    pub total: usize,
    pub remaining: usize,
    pub current: Option<VocabularyCard>,
}

impl ReviewState {
    fn of(session: &ReviewSession) -> Self {
        Self {
            total: session.cards().len(),
            remaining: session.remaining(),
            current: session.current().cloned(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AnswerResponse {
    pub outcome: Option<ReviewOutcome>,
    pub state: ReviewState,
    /// Present once the last card has been answered.
    pub summary: Option<SessionSummary>,
}

/// Save a new word, optionally tagged with where it was read.
pub fn add_word(request: AddWordRequest, state: &AppState) -> Result<VocabularyCard, CommandError> {
    let word = request.word.trim();
    if word.is_empty() {
        return Err(CommandError::new("word must not be empty"));
    }

    let created_at = state.clock.now().with_timezone(&Utc);
    let mut card = VocabularyCard::new(word, request.meaning.trim(), created_at);
    if let Some(document_id) = request.document_id {
        card = card.with_source(document_id, request.page.unwrap_or(1));
    }
    state.repository.insert(&card)?;

    tracing::info!(card = %card.id, word = %card.word, "word added");
    Ok(card)
}

/// Start a review sitting over the currently due cards, replacing any sitting in progress.
pub fn start_review(state: &AppState) -> Result<ReviewState, CommandError> {
    let settings = state.repository.get_review_settings()?;
    let now = state.clock.now();
    let session = ReviewSession::start(state.repository.as_ref(), &now, &settings, &mut rand::rng())?;

    let view = ReviewState::of(&session);
    *state.review.lock() = Some(session);
    Ok(view)
}

/// Grade the current card of the active sitting.
pub fn answer_review(quality: u8, state: &AppState) -> Result<AnswerResponse, CommandError> {
    let quality = Quality::new(quality)?;
    let settings = state.repository.get_review_settings()?;
    let now = state.clock.now();

    let mut guard = state.review.lock();
    let session = guard
        .as_mut()
        .ok_or_else(|| CommandError::new("no review in progress"))?;

    let outcome = session.answer(state.repository.as_ref(), quality, &now, &settings)?;
    let view = ReviewState::of(session);
    let summary = session.is_finished().then(|| session.summary());
    if summary.is_some() {
        *guard = None;
    }

    Ok(AnswerResponse {
        outcome,
        state: view,
        summary,
    })
}

/// Number of cards due now, for the badge.
pub fn due_count(state: &AppState) -> Result<usize, CommandError> {
    let now = state.clock.now();
    review::due_count(state.repository.as_ref(), &now).map_err(Into::into)
}

/// Flip a card's mastered flag. Returns the new value.
pub fn toggle_mastered(card_id: Uuid, state: &AppState) -> Result<bool, CommandError> {
    review::toggle_mastered(state.repository.as_ref(), card_id).map_err(Into::into)
}

/// Words saved while reading one document, in page order.
pub fn words_from_document(document_id: String, state: &AppState) -> Result<Vec<VocabularyCard>, CommandError> {
    state.repository.cards_from_document(&document_id).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteRepository;
    use chrono::{Duration, FixedOffset, TimeZone};
    use folio_core::FixedClock;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn state() -> (AppState, Arc<FixedClock>) {
        let now = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 4, 20, 0, 0)
            .unwrap();
        let clock = Arc::new(FixedClock::new(now));
        let state = AppState::with_clock(SqliteRepository::open_in_memory().unwrap(), clock.clone());
        (state, clock)
    }

    fn request(word: &str) -> AddWordRequest {
        AddWordRequest {
            word: word.to_string(),
            meaning: format!("meaning of {word}"),
            document_id: Some("novel".to_string()),
            page: Some(12),
        }
    }

    #[test]
    fn added_words_are_due_immediately() {
        let (state, _clock) = state();
        add_word(request("sonder"), &state).unwrap();
        add_word(request("vellichor"), &state).unwrap();
        assert_eq!(due_count(&state).unwrap(), 2);
    }

    #[test]
    fn empty_word_is_rejected() {
        let (state, _clock) = state();
        assert!(add_word(request("   "), &state).is_err());
    }

    #[test]
    fn full_review_sitting() {
        let (state, clock) = state();
        add_word(request("sonder"), &state).unwrap();
        add_word(request("vellichor"), &state).unwrap();

        let started = start_review(&state).unwrap();
        assert_eq!((started.total, started.remaining), (2, 2));

        let first = answer_review(5, &state).unwrap();
        assert!(first.summary.is_none());
        assert_eq!(first.state.remaining, 1);

        let last = answer_review(1, &state).unwrap();
        let summary = last.summary.unwrap();
        assert_eq!((summary.reviewed, summary.passed, summary.failed), (2, 1, 1));
        assert!(state.review.lock().is_none());

        // Both cards now have a next review date of tomorrow at the earliest.
        assert_eq!(due_count(&state).unwrap(), 0);
        clock.advance(Duration::days(1));
        assert_eq!(due_count(&state).unwrap(), 2);
    }

    #[test]
    fn answer_without_sitting_fails() {
        let (state, _clock) = state();
        let err = answer_review(3, &state).unwrap_err();
        assert_eq!(err.message, "no review in progress");
    }

    #[test]
    fn out_of_range_quality_is_rejected() {
        let (state, _clock) = state();
        add_word(request("sonder"), &state).unwrap();
        start_review(&state).unwrap();
        assert!(answer_review(6, &state).is_err());
        assert_eq!(state.review.lock().as_ref().unwrap().remaining(), 1);
    }

    #[test]
    fn mastered_cards_leave_the_queue() {
        let (state, _clock) = state();
        let card = add_word(request("sonder"), &state).unwrap();

        assert!(toggle_mastered(card.id, &state).unwrap());
        assert_eq!(due_count(&state).unwrap(), 0);
        assert!(!toggle_mastered(card.id, &state).unwrap());
        assert_eq!(due_count(&state).unwrap(), 1);
    }

    #[test]
    fn words_are_listed_per_document_in_page_order() {
        let (state, _clock) = state();
        add_word(request("sonder"), &state).unwrap();
        add_word(
            AddWordRequest {
                page: Some(3),
                ..request("vellichor")
            },
            &state,
        )
        .unwrap();
        add_word(
            AddWordRequest {
                document_id: Some("essay".to_string()),
                ..request("apricity")
            },
            &state,
        )
        .unwrap();
        add_word(
            AddWordRequest {
                document_id: None,
                ..request("petrichor")
            },
            &state,
        )
        .unwrap();

        let words: Vec<String> = words_from_document("novel".to_string(), &state)
            .unwrap()
            .into_iter()
            .map(|card| card.word)
            .collect();
        assert_eq!(words, vec!["vellichor", "sonder"]);
        assert!(words_from_document("unknown".to_string(), &state).unwrap().is_empty());
    }
}
