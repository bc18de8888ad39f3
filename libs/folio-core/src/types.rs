//! Core types for the reader and its vocabulary trainer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ScheduleError;

/// Starting ease factor for a freshly captured card.
pub const INITIAL_EASE: f64 = 2.5;

/// Lower bound for the ease factor.
pub const MINIMUM_EASE: f64 = 1.3;

/// Recall quality on the SM-2 scale (0 = blackout, 5 = perfect).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Quality(u8);

impl Quality {
    pub const MAX: u8 = 5;

    /// Validate a raw rating.
    pub fn new(value: u8) -> Result<Self, ScheduleError> {
        if value <= Self::MAX {
            Ok(Self(value))
        } else {
            Err(ScheduleError::InvalidQuality(value))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Ratings of 3 and above count as a successful recall.
    pub fn is_pass(self) -> bool {
        self.0 >= 3
    }
}

impl TryFrom<u8> for Quality {
    type Error = ScheduleError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quality> for u8 {
    fn from(quality: Quality) -> Self {
        quality.0
    }
}

/// Where a word was captured while reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSource {
    pub document_id: String,
    pub page: u32,
}

/// Scheduling fields owned by the SM-2 scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulingState {
    pub interval: u32,
    pub ease_factor: f64,
    pub repetitions: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_review_at: Option<DateTime<Utc>>,
}

impl Default for SchedulingState {
    fn default() -> Self {
        Self {
            interval: 0,
            ease_factor: INITIAL_EASE,
            repetitions: 0,
            next_review_at: None,
        }
    }
}

/// A captured word with its spaced-repetition state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyCard {
    pub id: Uuid,
    pub word: String,
    pub meaning: String,
    pub mastered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_review_at: Option<DateTime<Utc>>,
    pub interval: u32,
    pub ease_factor: f64,
    pub repetitions: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CardSource>,
}

impl VocabularyCard {
    /// New card in its default scheduling state: never reviewed, due immediately.
    pub fn new(word: impl Into<String>, meaning: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let state = SchedulingState::default();
        Self {
            id: Uuid::new_v4(),
            word: word.into(),
            meaning: meaning.into(),
            mastered: false,
            next_review_at: state.next_review_at,
            interval: state.interval,
            ease_factor: state.ease_factor,
            repetitions: state.repetitions,
            created_at,
            source: None,
        }
    }

    pub fn with_source(mut self, document_id: impl Into<String>, page: u32) -> Self {
        self.source = Some(CardSource {
            document_id: document_id.into(),
            page,
        });
        self
    }

    pub fn scheduling(&self) -> SchedulingState {
        SchedulingState {
            interval: self.interval,
            ease_factor: self.ease_factor,
            repetitions: self.repetitions,
            next_review_at: self.next_review_at,
        }
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &CardPatch) {
        if let Some(word) = &patch.word {
            self.word = word.clone();
        }
        if let Some(meaning) = &patch.meaning {
            self.meaning = meaning.clone();
        }
        if let Some(mastered) = patch.mastered {
            self.mastered = mastered;
        }
        if let Some(next) = patch.next_review_at {
            self.next_review_at = Some(next);
        }
        if let Some(interval) = patch.interval {
            self.interval = interval;
        }
        if let Some(ease) = patch.ease_factor {
            self.ease_factor = ease;
        }
        if let Some(repetitions) = patch.repetitions {
            self.repetitions = repetitions;
        }
    }
}

/// Partial card update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meaning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mastered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_review_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ease_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetitions: Option<u32>,
}

impl CardPatch {
    /// Patch carrying a full scheduling state.
    pub fn scheduling(state: &SchedulingState) -> Self {
        Self {
            next_review_at: state.next_review_at,
            interval: Some(state.interval),
            ease_factor: Some(state.ease_factor),
            repetitions: Some(state.repetitions),
            ..Default::default()
        }
    }

    pub fn mastered(mastered: bool) -> Self {
        Self {
            mastered: Some(mastered),
            ..Default::default()
        }
    }
}

/// Reader and render cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    /// Pages rendered ahead of the current page.
    pub ahead_window: u32,
    /// Pages rendered behind the current page.
    pub behind_window: u32,
    pub initial_scale: f32,
    pub render_timeout_secs: u64,
    /// Consecutive render failures before the document is marked unavailable.
    pub max_consecutive_failures: u32,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            ahead_window: 3,
            behind_window: 1,
            initial_scale: 1.0,
            render_timeout_secs: 30,
            max_consecutive_failures: 3,
        }
    }
}

/// Review policy layered on top of the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewSettings {
    pub mastery_min_quality: u8,
    pub mastery_min_repetitions: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_limit: Option<usize>,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            mastery_min_quality: 4,
            mastery_min_repetitions: 3,
            session_limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_rejects_out_of_range() {
        assert!(Quality::new(5).is_ok());
        assert_eq!(Quality::new(6), Err(ScheduleError::InvalidQuality(6)));
    }

    #[test]
    fn new_card_has_default_scheduling() {
        let card = VocabularyCard::new("serendipity", "happy accident", Utc::now());
        assert_eq!(card.scheduling(), SchedulingState::default());
        assert!(!card.mastered);
    }

    #[test]
    fn patch_leaves_unset_fields_alone() {
        let mut card = VocabularyCard::new("word", "meaning", Utc::now());
        card.apply(&CardPatch::mastered(true));
        assert!(card.mastered);
        assert_eq!(card.ease_factor, INITIAL_EASE);
        assert_eq!(card.word, "word");
    }
}
