//! Due-card selection and review sessions.
//!
//! Every selector goes through [`is_due`], so the badge count and the queue
//! a session actually studies can never disagree.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::algorithm::schedule_card;
use crate::error::{Result, StoreError};
use crate::store::VocabularyStore;
use crate::types::{CardPatch, Quality, ReviewSettings, SchedulingState, VocabularyCard};

/// A card is due when it is not mastered and its review date is unset or has arrived.
pub fn is_due<Tz: TimeZone>(card: &VocabularyCard, now: &DateTime<Tz>) -> bool {
    if card.mastered {
        return false;
    }
    match card.next_review_at {
        None => true,
        Some(next) => next <= now.with_timezone(&Utc),
    }
}

/// Due cards in random order.
pub fn due_queue<S, Tz, R>(store: &S, now: &DateTime<Tz>, rng: &mut R) -> Result<Vec<VocabularyCard>>
where
    S: VocabularyStore + ?Sized,
    Tz: TimeZone,
    R: Rng + ?Sized,
{
    let mut cards = store.get_all(&|card: &VocabularyCard| is_due(card, now))?;
    cards.shuffle(rng);
    Ok(cards)
}

/// [`due_queue`] shuffled with the thread-local RNG.
pub fn due_queue_shuffled<S, Tz>(store: &S, now: &DateTime<Tz>) -> Result<Vec<VocabularyCard>>
where
    S: VocabularyStore + ?Sized,
    Tz: TimeZone,
{
    due_queue(store, now, &mut rand::rng())
}

/// Number of due cards, for badges.
pub fn due_count<S, Tz>(store: &S, now: &DateTime<Tz>) -> Result<usize>
where
    S: VocabularyStore + ?Sized,
    Tz: TimeZone,
{
    Ok(store.get_all(&|card: &VocabularyCard| is_due(card, now))?.len())
}

/// Mastery gate applied after the scheduler has run.
pub fn reaches_mastery(quality: Quality, after: &SchedulingState, settings: &ReviewSettings) -> bool {
    quality.value() >= settings.mastery_min_quality && after.repetitions >= settings.mastery_min_repetitions
}

/// What a single review changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub card_id: Uuid,
    pub quality: Quality,
    pub before: SchedulingState,
    pub after: SchedulingState,
    pub mastered: bool,
}

/// Review one card: schedule it, apply the mastery gate, write it back.
pub fn submit_review<S, Tz>(
    store: &S,
    card_id: Uuid,
    quality: Quality,
    now: &DateTime<Tz>,
    settings: &ReviewSettings,
) -> Result<ReviewOutcome>
where
    S: VocabularyStore + ?Sized,
    Tz: TimeZone,
{
    let card = store.get(card_id)?.ok_or(StoreError::NotFound(card_id))?;
    let result = schedule_card(&card, quality, now)?;
    let after = result.state();
    let mastered = reaches_mastery(quality, &after, settings);

    let mut patch = CardPatch::scheduling(&after);
    if mastered {
        patch.mastered = Some(true);
    }
    store.update(card_id, &patch)?;

    tracing::debug!(
        card = %card_id,
        quality = quality.value(),
        interval = after.interval,
        ease = after.ease_factor,
        mastered,
        "review recorded"
    );

    Ok(ReviewOutcome {
        card_id,
        quality,
        before: card.scheduling(),
        after,
        mastered: mastered || card.mastered,
    })
}

/// Flip the mastered flag without touching scheduling fields.
pub fn toggle_mastered<S>(store: &S, card_id: Uuid) -> Result<bool>
where
    S: VocabularyStore + ?Sized,
{
    let card = store.get(card_id)?.ok_or(StoreError::NotFound(card_id))?;
    let mastered = !card.mastered;
    store.update(card_id, &CardPatch::mastered(mastered))?;
    Ok(mastered)
}

/// Aggregate of one sitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total: usize,
    pub reviewed: usize,
    pub passed: usize,
    pub failed: usize,
    pub average_quality: Option<f64>,
    pub newly_mastered: Vec<Uuid>,
}

/// One sitting over a shuffled snapshot of due cards. Not persisted.
#[derive(Debug, Clone)]
pub struct ReviewSession {
    cards: Vec<VocabularyCard>,
    position: usize,
    results: HashMap<Uuid, Quality>,
    newly_mastered: Vec<Uuid>,
}

impl ReviewSession {
    /// Snapshot the due queue, truncated to the configured session limit.
    pub fn start<S, Tz, R>(store: &S, now: &DateTime<Tz>, settings: &ReviewSettings, rng: &mut R) -> Result<Self>
    where
        S: VocabularyStore + ?Sized,
        Tz: TimeZone,
        R: Rng + ?Sized,
    {
        let mut cards = due_queue(store, now, rng)?;
        if let Some(limit) = settings.session_limit {
            cards.truncate(limit);
        }
        tracing::info!(cards = cards.len(), "review session started");
        Ok(Self::from_cards(cards))
    }

    pub fn from_cards(cards: Vec<VocabularyCard>) -> Self {
        Self {
            cards,
            position: 0,
            results: HashMap::new(),
            newly_mastered: Vec::new(),
        }
    }

    pub fn cards(&self) -> &[VocabularyCard] {
        &self.cards
    }

    pub fn current(&self) -> Option<&VocabularyCard> {
        self.cards.get(self.position)
    }

    pub fn remaining(&self) -> usize {
        self.cards.len() - self.position
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.cards.len()
    }

    pub fn results(&self) -> &HashMap<Uuid, Quality> {
        &self.results
    }

    /// Grade the current card and move to the next one.
    ///
    /// Returns `None` once the session is finished.
    pub fn answer<S, Tz>(
        &mut self,
        store: &S,
        quality: Quality,
        now: &DateTime<Tz>,
        settings: &ReviewSettings,
    ) -> Result<Option<ReviewOutcome>>
    where
        S: VocabularyStore + ?Sized,
        Tz: TimeZone,
    {
        let Some(card) = self.current() else {
            return Ok(None);
        };
        let card_id = card.id;
        let was_mastered = card.mastered;

        let outcome = submit_review(store, card_id, quality, now, settings)?;
        self.results.insert(card_id, quality);
        if outcome.mastered && !was_mastered {
            self.newly_mastered.push(card_id);
        }
        self.position += 1;
        Ok(Some(outcome))
    }

    /// Move past the current card without grading it.
    pub fn skip(&mut self) {
        if !self.is_finished() {
            self.position += 1;
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let reviewed = self.results.len();
        let passed = self.results.values().filter(|q| q.is_pass()).count();
        let average_quality = (reviewed > 0).then(|| {
            let sum: u32 = self.results.values().map(|q| u32::from(q.value())).sum();
            f64::from(sum) / reviewed as f64
        });

        SessionSummary {
            total: self.cards.len(),
            reviewed,
            passed,
            failed: reviewed - passed,
            average_quality,
            newly_mastered: self.newly_mastered.clone(),
        }
    }
}
