//! Spaced repetition scheduling.

pub mod sm2;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::SchedulingState;

pub use sm2::{schedule, schedule_card};

/// Result of scheduling a card after review.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulingResult {
    pub next_review_at: DateTime<Utc>,
    pub interval: u32,
    pub ease_factor: f64,
    pub repetitions: u32,
}

impl SchedulingResult {
    pub fn state(&self) -> SchedulingState {
        SchedulingState {
            interval: self.interval,
            ease_factor: self.ease_factor,
            repetitions: self.repetitions,
            next_review_at: Some(self.next_review_at),
        }
    }
}
