//! Core library for the folio reader.
//!
//! Provides:
//! - SM-2 scheduling for vocabulary cards
//! - Due-card selection and review sessions over a pluggable store
//! - A windowed page render cache with background prefetch
//! - The reading session controller (navigation, last-request-wins commits)

pub mod algorithm;
pub mod clock;
pub mod error;
pub mod render;
pub mod review;
pub mod store;
pub mod types;

pub use algorithm::{schedule, schedule_card, SchedulingResult};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{RenderError, Result, ScheduleError, SessionError, StoreError};
pub use render::{
    CacheStats, DocumentSession, NavigationOutcome, PageRenderCache, PageRenderer, PageSink,
    RenderOutcome, RenderPhase, RenderScale,
};
pub use review::{
    due_count, due_queue, due_queue_shuffled, is_due, submit_review, toggle_mastered,
    ReviewOutcome, ReviewSession, SessionSummary,
};
pub use store::{MemoryStore, VocabularyStore};
pub use types::{
    CardPatch, CardSource, Quality, ReaderSettings, ReviewSettings, SchedulingState,
    VocabularyCard, INITIAL_EASE, MINIMUM_EASE,
};
