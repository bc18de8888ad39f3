//! Page rendering: renderer interface, bounded page cache, reading session.
//!
//! The document engine (PDF/EPUB decode) lives outside this crate and is
//! reached through [`PageRenderer`]. Rendered bitmaps are owned by the
//! [`PageRenderCache`]; painting borrows them for the duration of a
//! [`PageSink::paint`] call only.

pub mod cache;
pub mod session;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RenderError;

pub use cache::{CacheStats, PageRenderCache, RenderOutcome};
pub use session::{DocumentSession, NavigationOutcome, RenderPhase};

/// Render scale factor. Compared through an integer key so float noise
/// (1.0 vs 0.99999) never splits the cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderScale(f32);

impl RenderScale {
    pub const DEFAULT: RenderScale = RenderScale(1.0);

    pub fn new(scale: f32) -> Self {
        Self(scale)
    }

    pub fn get(self) -> f32 {
        self.0
    }

    /// Scale * 100, rounded, for hashing and equality.
    pub fn key(self) -> u32 {
        (self.0 * 100.0).round().max(0.0) as u32
    }
}

impl Default for RenderScale {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl PartialEq for RenderScale {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for RenderScale {}

impl fmt::Display for RenderScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}x", self.0)
    }
}

/// Document engine handle for one open document.
///
/// Pages are numbered from 1.
#[async_trait]
pub trait PageRenderer: Send + Sync + 'static {
    /// Rasterized page. Owned by the cache once produced.
    type Bitmap: Send + Sync + 'static;

    fn page_count(&self) -> u32;

    /// Rasterize a page. May be slow (hundreds of milliseconds).
    async fn render_page(&self, page: u32, scale: RenderScale) -> Result<Self::Bitmap, RenderError>;

    /// Free the native resources behind a bitmap.
    fn release(&self, bitmap: Self::Bitmap) {
        drop(bitmap);
    }
}

/// Receiver of committed pages: the paint target plus progress hooks.
pub trait PageSink<B>: Send + Sync {
    /// Paint a committed page. The bitmap must not be retained past this call.
    fn paint(&self, page: u32, bitmap: &B);

    /// Called after a page is committed as the current page.
    fn on_page_change(&self, _page: u32, _total_pages: u32) {}

    /// Called when the requested page failed to render.
    fn on_error(&self, _page: u32, _error: &RenderError) {}
}
