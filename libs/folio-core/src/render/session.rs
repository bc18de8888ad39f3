//! Reading session controller.
//!
//! Every navigation takes a fresh token from a monotonic counter. A render
//! only paints if its token is still the latest when it finishes, so a slow
//! page can never overwrite a newer one. Superseded renders still run to
//! completion and may populate the cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Duration;

use super::cache::{CacheStats, PageRenderCache};
use super::{PageRenderer, PageSink, RenderScale};
use crate::error::{RenderError, SessionError};
use crate::types::ReaderSettings;

/// Where the most recent request stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RenderPhase {
    Idle,
    Rendering { page: u32 },
    Committed { page: u32 },
    Failed { page: u32, message: String },
    /// Too many consecutive failures; navigation is refused until dismissed.
    Unavailable { failures: u32 },
}

/// Result of a navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NavigationOutcome {
    Committed { page: u32, from_cache: bool },
    /// A newer request superseded this one; nothing was painted.
    Cancelled { page: u32 },
    /// Already at the first or last page.
    Unchanged { page: u32 },
}

struct SessionState {
    /// Last committed page.
    current_page: u32,
    /// Page of the latest request; next/prev step from here.
    target_page: u32,
    scale: RenderScale,
    phase: RenderPhase,
    consecutive_failures: u32,
    /// Whether any page has been committed yet.
    has_committed: bool,
    closed: bool,
}

/// One open document: current position, its own page cache, and the paint target.
pub struct DocumentSession<R: PageRenderer> {
    cache: PageRenderCache<R>,
    sink: Arc<dyn PageSink<R::Bitmap>>,
    settings: ReaderSettings,
    total_pages: u32,
    latest_request: AtomicU64,
    state: Mutex<SessionState>,
    /// Serializes window moves, commits and failure handling so their side
    /// effects land in token order.
    commit_lock: Mutex<()>,
}

impl<R: PageRenderer> DocumentSession<R> {
    /// Open a session positioned on page 1. Nothing renders until [`load`](Self::load).
    pub fn open(renderer: Arc<R>, settings: ReaderSettings, sink: Arc<dyn PageSink<R::Bitmap>>) -> Self {
        let total_pages = renderer.page_count();
        let scale = RenderScale::new(settings.initial_scale);
        let cache = PageRenderCache::new(renderer, scale, Duration::from_secs(settings.render_timeout_secs));

        tracing::info!(total_pages, %scale, "document session opened");

        Self {
            cache,
            sink,
            settings,
            total_pages,
            latest_request: AtomicU64::new(0),
            state: Mutex::new(SessionState {
                current_page: 1,
                target_page: 1,
                scale,
                phase: RenderPhase::Idle,
                consecutive_failures: 0,
                has_committed: false,
                closed: false,
            }),
            commit_lock: Mutex::new(()),
        }
    }

    /// Render the initial page (clamped into the document).
    pub async fn load(&self, page: u32) -> Result<NavigationOutcome, SessionError> {
        let page = page.clamp(1, self.total_pages.max(1));
        self.goto(page).await
    }

    pub async fn goto(&self, page: u32) -> Result<NavigationOutcome, SessionError> {
        let scale = self.state.lock().scale;
        self.request(page, scale).await
    }

    pub async fn next(&self) -> Result<NavigationOutcome, SessionError> {
        let (target, scale) = {
            let state = self.state.lock();
            (state.target_page, state.scale)
        };
        if target >= self.total_pages {
            return Ok(NavigationOutcome::Unchanged { page: target });
        }
        self.request(target + 1, scale).await
    }

    pub async fn prev(&self) -> Result<NavigationOutcome, SessionError> {
        let (target, scale) = {
            let state = self.state.lock();
            (state.target_page, state.scale)
        };
        if target <= 1 {
            return Ok(NavigationOutcome::Unchanged { page: target });
        }
        self.request(target - 1, scale).await
    }

    /// Switch render scale and re-render the current target page.
    /// The cache flushes on the first lookup at the new scale.
    pub async fn set_scale(&self, scale: RenderScale) -> Result<NavigationOutcome, SessionError> {
        let target = {
            let mut state = self.state.lock();
            state.scale = scale;
            state.target_page
        };
        self.request(target, scale).await
    }

    /// Clear a failure or unavailable state so navigation works again.
    pub fn dismiss_error(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        if matches!(state.phase, RenderPhase::Failed { .. } | RenderPhase::Unavailable { .. }) {
            state.phase = RenderPhase::Idle;
        }
    }

    /// Cancel outstanding work and release every cached page.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            self.latest_request.fetch_add(1, Ordering::SeqCst);
        }
        self.cache.shutdown();
        tracing::info!("document session closed");
    }

    pub fn current_page(&self) -> u32 {
        self.state.lock().current_page
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn scale(&self) -> RenderScale {
        self.state.lock().scale
    }

    pub fn phase(&self) -> RenderPhase {
        self.state.lock().phase.clone()
    }

    pub fn settings(&self) -> &ReaderSettings {
        &self.settings
    }

    pub fn cache(&self) -> &PageRenderCache<R> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn is_latest(&self, token: u64) -> bool {
        self.latest_request.load(Ordering::SeqCst) == token
    }

    async fn request(&self, page: u32, scale: RenderScale) -> Result<NavigationOutcome, SessionError> {
        {
            let state = self.state.lock();
            if state.closed {
                return Err(SessionError::Closed);
            }
            if let RenderPhase::Unavailable { failures } = state.phase {
                return Err(SessionError::DocumentUnavailable { failures });
            }
        }
        if page == 0 || page > self.total_pages {
            return Err(SessionError::PageOutOfRange {
                page,
                total: self.total_pages,
            });
        }

        // Token and target move together so a newer request is never
        // overwritten by an older one's bookkeeping.
        let token = {
            let mut state = self.state.lock();
            let token = self.latest_request.fetch_add(1, Ordering::SeqCst) + 1;
            state.target_page = page;
            state.phase = RenderPhase::Rendering { page };
            token
        };
        if !self.anchor_window(page, token) {
            return Ok(NavigationOutcome::Cancelled { page });
        }

        if let Some(outcome) = self.paint_cached(page, scale, token, true) {
            return Ok(outcome);
        }

        match self.cache.render(page, scale).await {
            Ok(_) => {
                if !self.is_latest(token) {
                    tracing::trace!(page, "superseded render finished");
                    return Ok(NavigationOutcome::Cancelled { page });
                }
                match self.paint_cached(page, scale, token, false) {
                    Some(outcome) => Ok(outcome),
                    None => {
                        tracing::debug!(page, "rendered page no longer cached");
                        Ok(NavigationOutcome::Cancelled { page })
                    }
                }
            }
            Err(error) => {
                if self.record_failure(page, &error, token) {
                    Err(SessionError::Render(error))
                } else {
                    tracing::debug!(page, %error, "superseded render failed");
                    Ok(NavigationOutcome::Cancelled { page })
                }
            }
        }
    }

    /// Move the retention window to `page` unless a newer request exists.
    fn anchor_window(&self, page: u32, token: u64) -> bool {
        let _commit = self.commit_lock.lock();
        if !self.is_latest(token) {
            return false;
        }
        self.cache.evict_distant(page, self.settings.ahead_window, self.settings.behind_window);
        true
    }

    /// Paint from cache if the page is resident and `token` is still latest.
    ///
    /// The token is checked under the cache lock before any lookup, so a
    /// superseded request can neither paint nor flush the cache with a stale scale.
    fn paint_cached(&self, page: u32, scale: RenderScale, token: u64, from_cache: bool) -> Option<NavigationOutcome> {
        let painted = self.cache.with_page_if(
            page,
            scale,
            || self.is_latest(token),
            |bitmap| self.sink.paint(page, bitmap),
        );

        match painted {
            Some(()) if self.commit(page, scale, token) => Some(NavigationOutcome::Committed { page, from_cache }),
            Some(()) => Some(NavigationOutcome::Cancelled { page }),
            None if !self.is_latest(token) => Some(NavigationOutcome::Cancelled { page }),
            None => None,
        }
    }

    /// Make `page` current. Returns false, changing nothing, if a newer request started.
    fn commit(&self, page: u32, scale: RenderScale, token: u64) -> bool {
        let _commit = self.commit_lock.lock();
        {
            let mut state = self.state.lock();
            if !self.is_latest(token) {
                tracing::trace!(page, "superseded before commit");
                return false;
            }
            state.current_page = page;
            state.phase = RenderPhase::Committed { page };
            state.consecutive_failures = 0;
            state.has_committed = true;
        }
        tracing::debug!(page, %scale, "page committed");
        self.sink.on_page_change(page, self.total_pages);

        let (ahead, behind) = (self.settings.ahead_window, self.settings.behind_window);
        self.cache.evict_distant(page, ahead, behind);
        self.cache.prefetch_around(page, self.total_pages, ahead, behind, scale);
        true
    }

    /// Record a failed render of the latest request. Returns false if it was superseded.
    ///
    /// The window goes back to the page still on screen, which is re-rendered
    /// along with its neighbours if the failed request evicted them.
    fn record_failure(&self, page: u32, error: &RenderError, token: u64) -> bool {
        let _commit = self.commit_lock.lock();
        let (failures, on_screen) = {
            let mut state = self.state.lock();
            if !self.is_latest(token) {
                return false;
            }
            state.consecutive_failures += 1;
            let failures = state.consecutive_failures;
            state.phase = if failures >= self.settings.max_consecutive_failures.max(1) {
                RenderPhase::Unavailable { failures }
            } else {
                RenderPhase::Failed {
                    page,
                    message: error.to_string(),
                }
            };
            (failures, state.has_committed.then_some((state.current_page, state.scale)))
        };
        tracing::warn!(page, failures, %error, "page render failed");

        if let Some((current, scale)) = on_screen {
            let (ahead, behind) = (self.settings.ahead_window, self.settings.behind_window);
            self.cache.evict_distant(current, ahead, behind);
            self.cache.prefetch(current, scale);
            self.cache.prefetch_around(current, self.total_pages, ahead, behind, scale);
        }
        self.sink.on_error(page, error);
        true
    }
}

impl<R: PageRenderer> Drop for DocumentSession<R> {
    fn drop(&mut self) {
        self.close();
    }
}
