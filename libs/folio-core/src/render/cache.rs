//! Windowed page cache with background prefetch.
//!
//! Holds pre-rendered bitmaps for a sliding window of pages around the
//! reading position. One scale is live at a time; switching scale flushes
//! every entry. Eviction and discarded renders hand bitmaps back to the
//! renderer through [`PageRenderer::release`].
//!
//! # Concurrency
//!
//! Mutable state sits behind a single `parking_lot::Mutex` that is never
//! held across an `.await`. Prefetch tasks run on a per-cache `JoinSet`, so
//! shutting the cache down aborts them instead of leaking background work.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};

use super::{PageRenderer, RenderScale};
use crate::error::RenderError;

/// What happened to a finished render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Inserted (or replaced) in the cache.
    Cached,
    /// The cache moved to another scale while rendering; bitmap released.
    DiscardedStaleScale,
    /// The page fell outside the retention window; bitmap released.
    DiscardedOutOfWindow,
    /// The cache was shut down while rendering; bitmap released.
    DiscardedClosed,
}

/// Cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub resident: usize,
    pub hits: u64,
    pub misses: u64,
    pub renders: u64,
    pub releases: u64,
    pub prefetches_started: u64,
    pub prefetch_failures: u64,
    pub stale_discards: u64,
    pub flushes: u64,
}

/// Pages kept resident around an anchor page.
///
/// The trailing side keeps one extra page so the page just left survives an
/// immediate step back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetentionWindow {
    anchor: u32,
    ahead: u32,
    behind: u32,
}

impl RetentionWindow {
    fn contains(&self, page: u32) -> bool {
        let lower = self.anchor.saturating_sub(self.behind.saturating_add(1));
        let upper = self.anchor.saturating_add(self.ahead);
        (lower..=upper).contains(&page)
    }
}

struct CacheState<B> {
    entries: BTreeMap<u32, B>,
    scale: RenderScale,
    /// In-flight prefetches keyed by (page, scale key).
    pending: HashSet<(u32, u32)>,
    /// Pages whose prefetch failed at the current scale; not retried by prefetch.
    failed: HashSet<u32>,
    window: Option<RetentionWindow>,
    /// Set by shutdown; nothing is admitted afterwards.
    closed: bool,
    stats: CacheStats,
}

impl<B> CacheState<B> {
    fn admits(&self, page: u32) -> bool {
        self.window.map_or(true, |w| w.contains(page))
    }

    fn take_all(&mut self) -> Vec<B> {
        let taken: Vec<B> = std::mem::take(&mut self.entries).into_values().collect();
        self.failed.clear();
        self.stats.releases += taken.len() as u64;
        taken
    }
}

struct CacheInner<R: PageRenderer> {
    renderer: Arc<R>,
    render_timeout: Duration,
    state: Mutex<CacheState<R::Bitmap>>,
}

impl<R: PageRenderer> CacheInner<R> {
    async fn render(&self, page: u32, scale: RenderScale) -> Result<RenderOutcome, RenderError> {
        if self.state.lock().closed {
            return Err(RenderError::Cancelled);
        }
        let bitmap = timeout(self.render_timeout, self.renderer.render_page(page, scale))
            .await
            .map_err(|_| RenderError::Timeout(self.render_timeout))??;
        Ok(self.insert(page, scale, bitmap))
    }

    fn insert(&self, page: u32, scale: RenderScale, bitmap: R::Bitmap) -> RenderOutcome {
        let (outcome, released) = {
            let mut state = self.state.lock();
            state.stats.renders += 1;

            if state.closed {
                state.stats.releases += 1;
                (RenderOutcome::DiscardedClosed, Some(bitmap))
            } else if state.scale != scale {
                state.stats.stale_discards += 1;
                state.stats.releases += 1;
                (RenderOutcome::DiscardedStaleScale, Some(bitmap))
            } else if !state.admits(page) {
                state.stats.releases += 1;
                (RenderOutcome::DiscardedOutOfWindow, Some(bitmap))
            } else {
                state.failed.remove(&page);
                let replaced = state.entries.insert(page, bitmap);
                if replaced.is_some() {
                    state.stats.releases += 1;
                }
                (RenderOutcome::Cached, replaced)
            }
        };

        if let Some(bitmap) = released {
            self.renderer.release(bitmap);
        }
        match outcome {
            RenderOutcome::Cached => tracing::trace!(page, %scale, "page cached"),
            other => tracing::debug!(page, %scale, ?other, "render discarded"),
        }
        outcome
    }

    fn finish_prefetch(&self, page: u32, scale: RenderScale, result: Result<RenderOutcome, RenderError>) {
        let mut state = self.state.lock();
        state.pending.remove(&(page, scale.key()));
        if let Err(error) = result {
            state.stats.prefetch_failures += 1;
            if state.scale == scale {
                state.failed.insert(page);
            }
            tracing::debug!(page, %scale, %error, "prefetch failed");
        }
    }

    fn release_all(&self, bitmaps: Vec<R::Bitmap>) {
        for bitmap in bitmaps {
            self.renderer.release(bitmap);
        }
    }
}

/// Bounded cache of rendered pages for one document.
pub struct PageRenderCache<R: PageRenderer> {
    inner: Arc<CacheInner<R>>,
    tasks: Mutex<JoinSet<()>>,
}

impl<R: PageRenderer> PageRenderCache<R> {
    pub fn new(renderer: Arc<R>, scale: RenderScale, render_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                renderer,
                render_timeout,
                state: Mutex::new(CacheState {
                    entries: BTreeMap::new(),
                    scale,
                    pending: HashSet::new(),
                    failed: HashSet::new(),
                    window: None,
                    closed: false,
                    stats: CacheStats::default(),
                }),
            }),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn renderer(&self) -> &Arc<R> {
        &self.inner.renderer
    }

    /// Scale the cached entries belong to.
    pub fn scale(&self) -> RenderScale {
        self.inner.state.lock().scale
    }

    /// Look up a page and hand its bitmap to `f`.
    ///
    /// A scale other than the current one flushes the whole cache, adopts
    /// the new scale and reports a miss. `f` runs under the cache lock, so
    /// keep it to a paint.
    pub fn with_page<T>(&self, page: u32, scale: RenderScale, f: impl FnOnce(&R::Bitmap) -> T) -> Option<T> {
        self.with_page_if(page, scale, || true, f)
    }

    /// [`with_page`](Self::with_page) gated on `proceed`, which is evaluated
    /// under the cache lock before any flush or lookup. Returns `None`
    /// without touching the cache when `proceed` is false.
    pub fn with_page_if<T>(
        &self,
        page: u32,
        scale: RenderScale,
        proceed: impl FnOnce() -> bool,
        f: impl FnOnce(&R::Bitmap) -> T,
    ) -> Option<T> {
        let flushed = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if !proceed() {
                return None;
            }
            if state.scale == scale {
                return match state.entries.get(&page) {
                    Some(bitmap) => {
                        let value = f(bitmap);
                        state.stats.hits += 1;
                        Some(value)
                    }
                    None => {
                        state.stats.misses += 1;
                        None
                    }
                };
            }

            tracing::debug!(from = %state.scale, to = %scale, resident = state.entries.len(), "scale changed, flushing cache");
            state.scale = scale;
            state.stats.flushes += 1;
            state.stats.misses += 1;
            state.take_all()
        };

        self.inner.release_all(flushed);
        None
    }

    /// Presence check that never flushes.
    pub fn contains(&self, page: u32, scale: RenderScale) -> bool {
        let state = self.inner.state.lock();
        state.scale == scale && state.entries.contains_key(&page)
    }

    /// Render a page and cache it if the scale and window still hold.
    pub async fn render(&self, page: u32, scale: RenderScale) -> Result<RenderOutcome, RenderError> {
        self.inner.render(page, scale).await
    }

    /// Start a background render of `page`. Best effort: failures are
    /// swallowed and the page renders on demand later.
    ///
    /// Returns whether a task was spawned. Must be called inside a Tokio runtime.
    pub fn prefetch(&self, page: u32, scale: RenderScale) -> bool {
        {
            let mut state = self.inner.state.lock();
            let key = (page, scale.key());
            if state.closed
                || state.scale != scale
                || state.entries.contains_key(&page)
                || state.pending.contains(&key)
                || state.failed.contains(&page)
                || !state.admits(page)
            {
                return false;
            }
            state.pending.insert(key);
            state.stats.prefetches_started += 1;
        }

        let inner = Arc::clone(&self.inner);
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let result = inner.render(page, scale).await;
            inner.finish_prefetch(page, scale, result);
        });
        true
    }

    /// Prefetch `current+1 ..= current+ahead`, then `current-behind ..= current-1`,
    /// clamped to `1..=total_pages`. Returns the number of tasks spawned.
    pub fn prefetch_around(&self, current: u32, total_pages: u32, ahead: u32, behind: u32, scale: RenderScale) -> usize {
        let ahead_pages = (1..=ahead)
            .filter_map(|offset| current.checked_add(offset))
            .take_while(|page| *page <= total_pages);
        let behind_pages = (1..=behind)
            .filter_map(|offset| current.checked_sub(offset))
            .take_while(|page| *page >= 1);

        ahead_pages
            .chain(behind_pages)
            .filter(|page| self.prefetch(*page, scale))
            .count()
    }

    /// Re-anchor the retention window on `current` and release every page outside it.
    ///
    /// Keeps `current - (behind + 1) ..= current + ahead`, at most
    /// `ahead + behind + 2` pages.
    pub fn evict_distant(&self, current: u32, ahead: u32, behind: u32) -> usize {
        let window = RetentionWindow {
            anchor: current,
            ahead,
            behind,
        };
        let evicted = {
            let mut state = self.inner.state.lock();
            state.window = Some(window);
            state.failed.retain(|page| window.contains(*page));

            let distant: Vec<u32> = state
                .entries
                .keys()
                .copied()
                .filter(|page| !window.contains(*page))
                .collect();
            let evicted: Vec<R::Bitmap> = distant
                .iter()
                .filter_map(|page| state.entries.remove(page))
                .collect();
            state.stats.releases += evicted.len() as u64;
            evicted
        };

        let count = evicted.len();
        if count > 0 {
            tracing::debug!(current, count, "evicted distant pages");
        }
        self.inner.release_all(evicted);
        count
    }

    /// Release every cached page.
    pub fn flush(&self) {
        let flushed = {
            let mut state = self.inner.state.lock();
            state.stats.flushes += 1;
            state.take_all()
        };
        self.inner.release_all(flushed);
    }

    /// Wait for every spawned prefetch to finish, including ones spawned meanwhile.
    pub async fn wait_for_prefetches(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks.lock());
            if tasks.is_empty() {
                break;
            }
            while tasks.join_next().await.is_some() {}
        }
    }

    /// Abort in-flight prefetches and release everything. Renders still
    /// running elsewhere release their bitmap on completion.
    pub fn shutdown(&self) {
        self.tasks.lock().abort_all();
        {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.pending.clear();
        }
        self.flush();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().entries.is_empty()
    }

    /// Cached page numbers in ascending order.
    pub fn resident_pages(&self) -> Vec<u32> {
        self.inner.state.lock().entries.keys().copied().collect()
    }

    pub fn pending_prefetches(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            resident: state.entries.len(),
            ..state.stats.clone()
        }
    }
}

impl<R: PageRenderer> Drop for PageRenderCache<R> {
    fn drop(&mut self) {
        self.tasks.get_mut().abort_all();
        let remaining = self.inner.state.lock().take_all();
        self.inner.release_all(remaining);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::FakeRenderer;
    use pretty_assertions::assert_eq;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn cache(pages: u32) -> PageRenderCache<FakeRenderer> {
        PageRenderCache::new(Arc::new(FakeRenderer::new(pages)), RenderScale::DEFAULT, TIMEOUT)
    }

    #[tokio::test]
    async fn render_then_hit() {
        let cache = cache(10);
        assert_eq!(cache.with_page(2, RenderScale::DEFAULT, |b| b.page), None);

        let outcome = cache.render(2, RenderScale::DEFAULT).await.unwrap();
        assert_eq!(outcome, RenderOutcome::Cached);
        assert_eq!(cache.with_page(2, RenderScale::DEFAULT, |b| b.page), Some(2));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.resident, 1);
    }

    #[tokio::test]
    async fn scale_change_flushes_and_releases() {
        let cache = cache(10);
        let one = RenderScale::new(1.0);
        let one_and_half = RenderScale::new(1.5);

        cache.render(5, one).await.unwrap();
        assert!(cache.contains(5, one));

        assert_eq!(cache.with_page(5, one_and_half, |b| b.scale), None);
        assert!(cache.is_empty());
        assert_eq!(cache.scale(), one_and_half);
        assert_eq!(cache.renderer().released_pages(), vec![5]);

        cache.render(5, one_and_half).await.unwrap();
        assert_eq!(cache.with_page(5, one_and_half, |b| b.scale), Some(150));
    }

    #[tokio::test]
    async fn render_finishing_after_scale_change_is_discarded() {
        let cache = Arc::new(cache(10));
        let gate = cache.renderer().gate(3);

        let pending = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.render(3, RenderScale::new(1.0)).await })
        };
        tokio::task::yield_now().await;

        cache.with_page(3, RenderScale::new(2.0), |_| ());
        gate.notify_one();

        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome, RenderOutcome::DiscardedStaleScale);
        assert!(cache.is_empty());
        assert_eq!(cache.renderer().released_pages(), vec![3]);
        assert_eq!(cache.stats().stale_discards, 1);
    }

    #[tokio::test]
    async fn evict_distant_keeps_directional_window() {
        let cache = cache(20);
        for page in 1..=12 {
            cache.render(page, RenderScale::DEFAULT).await.unwrap();
        }

        let evicted = cache.evict_distant(8, 3, 1);
        assert_eq!(cache.resident_pages(), vec![6, 7, 8, 9, 10, 11]);
        assert_eq!(evicted, 6);

        let mut released = cache.renderer().released_pages();
        released.sort();
        assert_eq!(released, vec![1, 2, 3, 4, 5, 12]);
    }

    #[tokio::test]
    async fn render_outside_window_is_released() {
        let cache = cache(20);
        cache.evict_distant(10, 2, 1);
        let outcome = cache.render(2, RenderScale::DEFAULT).await.unwrap();
        assert_eq!(outcome, RenderOutcome::DiscardedOutOfWindow);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn prefetch_around_clamps_to_document() {
        let cache = cache(4);
        cache.evict_distant(3, 3, 1);
        let spawned = cache.prefetch_around(3, 4, 3, 1, RenderScale::DEFAULT);
        cache.wait_for_prefetches().await;

        assert_eq!(spawned, 2);
        assert_eq!(cache.resident_pages(), vec![2, 4]);
    }

    #[tokio::test]
    async fn prefetch_is_deduplicated_while_pending() {
        let cache = cache(10);
        let gate = cache.renderer().gate(4);

        assert!(cache.prefetch(4, RenderScale::DEFAULT));
        assert!(!cache.prefetch(4, RenderScale::DEFAULT));
        assert_eq!(cache.pending_prefetches(), 1);

        gate.notify_one();
        cache.wait_for_prefetches().await;

        assert_eq!(cache.renderer().render_count(4), 1);
        assert_eq!(cache.pending_prefetches(), 0);
        assert!(!cache.prefetch(4, RenderScale::DEFAULT), "already cached");
    }

    #[tokio::test]
    async fn prefetch_failure_is_swallowed_and_not_retried() {
        let cache = cache(10);
        cache.renderer().fail_page(6);

        assert!(cache.prefetch(6, RenderScale::DEFAULT));
        cache.wait_for_prefetches().await;

        assert!(cache.is_empty());
        assert_eq!(cache.stats().prefetch_failures, 1);
        assert!(!cache.prefetch(6, RenderScale::DEFAULT));

        // An on-demand render still surfaces the error.
        let err = cache.render(6, RenderScale::DEFAULT).await.unwrap_err();
        assert!(matches!(err, RenderError::Decode { page: 6, .. }));
    }

    #[tokio::test]
    async fn concurrent_primary_and_prefetch_leave_one_valid_entry() {
        let cache = cache(10);
        assert!(cache.prefetch(7, RenderScale::DEFAULT));
        let primary = cache.render(7, RenderScale::DEFAULT).await.unwrap();
        cache.wait_for_prefetches().await;

        assert_eq!(primary, RenderOutcome::Cached);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.with_page(7, RenderScale::DEFAULT, |b| (b.page, b.scale)), Some((7, 100)));
        // The loser of the race was released, not leaked.
        assert_eq!(cache.renderer().released_pages(), vec![7]);
    }

    #[tokio::test]
    async fn shutdown_aborts_prefetches_and_releases() {
        let cache = cache(10);
        let _gate = cache.renderer().gate(2);
        cache.render(1, RenderScale::DEFAULT).await.unwrap();
        assert!(cache.prefetch(2, RenderScale::DEFAULT));

        cache.shutdown();
        cache.wait_for_prefetches().await;

        assert!(cache.is_empty());
        assert_eq!(cache.pending_prefetches(), 0);
        assert_eq!(cache.renderer().released_pages(), vec![1]);
    }

    #[tokio::test]
    async fn render_timeout_is_reported() {
        let cache = PageRenderCache::new(
            Arc::new(FakeRenderer::new(3)),
            RenderScale::DEFAULT,
            Duration::from_millis(10),
        );
        let _gate = cache.renderer().gate(1);
        let err = cache.render(1, RenderScale::DEFAULT).await.unwrap_err();
        assert_eq!(err, RenderError::Timeout(Duration::from_millis(10)));
        assert_eq!(err.to_string(), "render timed out after 10ms");
    }

    #[tokio::test]
    async fn render_finishing_after_shutdown_is_released() {
        let cache = Arc::new(cache(10));
        let gate = cache.renderer().gate(4);

        let pending = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.render(4, RenderScale::DEFAULT).await })
        };
        while cache.renderer().render_count(4) == 0 {
            tokio::task::yield_now().await;
        }

        cache.shutdown();
        gate.notify_one();

        assert_eq!(pending.await.unwrap().unwrap(), RenderOutcome::DiscardedClosed);
        assert!(cache.is_empty());
        assert_eq!(cache.renderer().released_pages(), vec![4]);
    }

    #[tokio::test]
    async fn closed_cache_refuses_new_work() {
        let cache = cache(10);
        cache.shutdown();

        assert!(cache.is_closed());
        assert!(!cache.prefetch(2, RenderScale::DEFAULT));
        assert_eq!(cache.render(2, RenderScale::DEFAULT).await.unwrap_err(), RenderError::Cancelled);
        assert_eq!(cache.renderer().render_count(2), 0);
    }

    #[tokio::test]
    async fn refused_lookup_leaves_cache_untouched() {
        let cache = cache(10);
        cache.render(3, RenderScale::DEFAULT).await.unwrap();

        let looked_up = cache.with_page_if(3, RenderScale::new(2.0), || false, |b| b.page);
        assert_eq!(looked_up, None);
        assert_eq!(cache.scale(), RenderScale::DEFAULT);
        assert_eq!(cache.resident_pages(), vec![3]);
    }
}
