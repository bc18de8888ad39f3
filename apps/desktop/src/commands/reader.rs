//! Reading commands.

use crate::db::{ProgressRepository, ReadingProgress, SettingsRepository, SqliteRepository};
use crate::state::AppState;
use chrono::Utc;
use folio_core::{Clock, DocumentSession, PageRenderer, PageSink, RenderError};
use std::sync::Arc;

use super::CommandError;

/// Paint target wrapper that persists the committed page of a document.
pub struct ProgressSink<B> {
    document_id: String,
    repository: Arc<SqliteRepository>,
    clock: Arc<dyn Clock>,
    painter: Arc<dyn PageSink<B>>,
}

impl<B> ProgressSink<B> {
    pub fn new(
        document_id: impl Into<String>,
        repository: Arc<SqliteRepository>,
        clock: Arc<dyn Clock>,
        painter: Arc<dyn PageSink<B>>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            repository,
            clock,
            painter,
        }
    }
}

impl<B> PageSink<B> for ProgressSink<B> {
    fn paint(&self, page: u32, bitmap: &B) {
        self.painter.paint(page, bitmap);
    }

    fn on_page_change(&self, page: u32, total_pages: u32) {
        let progress = ReadingProgress {
            document_id: self.document_id.clone(),
            page,
            total_pages,
            updated_at: self.clock.now().with_timezone(&Utc),
        };
        if let Err(error) = self.repository.save_progress(&progress) {
            tracing::warn!(document = %self.document_id, page, %error, "failed to save reading progress");
        }
        self.painter.on_page_change(page, total_pages);
    }

    fn on_error(&self, page: u32, error: &RenderError) {
        self.painter.on_error(page, error);
    }
}

/// Open a document and render the page it was last left on.
///
/// The initial render failing does not fail the open; the session reports
/// it through its phase and the painter's `on_error`.
pub async fn open_document<R: PageRenderer>(
    document_id: String,
    renderer: Arc<R>,
    painter: Arc<dyn PageSink<R::Bitmap>>,
    state: &AppState,
) -> Result<DocumentSession<R>, CommandError> {
    if renderer.page_count() == 0 {
        return Err(CommandError::new(format!("document {document_id} has no pages")));
    }

    let settings = state.repository.get_reader_settings()?;
    let start_page = state
        .repository
        .get_progress(&document_id)?
        .map_or(1, |progress| progress.page);

    tracing::info!(document = %document_id, start_page, "opening document");
    let sink = Arc::new(ProgressSink::new(
        document_id,
        Arc::clone(&state.repository),
        Arc::clone(&state.clock),
        painter,
    ));
    let session = DocumentSession::open(renderer, settings, sink);

    if let Err(error) = session.load(start_page).await {
        tracing::warn!(%error, "initial page failed to render");
    }
    Ok(session)
}

/// Last saved position of a document.
pub fn get_progress(document_id: String, state: &AppState) -> Result<Option<ReadingProgress>, CommandError> {
    state.repository.get_progress(&document_id).map_err(Into::into)
}

/// Documents most recently read, newest first.
pub fn recent_documents(limit: usize, state: &AppState) -> Result<Vec<ReadingProgress>, CommandError> {
    state.repository.recent_progress(limit).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use folio_core::{FixedClock, NavigationOutcome, RenderPhase, RenderScale};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    struct BlankRenderer {
        pages: u32,
        broken: Option<u32>,
    }

    #[async_trait]
    impl PageRenderer for BlankRenderer {
        type Bitmap = Vec<u8>;

        fn page_count(&self) -> u32 {
            self.pages
        }

        async fn render_page(&self, page: u32, _scale: RenderScale) -> Result<Vec<u8>, RenderError> {
            if self.broken == Some(page) {
                return Err(RenderError::PageNotFound(page));
            }
            Ok(vec![page as u8; 4])
        }
    }

    #[derive(Default)]
    struct Screen {
        shown: Mutex<Vec<u32>>,
        errors: Mutex<Vec<u32>>,
    }

    impl PageSink<Vec<u8>> for Screen {
        fn paint(&self, page: u32, bitmap: &Vec<u8>) {
            assert_eq!(bitmap[0], page as u8);
            self.shown.lock().push(page);
        }

        fn on_error(&self, page: u32, _error: &RenderError) {
            self.errors.lock().push(page);
        }
    }

    fn renderer(pages: u32) -> Arc<BlankRenderer> {
        Arc::new(BlankRenderer { pages, broken: None })
    }

    #[tokio::test]
    async fn reading_position_survives_reopen() {
        let state = AppState::new(SqliteRepository::open_in_memory().unwrap());
        let screen = Arc::new(Screen::default());
        let painter: Arc<dyn PageSink<Vec<u8>>> = screen.clone();

        let session = open_document("atlas".to_string(), renderer(50), painter.clone(), &state)
            .await
            .unwrap();
        session.goto(17).await.unwrap();
        session.close();

        let progress = get_progress("atlas".to_string(), &state).unwrap().unwrap();
        assert_eq!((progress.page, progress.total_pages), (17, 50));

        let reopened = open_document("atlas".to_string(), renderer(50), painter, &state)
            .await
            .unwrap();
        assert_eq!(reopened.current_page(), 17);
        assert_eq!(*screen.shown.lock(), vec![1, 17, 17]);
    }

    #[tokio::test]
    async fn failed_first_page_still_opens() {
        let state = AppState::new(SqliteRepository::open_in_memory().unwrap());
        let screen = Arc::new(Screen::default());
        let painter: Arc<dyn PageSink<Vec<u8>>> = screen.clone();
        let broken = Arc::new(BlankRenderer { pages: 10, broken: Some(1) });

        let session = open_document("scan".to_string(), broken, painter, &state)
            .await
            .unwrap();
        assert!(matches!(session.phase(), RenderPhase::Failed { page: 1, .. }));
        assert_eq!(*screen.errors.lock(), vec![1]);
        assert_eq!(
            session.next().await.unwrap(),
            NavigationOutcome::Committed { page: 2, from_cache: false }
        );
        assert_eq!(get_progress("scan".to_string(), &state).unwrap().unwrap().page, 2);
    }

    #[tokio::test]
    async fn empty_document_is_rejected() {
        let state = AppState::new(SqliteRepository::open_in_memory().unwrap());
        let screen: Arc<dyn PageSink<Vec<u8>>> = Arc::new(Screen::default());
        assert!(open_document("empty".to_string(), renderer(0), screen, &state).await.is_err());
    }

    #[tokio::test]
    async fn recent_documents_lists_latest_first() {
        let now = chrono::FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 4, 20, 0, 0)
            .unwrap();
        let clock = Arc::new(FixedClock::new(now));
        let state = AppState::with_clock(SqliteRepository::open_in_memory().unwrap(), clock.clone());
        let painter: Arc<dyn PageSink<Vec<u8>>> = Arc::new(Screen::default());

        for id in ["atlas", "scan", "novel"] {
            let session = open_document(id.to_string(), renderer(5), painter.clone(), &state)
                .await
                .unwrap();
            session.close();
            clock.advance(chrono::Duration::minutes(1));
        }

        let recent: Vec<String> = recent_documents(2, &state)
            .unwrap()
            .into_iter()
            .map(|progress| progress.document_id)
            .collect();
        assert_eq!(recent, vec!["novel", "scan"]);
    }
}
