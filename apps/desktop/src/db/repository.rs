//! Repository pattern for database access.

use chrono::{DateTime, Utc};
use folio_core::{CardPatch, CardSource, ReaderSettings, ReviewSettings, StoreError, VocabularyCard, VocabularyStore};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::db::error::DbError;
use crate::db::schema::{INIT_SCHEMA_VERSION, SCHEMA, SCHEMA_VERSION};

type Result<T> = std::result::Result<T, DbError>;

const CARD_COLUMNS: &str = "id, word, meaning, mastered, next_review_at, interval_days, ease_factor, repetitions, created_at, source_document, source_page";

/// Last committed page of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingProgress {
    pub document_id: String,
    pub page: u32,
    pub total_pages: u32,
    pub updated_at: DateTime<Utc>,
}

/// Repository for reading progress.
pub trait ProgressRepository {
    fn get_progress(&self, document_id: &str) -> Result<Option<ReadingProgress>>;
    fn save_progress(&self, progress: &ReadingProgress) -> Result<()>;
    fn recent_progress(&self, limit: usize) -> Result<Vec<ReadingProgress>>;
}

/// Repository for settings operations.
pub trait SettingsRepository {
    fn get_reader_settings(&self) -> Result<ReaderSettings>;
    fn save_reader_settings(&self, settings: &ReaderSettings) -> Result<()>;
    fn get_review_settings(&self) -> Result<ReviewSettings>;
    fn save_review_settings(&self, settings: &ReviewSettings) -> Result<()>;
}

/// SQLite implementation of repositories.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open database at path, creating if necessary.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let repo = Self { conn: Mutex::new(conn) };
        repo.initialize()?;
        Ok(repo)
    }

    /// Open in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let repo = Self { conn: Mutex::new(conn) };
        repo.initialize()?;
        Ok(repo)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(INIT_SCHEMA_VERSION)?;

        let version: i32 = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(DbError::InvalidData(format!(
                "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
            )));
        }
        Ok(())
    }

    /// All cards saved from one document.
    pub fn cards_from_document(&self, document_id: &str) -> Result<Vec<VocabularyCard>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CARD_COLUMNS} FROM vocabulary WHERE source_document = ?1 ORDER BY source_page, created_at"
        ))?;
        let cards = stmt
            .query_map(params![document_id], Self::row_to_card)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cards)
    }

    fn load_cards(&self) -> Result<Vec<VocabularyCard>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT {CARD_COLUMNS} FROM vocabulary"))?;
        let cards = stmt
            .query_map([], Self::row_to_card)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cards)
    }

    fn find_card(conn: &Connection, id: Uuid) -> Result<Option<VocabularyCard>> {
        conn.query_row(
            &format!("SELECT {CARD_COLUMNS} FROM vocabulary WHERE id = ?1"),
            params![id.to_string()],
            Self::row_to_card,
        )
        .optional()
        .map_err(Into::into)
    }

    fn write_card(conn: &Connection, card: &VocabularyCard) -> Result<()> {
        let (source_document, source_page) = match &card.source {
            Some(source) => (Some(source.document_id.as_str()), Some(source.page)),
            None => (None, None),
        };
        conn.execute(
            "INSERT OR REPLACE INTO vocabulary (id, word, meaning, mastered, next_review_at, interval_days, ease_factor, repetitions, created_at, source_document, source_page)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                card.id.to_string(),
                card.word,
                card.meaning,
                card.mastered,
                card.next_review_at.map(|d| d.to_rfc3339()),
                card.interval,
                card.ease_factor,
                card.repetitions,
                card.created_at.to_rfc3339(),
                source_document,
                source_page,
            ],
        )?;
        Ok(())
    }

    fn row_to_card(row: &rusqlite::Row) -> rusqlite::Result<VocabularyCard> {
        let id: String = row.get(0)?;
        let next_review_at: Option<String> = row.get(4)?;
        let created_at: String = row.get(8)?;
        let source_document: Option<String> = row.get(9)?;
        let source_page: Option<u32> = row.get(10)?;

        Ok(VocabularyCard {
            id: Uuid::parse_str(&id).map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?,
            word: row.get(1)?,
            meaning: row.get(2)?,
            mastered: row.get(3)?,
            next_review_at: next_review_at.map(|s| parse_timestamp(4, &s)).transpose()?,
            interval: row.get(5)?,
            ease_factor: row.get(6)?,
            repetitions: row.get(7)?,
            created_at: parse_timestamp(8, &created_at)?,
            source: source_document.map(|document_id| CardSource {
                document_id,
                page: source_page.unwrap_or(1),
            }),
        })
    }

    fn row_to_progress(row: &rusqlite::Row) -> rusqlite::Result<ReadingProgress> {
        let updated_at: String = row.get(3)?;
        Ok(ReadingProgress {
            document_id: row.get(0)?,
            page: row.get(1)?,
            total_pages: row.get(2)?,
            updated_at: parse_timestamp(3, &updated_at)?,
        })
    }

    fn load_json<T: serde::de::DeserializeOwned + Default>(&self, table: &str) -> Result<T> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(&format!("SELECT settings FROM {table} WHERE id = 1"), [], |row| row.get(0))
            .optional()?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(T::default()),
        }
    }

    fn store_json<T: Serialize>(&self, table: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.conn.lock().execute(
            &format!("INSERT OR REPLACE INTO {table} (id, settings) VALUES (1, ?1)"),
            params![json],
        )?;
        Ok(())
    }
}

fn parse_timestamp(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

impl VocabularyStore for SqliteRepository {
    fn get_all(&self, predicate: &dyn Fn(&VocabularyCard) -> bool) -> folio_core::Result<Vec<VocabularyCard>> {
        let cards = self.load_cards()?;
        Ok(cards.into_iter().filter(|c| predicate(c)).collect())
    }

    fn get(&self, id: Uuid) -> folio_core::Result<Option<VocabularyCard>> {
        let conn = self.conn.lock();
        Ok(Self::find_card(&conn, id)?)
    }

    fn insert(&self, card: &VocabularyCard) -> folio_core::Result<()> {
        let conn = self.conn.lock();
        if Self::find_card(&conn, card.id)?.is_some() {
            return Err(DbError::DuplicateCard(card.id).into());
        }
        Self::write_card(&conn, card)?;
        Ok(())
    }

    fn update(&self, id: Uuid, patch: &CardPatch) -> folio_core::Result<()> {
        let conn = self.conn.lock();
        let mut card = Self::find_card(&conn, id)?.ok_or(StoreError::NotFound(id))?;
        card.apply(patch);
        Self::write_card(&conn, &card)?;
        Ok(())
    }

    fn remove(&self, id: Uuid) -> folio_core::Result<()> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM vocabulary WHERE id = ?1", params![id.to_string()])
            .map_err(DbError::from)?;
        if removed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

impl ProgressRepository for SqliteRepository {
    fn get_progress(&self, document_id: &str) -> Result<Option<ReadingProgress>> {
        self.conn
            .lock()
            .query_row(
                "SELECT document_id, page, total_pages, updated_at FROM reading_progress WHERE document_id = ?1",
                params![document_id],
                Self::row_to_progress,
            )
            .optional()
            .map_err(Into::into)
    }

    fn save_progress(&self, progress: &ReadingProgress) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO reading_progress (document_id, page, total_pages, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                progress.document_id,
                progress.page,
                progress.total_pages,
                progress.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn recent_progress(&self, limit: usize) -> Result<Vec<ReadingProgress>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT document_id, page, total_pages, updated_at FROM reading_progress ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], Self::row_to_progress)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl SettingsRepository for SqliteRepository {
    fn get_reader_settings(&self) -> Result<ReaderSettings> {
        self.load_json("reader_settings")
    }

    fn save_reader_settings(&self, settings: &ReaderSettings) -> Result<()> {
        self.store_json("reader_settings", settings)
    }

    fn get_review_settings(&self) -> Result<ReviewSettings> {
        self.load_json("review_settings")
    }

    fn save_review_settings(&self, settings: &ReviewSettings) -> Result<()> {
        self.store_json("review_settings", settings)
    }
}
