//! SQLite schema definitions.

/// Current schema version for migrations.
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema for the local database.
pub const SCHEMA: &str = r#"
-- Vocabulary cards with SM-2 state
CREATE TABLE IF NOT EXISTS vocabulary (
    id TEXT PRIMARY KEY,
    word TEXT NOT NULL,
    meaning TEXT NOT NULL,
    mastered INTEGER NOT NULL DEFAULT 0,
    next_review_at TEXT,
    interval_days INTEGER NOT NULL DEFAULT 0,
    ease_factor REAL NOT NULL DEFAULT 2.5,
    repetitions INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    source_document TEXT,
    source_page INTEGER
);

-- Last committed page per document
CREATE TABLE IF NOT EXISTS reading_progress (
    document_id TEXT PRIMARY KEY,
    page INTEGER NOT NULL,
    total_pages INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

-- Reader settings (JSON blob, single row)
CREATE TABLE IF NOT EXISTS reader_settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    settings TEXT NOT NULL
);

-- Review settings (JSON blob, single row)
CREATE TABLE IF NOT EXISTS review_settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    settings TEXT NOT NULL
);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_vocabulary_due ON vocabulary(mastered, next_review_at);
CREATE INDEX IF NOT EXISTS idx_vocabulary_source ON vocabulary(source_document);
"#;

/// Record the schema version if not present.
pub const INIT_SCHEMA_VERSION: &str = r#"
INSERT OR IGNORE INTO schema_version (version) VALUES (1);
"#;
