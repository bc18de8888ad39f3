//! Local application glue for the folio reader: SQLite persistence and the
//! commands the UI calls.

pub mod commands;
pub mod db;
pub mod state;

use anyhow::Context;
use db::SqliteRepository;
use state::AppState;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    // A second call (tests, embedding hosts) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

pub fn get_db_path() -> PathBuf {
    // Use app data directory for production, fallback to current dir
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("folio")
        .join("folio.db")
}

/// Open (creating if needed) the local database and build the application state.
pub fn bootstrap() -> anyhow::Result<AppState> {
    init_tracing();

    let db_path = get_db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {}", parent.display()))?;
    }

    tracing::info!(path = %db_path.display(), "opening database");
    let repository = SqliteRepository::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    Ok(AppState::new(repository))
}
