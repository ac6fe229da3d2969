pub mod models;
pub mod operations;
pub mod schema;
pub mod sqlite;

use std::path::{Path, PathBuf};

use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

pub use models::{CumulativeStats, Feedback, Message, Session, Stats};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("session {0} not found")]
    SessionNotFound(i64),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Durable store for sessions, transcripts, feedback, vocabulary, goals and stats.
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
    path: PathBuf,
}

impl Ledger {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let pool = sqlite::init_sqlite_pool(&path).await?;
        info!(path = %path.display(), "ledger opened");
        Ok(Self { pool, path })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
