use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::db::schema::{split_sql_statements, SCHEMA_SQL, SCHEMA_VERSION};
use crate::db::LedgerError;

const APP_DIR: &str = "english-tutor";
const DB_FILE: &str = "tutor.db";

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(DB_FILE)
}

pub async fn init_sqlite_pool(db_path: &Path) -> Result<SqlitePool, LedgerError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::Io(e.to_string()))?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
    let options = SqliteConnectOptions::from_str(&db_url)
        .map_err(|e| LedgerError::Config(e.to_string()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_sqlite_migrations(&pool).await?;

    Ok(pool)
}

async fn run_sqlite_migrations(pool: &SqlitePool) -> Result<(), LedgerError> {
    // The metadata table may not exist yet on a fresh file.
    let version: Option<String> =
        sqlx::query_scalar(r#"SELECT value FROM _db_metadata WHERE key = 'schema_version'"#)
            .fetch_optional(pool)
            .await
            .unwrap_or(None);

    if version.is_some() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for stmt in split_sql_statements(SCHEMA_SQL) {
        sqlx::query(&stmt).execute(&mut *tx).await?;
    }

    sqlx::query(r#"INSERT OR REPLACE INTO _db_metadata (key, value) VALUES ('schema_version', ?)"#)
        .bind(SCHEMA_VERSION)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(version = SCHEMA_VERSION, "ledger schema applied");
    Ok(())
}
