use chrono::Utc;

use crate::db::{Ledger, LedgerError, Session};
use crate::tutor::types::Level;

/// Inserts a session together with its zeroed stats row.
pub async fn create_session(ledger: &Ledger, level: Level) -> Result<i64, LedgerError> {
    let now = Utc::now();
    let mut tx = ledger.pool().begin().await?;

    let session_id = sqlx::query(
        r#"INSERT INTO sessions (created_at, level, total_messages) VALUES (?, ?, 0)"#,
    )
    .bind(now)
    .bind(level.as_str())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    sqlx::query(
        r#"
        INSERT INTO stats (session_id, accuracy_pct, words_learned, corrections_count)
        VALUES (?, 0, 0, 0)
        "#,
    )
    .bind(session_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(session_id)
}

pub async fn get_session(ledger: &Ledger, session_id: i64) -> Result<Option<Session>, LedgerError> {
    let row = sqlx::query(
        r#"SELECT id, created_at, level, total_messages FROM sessions WHERE id = ?"#,
    )
    .bind(session_id)
    .fetch_optional(ledger.pool())
    .await?;

    Ok(row.as_ref().map(Session::from_row).transpose()?)
}

pub async fn last_session(ledger: &Ledger) -> Result<Option<Session>, LedgerError> {
    let row = sqlx::query(
        r#"SELECT id, created_at, level, total_messages FROM sessions ORDER BY id DESC LIMIT 1"#,
    )
    .fetch_optional(ledger.pool())
    .await?;

    Ok(row.as_ref().map(Session::from_row).transpose()?)
}

pub async fn list_sessions(ledger: &Ledger) -> Result<Vec<Session>, LedgerError> {
    let rows = sqlx::query(
        r#"SELECT id, created_at, level, total_messages FROM sessions ORDER BY id DESC"#,
    )
    .fetch_all(ledger.pool())
    .await?;

    Ok(rows.iter().map(Session::from_row).collect::<Result<Vec<_>, sqlx::Error>>()?)
}

pub async fn update_session_level(
    ledger: &Ledger,
    session_id: i64,
    level: Level,
) -> Result<(), LedgerError> {
    sqlx::query(r#"UPDATE sessions SET level = ? WHERE id = ?"#)
        .bind(level.as_str())
        .bind(session_id)
        .execute(ledger.pool())
        .await?;
    Ok(())
}
