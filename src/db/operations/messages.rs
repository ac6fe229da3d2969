use chrono::Utc;
use sqlx::Row;

use crate::db::{Feedback, Ledger, LedgerError, Message};
use crate::tutor::types::Role;

/// Inserts a message and bumps the owning session's message count in one transaction.
pub async fn append_message(
    ledger: &Ledger,
    session_id: i64,
    role: Role,
    content: &str,
) -> Result<i64, LedgerError> {
    let mut tx = ledger.pool().begin().await?;

    let message_id = sqlx::query(
        r#"INSERT INTO messages (session_id, role, content, timestamp) VALUES (?, ?, ?, ?)"#,
    )
    .bind(session_id)
    .bind(role.as_str())
    .bind(content)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    sqlx::query(r#"UPDATE sessions SET total_messages = total_messages + 1 WHERE id = ?"#)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(message_id)
}

pub async fn get_messages(ledger: &Ledger, session_id: i64) -> Result<Vec<Message>, LedgerError> {
    let rows = sqlx::query(
        r#"
        SELECT id, session_id, role, content, timestamp
        FROM messages
        WHERE session_id = ?
        ORDER BY id ASC
        "#,
    )
    .bind(session_id)
    .fetch_all(ledger.pool())
    .await?;

    Ok(rows.iter().map(Message::from_row).collect::<Result<Vec<_>, sqlx::Error>>()?)
}

/// Callers guarantee one feedback row per assistant message.
pub async fn record_feedback(
    ledger: &Ledger,
    message_id: i64,
    positive: &str,
    correction: Option<&str>,
    tip: &str,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"INSERT INTO feedback (message_id, positive, correction, tip) VALUES (?, ?, ?, ?)"#,
    )
    .bind(message_id)
    .bind(positive)
    .bind(correction)
    .bind(tip)
    .execute(ledger.pool())
    .await?;
    Ok(())
}

pub async fn get_feedback(ledger: &Ledger, message_id: i64) -> Result<Option<Feedback>, LedgerError> {
    let row = sqlx::query(
        r#"SELECT message_id, positive, correction, tip FROM feedback WHERE message_id = ? ORDER BY id LIMIT 1"#,
    )
    .bind(message_id)
    .fetch_optional(ledger.pool())
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(Feedback {
        message_id: row.try_get("message_id")?,
        positive: row.try_get("positive")?,
        correction: row.try_get("correction")?,
        tip: row.try_get("tip")?,
    }))
}
