use chrono::Utc;

use crate::db::{Ledger, LedgerError};

/// Appends one row per word, all sharing a single timestamp. Duplicates are kept.
pub async fn append_vocabulary(
    ledger: &Ledger,
    words: &[String],
    session_id: i64,
) -> Result<(), LedgerError> {
    if words.is_empty() {
        return Ok(());
    }

    let now = Utc::now();
    let mut tx = ledger.pool().begin().await?;
    for word in words {
        sqlx::query(r#"INSERT INTO vocabulary (word, first_seen, session_id) VALUES (?, ?, ?)"#)
            .bind(word)
            .bind(now)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn get_vocabulary(ledger: &Ledger, session_id: i64) -> Result<Vec<String>, LedgerError> {
    let words = sqlx::query_scalar(
        r#"SELECT word FROM vocabulary WHERE session_id = ? ORDER BY id ASC"#,
    )
    .bind(session_id)
    .fetch_all(ledger.pool())
    .await?;
    Ok(words)
}
