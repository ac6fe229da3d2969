use sqlx::Row;

use crate::db::{CumulativeStats, Ledger, LedgerError, Stats};

/// Overwrites the session's stats row with the caller's full current values.
pub async fn update_stats(
    ledger: &Ledger,
    session_id: i64,
    accuracy_pct: f64,
    words_learned: i64,
    corrections_count: i64,
) -> Result<(), LedgerError> {
    sqlx::query(
        r#"
        UPDATE stats
        SET accuracy_pct = ?, words_learned = ?, corrections_count = ?
        WHERE session_id = ?
        "#,
    )
    .bind(accuracy_pct)
    .bind(words_learned)
    .bind(corrections_count)
    .bind(session_id)
    .execute(ledger.pool())
    .await?;
    Ok(())
}

pub async fn get_stats(ledger: &Ledger, session_id: i64) -> Result<Option<Stats>, LedgerError> {
    let row = sqlx::query(
        r#"
        SELECT session_id, accuracy_pct, words_learned, corrections_count
        FROM stats
        WHERE session_id = ?
        "#,
    )
    .bind(session_id)
    .fetch_optional(ledger.pool())
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(Stats {
        session_id: row.try_get("session_id")?,
        accuracy_pct: row.try_get("accuracy_pct")?,
        words_learned: row.try_get("words_learned")?,
        corrections_count: row.try_get("corrections_count")?,
    }))
}

/// Aggregates across every session; all zeros on an empty ledger.
pub async fn cumulative_stats(ledger: &Ledger) -> Result<CumulativeStats, LedgerError> {
    let row = sqlx::query(
        r#"
        SELECT
            AVG(accuracy_pct) AS avg_acc,
            SUM(words_learned) AS total_words,
            SUM(corrections_count) AS total_corrections
        FROM stats
        "#,
    )
    .fetch_one(ledger.pool())
    .await?;

    let total_sessions: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM sessions"#)
        .fetch_one(ledger.pool())
        .await?;

    Ok(CumulativeStats {
        avg_accuracy: row.try_get::<Option<f64>, _>("avg_acc")?.unwrap_or(0.0),
        total_words: row.try_get::<Option<i64>, _>("total_words")?.unwrap_or(0),
        total_corrections: row.try_get::<Option<i64>, _>("total_corrections")?.unwrap_or(0),
        total_sessions,
    })
}
