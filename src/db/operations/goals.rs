use chrono::Utc;

use crate::db::{Ledger, LedgerError};

/// Discards the session's goals and inserts `goals` in their place, atomically.
/// An empty slice clears the set.
pub async fn replace_goals(
    ledger: &Ledger,
    goals: &[String],
    session_id: i64,
) -> Result<(), LedgerError> {
    let now = Utc::now();
    let mut tx = ledger.pool().begin().await?;

    sqlx::query(r#"DELETE FROM goals WHERE session_id = ?"#)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

    for goal in goals {
        sqlx::query(r#"INSERT INTO goals (goal_text, created_at, session_id) VALUES (?, ?, ?)"#)
            .bind(goal)
            .bind(now)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn add_goal(ledger: &Ledger, goal_text: &str, session_id: i64) -> Result<(), LedgerError> {
    sqlx::query(r#"INSERT INTO goals (goal_text, created_at, session_id) VALUES (?, ?, ?)"#)
        .bind(goal_text)
        .bind(Utc::now())
        .bind(session_id)
        .execute(ledger.pool())
        .await?;
    Ok(())
}

/// Removes goals whose text matches exactly. Returns the number of rows removed.
pub async fn delete_goal(ledger: &Ledger, goal_text: &str, session_id: i64) -> Result<u64, LedgerError> {
    let removed = sqlx::query(r#"DELETE FROM goals WHERE goal_text = ? AND session_id = ?"#)
        .bind(goal_text)
        .bind(session_id)
        .execute(ledger.pool())
        .await?
        .rows_affected();
    Ok(removed)
}

pub async fn get_goals(ledger: &Ledger, session_id: i64) -> Result<Vec<String>, LedgerError> {
    let goals = sqlx::query_scalar(
        r#"SELECT goal_text FROM goals WHERE session_id = ? ORDER BY id ASC"#,
    )
    .bind(session_id)
    .fetch_all(ledger.pool())
    .await?;
    Ok(goals)
}
