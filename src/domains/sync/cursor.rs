//! Persisted `last_pulled_at` cursor.
//!
//! Written only inside the acknowledge transaction, and never moves backwards
//! except through an explicit [`reset`].

use sqlx::{Sqlite, Transaction};

use crate::errors::{DbError, DomainResult};
use crate::types::Timestamp;

pub async fn last_pulled_at<'e, E>(executor: E) -> DomainResult<Option<Timestamp>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let value: Option<Option<i64>> = sqlx::query_scalar("SELECT last_pulled_at FROM sync_state WHERE id = 1")
        .fetch_optional(executor)
        .await
        .map_err(DbError::from)?;
    Ok(value.flatten())
}

pub async fn last_synced_at<'e, E>(executor: E) -> DomainResult<Option<Timestamp>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let value: Option<Option<i64>> = sqlx::query_scalar("SELECT last_synced_at FROM sync_state WHERE id = 1")
        .fetch_optional(executor)
        .await
        .map_err(DbError::from)?;
    Ok(value.flatten())
}

/// Move the cursor to `server_timestamp` unless it is already further along.
/// Returns the stored value.
pub async fn advance(
    tx: &mut Transaction<'_, Sqlite>,
    server_timestamp: Timestamp,
    synced_at: Timestamp,
) -> DomainResult<Timestamp> {
    sqlx::query(
        "UPDATE sync_state
         SET last_pulled_at = CASE
                 WHEN last_pulled_at IS NULL OR last_pulled_at < ? THEN ?
                 ELSE last_pulled_at
             END,
             last_synced_at = ?
         WHERE id = 1",
    )
    .bind(server_timestamp)
    .bind(server_timestamp)
    .bind(synced_at)
    .execute(&mut **tx)
    .await
    .map_err(DbError::from)?;

    let stored = last_pulled_at(&mut **tx).await?;
    Ok(stored.unwrap_or(server_timestamp))
}

/// Forget the cursor so the next pull starts from the beginning of time.
pub async fn reset(tx: &mut Transaction<'_, Sqlite>) -> DomainResult<()> {
    sqlx::query("UPDATE sync_state SET last_pulled_at = NULL WHERE id = 1")
        .execute(&mut **tx)
        .await
        .map_err(DbError::from)?;
    Ok(())
}
