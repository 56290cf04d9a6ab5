//! Per-record outbox layered over the entity tables.
//!
//! Exactly one row per unpushed record. New mutations coalesce into the
//! existing row; an acknowledged push removes it only if no further mutation
//! arrived after the push snapshot was taken.

use std::collections::BTreeSet;

use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::database::Table;
use crate::domains::sync::types::{ChangeLogEntry, ChangeLogEntryRow, ChangeOperation};
use crate::errors::{DbError, DomainError, DomainResult};
use crate::types::{RecordRef, Timestamp};

const SELECT_ENTRY: &str = "SELECT id, table_name, record_id, operation, changed_columns, local_timestamp, revision FROM change_log";

/// Combine a pending operation with the next local mutation on the same record.
pub fn coalesce(
    existing: ChangeOperation,
    existing_columns: &[String],
    next: ChangeOperation,
    next_columns: &[&str],
    record: RecordRef,
) -> DomainResult<(ChangeOperation, Vec<String>)> {
    use ChangeOperation::*;

    let union = || {
        existing_columns
            .iter()
            .map(String::as_str)
            .chain(next_columns.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>()
    };

    match (existing, next) {
        (Deleted, Deleted) => Ok((Deleted, Vec::new())),
        (Deleted, _) => Err(DomainError::DeletedEntity(record.table.to_string(), record.id)),
        (_, Deleted) => Ok((Deleted, Vec::new())),
        (Created, _) => Ok((Created, union())),
        (Updated, Created) | (Updated, Updated) => Ok((Updated, union())),
    }
}

/// Append a new entry or fold `operation` into the record's pending one.
pub async fn record_mutation(
    tx: &mut Transaction<'_, Sqlite>,
    table: Table,
    record_id: Uuid,
    operation: ChangeOperation,
    columns: &[&str],
    at: Timestamp,
) -> DomainResult<()> {
    match entry_for(tx, table, record_id).await? {
        None => {
            let mut sorted: Vec<&str> = columns.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            sqlx::query(
                "INSERT INTO change_log (table_name, record_id, operation, changed_columns, local_timestamp, revision)
                 VALUES (?, ?, ?, ?, ?, 1)",
            )
            .bind(table.name())
            .bind(record_id.to_string())
            .bind(operation.as_str())
            .bind(serde_json::to_string(&sorted)?)
            .bind(at)
            .execute(&mut **tx)
            .await
            .map_err(DbError::from)?;
        }
        Some(existing) => {
            let (merged_op, merged_columns) = coalesce(
                existing.operation,
                &existing.changed_columns,
                operation,
                columns,
                existing.record_ref(),
            )?;
            sqlx::query(
                "UPDATE change_log SET operation = ?, changed_columns = ?, revision = revision + 1 WHERE id = ?",
            )
            .bind(merged_op.as_str())
            .bind(serde_json::to_string(&merged_columns)?)
            .bind(existing.id)
            .execute(&mut **tx)
            .await
            .map_err(DbError::from)?;
        }
    }
    Ok(())
}

/// All pending entries ordered by first mutation time, then insertion order.
pub async fn pending_changes<'e, E>(executor: E) -> DomainResult<Vec<ChangeLogEntry>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query_as::<_, ChangeLogEntryRow>(&format!(
        "{} ORDER BY local_timestamp ASC, id ASC",
        SELECT_ENTRY
    ))
    .fetch_all(executor)
    .await
    .map_err(DbError::from)?;

    rows.into_iter().map(ChangeLogEntry::try_from).collect()
}

pub async fn pending_count(pool: &SqlitePool) -> DomainResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM change_log")
        .fetch_one(pool)
        .await
        .map_err(DbError::from)?;
    Ok(count)
}

pub async fn entry_for(
    tx: &mut Transaction<'_, Sqlite>,
    table: Table,
    record_id: Uuid,
) -> DomainResult<Option<ChangeLogEntry>> {
    let row = sqlx::query_as::<_, ChangeLogEntryRow>(&format!(
        "{} WHERE table_name = ? AND record_id = ?",
        SELECT_ENTRY
    ))
    .bind(table.name())
    .bind(record_id.to_string())
    .fetch_optional(&mut **tx)
    .await
    .map_err(DbError::from)?;

    row.map(ChangeLogEntry::try_from).transpose()
}

/// Drop a pending entry outright (the server deleted the record).
pub async fn discard(tx: &mut Transaction<'_, Sqlite>, table: Table, record_id: Uuid) -> DomainResult<bool> {
    let result = sqlx::query("DELETE FROM change_log WHERE table_name = ? AND record_id = ?")
        .bind(table.name())
        .bind(record_id.to_string())
        .execute(&mut **tx)
        .await
        .map_err(DbError::from)?;
    Ok(result.rows_affected() > 0)
}

/// Clear acknowledged entries.
///
/// An entry is removed only if its revision still matches the one that was
/// pushed; the record then flips to `synced`. Entries already removed, or
/// mutated since the push snapshot, are left alone, so repeating the call is
/// harmless. Returns the entries actually cleared.
pub async fn mark_pushed(
    tx: &mut Transaction<'_, Sqlite>,
    entries: &[ChangeLogEntry],
) -> DomainResult<Vec<ChangeLogEntry>> {
    let mut cleared = Vec::with_capacity(entries.len());
    for entry in entries {
        let result = sqlx::query("DELETE FROM change_log WHERE id = ? AND revision = ?")
            .bind(entry.id)
            .bind(entry.revision)
            .execute(&mut **tx)
            .await
            .map_err(DbError::from)?;

        if result.rows_affected() == 0 {
            log::debug!(
                "Change log entry for {} changed since push (revision {}), keeping it",
                entry.record_ref(),
                entry.revision
            );
            continue;
        }

        sqlx::query(&format!("UPDATE {} SET sync_status = 'synced' WHERE id = ?", entry.table.name()))
            .bind(entry.record_id.to_string())
            .execute(&mut **tx)
            .await
            .map_err(DbError::from)?;
        cleared.push(entry.clone());
    }
    Ok(cleared)
}

/// Physically remove acknowledged tombstones nothing references any more.
///
/// Children go first so a parent whose children were purged in the same pass
/// can follow.
pub async fn purge_tombstones(tx: &mut Transaction<'_, Sqlite>) -> DomainResult<u64> {
    let mut purged = 0;
    for table in Table::SYNC_ORDER.iter().rev() {
        let mut sql = format!(
            "DELETE FROM {t} WHERE deleted = 1 AND sync_status = 'synced' \
             AND NOT EXISTS (SELECT 1 FROM change_log WHERE change_log.table_name = '{t}' AND change_log.record_id = {t}.id)",
            t = table.name()
        );
        for (child, column) in table.dependents() {
            sql.push_str(&format!(
                " AND NOT EXISTS (SELECT 1 FROM {c} WHERE {c}.{col} = {t}.id)",
                c = child.name(),
                col = column,
                t = table.name()
            ));
        }
        let result = sqlx::query(&sql)
            .execute(&mut **tx)
            .await
            .map_err(DbError::from)?;
        purged += result.rows_affected();
    }
    if purged > 0 {
        log::debug!("Purged {} acknowledged tombstone(s)", purged);
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::tests::test_store;
    use crate::domains::payer::Payer;
    use crate::types::RecordSyncStatus;

    fn rr() -> RecordRef {
        RecordRef::new(Table::Payers, Uuid::new_v4())
    }

    #[test]
    fn test_coalesce_rules() {
        use ChangeOperation::*;
        let cols = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let (op, c) = coalesce(Created, &cols(&["name"]), Updated, &["phone"], rr()).unwrap();
        assert_eq!((op, c), (Created, cols(&["name", "phone"])));

        let (op, c) = coalesce(Updated, &cols(&["phone"]), Updated, &["name", "phone"], rr()).unwrap();
        assert_eq!((op, c), (Updated, cols(&["name", "phone"])));

        let (op, c) = coalesce(Created, &cols(&["name"]), Deleted, &[], rr()).unwrap();
        assert_eq!((op, c), (Deleted, vec![]));

        let (op, _) = coalesce(Updated, &cols(&["name"]), Deleted, &[], rr()).unwrap();
        assert_eq!(op, Deleted);

        assert!(matches!(
            coalesce(Deleted, &[], Updated, &["name"], rr()),
            Err(DomainError::DeletedEntity(_, _))
        ));
    }

    #[tokio::test]
    async fn test_one_entry_per_record_and_ordering() {
        let (store, _dir) = test_store("dev-a").await;
        let first = Payer::new("First");
        let mut second = Payer::new("Second");

        let mut txn = store.begin_write().await.unwrap();
        txn.create(&first).await.unwrap();
        txn.create(&second).await.unwrap();
        txn.commit().await.unwrap();

        second.notes = Some("edited".into());
        let mut txn = store.begin_write().await.unwrap();
        txn.update(&second).await.unwrap();
        txn.commit().await.unwrap();

        let entries = store.pending_changes().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].record_id, first.id);
        assert_eq!(entries[1].record_id, second.id);
        assert_eq!(entries[1].operation, ChangeOperation::Created);
        assert!(entries[1].is_dirty("notes"));
    }

    #[tokio::test]
    async fn test_mark_pushed_is_idempotent_and_revision_checked() {
        let (store, _dir) = test_store("dev-a").await;
        let mut a = Payer::new("A");
        let b = Payer::new("B");
        let mut txn = store.begin_write().await.unwrap();
        txn.create(&a).await.unwrap();
        txn.create(&b).await.unwrap();
        txn.commit().await.unwrap();

        let snapshot = store.pending_changes().await.unwrap();

        // A is edited after the push snapshot was taken.
        a.phone = Some("+233244000111".into());
        let mut txn = store.begin_write().await.unwrap();
        txn.update(&a).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin_write().await.unwrap();
        let cleared = mark_pushed(txn.tx(), &snapshot).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(cleared.len(), 1);
        assert_eq!(cleared[0].record_id, b.id);

        let mut txn = store.begin_write().await.unwrap();
        let cleared_again = mark_pushed(txn.tx(), &snapshot).await.unwrap();
        txn.commit().await.unwrap();
        assert!(cleared_again.is_empty());

        let remaining = store.pending_changes().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].record_id, a.id);
        assert_eq!(store.sync_status(Table::Payers, a.id).await.unwrap(), Some(RecordSyncStatus::Pending));
        assert_eq!(store.sync_status(Table::Payers, b.id).await.unwrap(), Some(RecordSyncStatus::Synced));
    }

    #[tokio::test]
    async fn test_purge_waits_for_acknowledgement() {
        let (store, _dir) = test_store("dev-a").await;
        let payer = Payer::new("Gone");
        let mut txn = store.begin_write().await.unwrap();
        txn.create(&payer).await.unwrap();
        txn.commit().await.unwrap();
        let mut txn = store.begin_write().await.unwrap();
        txn.delete::<Payer>(payer.id).await.unwrap();
        assert_eq!(purge_tombstones(txn.tx()).await.unwrap(), 0);
        txn.commit().await.unwrap();

        let pending = store.pending_changes().await.unwrap();
        let mut txn = store.begin_write().await.unwrap();
        mark_pushed(txn.tx(), &pending).await.unwrap();
        assert_eq!(purge_tombstones(txn.tx()).await.unwrap(), 1);
        txn.commit().await.unwrap();

        assert!(store.get_row(Table::Payers, payer.id).await.unwrap().is_none());
    }
}
