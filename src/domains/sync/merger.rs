//! Applies a pulled change set to the local store.
//!
//! Remote wins for synced rows. For rows with a pending local entry, columns
//! the entry marks dirty keep their local value and every other column takes
//! the remote one; the entry is left in place so the local edit is pushed
//! again. A remote delete wins over any pending local edit.
//!
//! Receipt references are minted offline, so a pulled payment can carry one a
//! different local payment already holds. A pending local payment is
//! renumbered and pushed with its other changes; a synced one is reported as
//! a unique conflict.

use serde_json::Value;
use uuid::Uuid;

use crate::database::store::row_id;
use crate::database::{StoredRow, Table, WriteTxn};
use crate::domains::sync::change_log;
use crate::domains::sync::types::{ApplySummary, ChangeLogEntry, ChangeOperation, ChangeSet};
use crate::errors::{DomainError, DomainResult};
use crate::types::{now_millis, RecordSyncStatus, Row};

/// Apply `changes` inside `txn`, parents before children. Only receipt
/// renumbering produces Change Log entries.
pub async fn apply_changes(txn: &mut WriteTxn, changes: &ChangeSet) -> DomainResult<ApplySummary> {
    let mut summary = ApplySummary::default();

    for name in changes.keys() {
        if Table::from_name(name).is_none() {
            log::warn!("Skipping unknown table '{}' in pulled changes", name);
            summary.unknown_tables.push(name.clone());
        }
    }

    for table in Table::SYNC_ORDER {
        let Some(table_changes) = changes.get(table.name()) else {
            continue;
        };

        for remote in table_changes.created.iter().chain(table_changes.updated.iter()) {
            upsert_remote(txn, table, remote, &mut summary).await?;
        }
        for deleted in &table_changes.deleted {
            apply_remote_delete(txn, table, deleted.id, &mut summary).await?;
        }
    }

    log::info!(
        "Applied pull: {} inserted, {} updated, {} deleted, {} merged with local edits",
        summary.inserted,
        summary.updated,
        summary.deleted,
        summary.merged_with_local
    );
    Ok(summary)
}

async fn upsert_remote(
    txn: &mut WriteTxn,
    table: Table,
    remote: &Row,
    summary: &mut ApplySummary,
) -> DomainResult<()> {
    let id = row_id(table, remote)?;
    if table == Table::Payments {
        resolve_receipt_clash(txn, id, remote, summary).await?;
    }

    let Some(stored) = txn.fetch_stored(table, id).await? else {
        let row = overlay(table, &Row::new(), remote, None);
        txn.insert_row(table, &row, RecordSyncStatus::Synced).await?;
        summary.inserted += 1;
        return Ok(());
    };

    let pending = change_log::entry_for(txn.tx(), table, id).await?;
    match pending {
        None if stored.deleted => {
            // An acknowledged local delete is never resurrected by a stale update.
            log::debug!("Ignoring remote update for tombstoned {} {}", table, id);
            summary.skipped += 1;
        }
        None => {
            let row = overlay(table, &stored.row, remote, None);
            txn.overwrite_row(table, &row, false, RecordSyncStatus::Synced).await?;
            summary.updated += 1;
        }
        Some(entry) if entry.operation == ChangeOperation::Deleted => {
            log::debug!("Keeping pending local delete of {} {} over remote update", table, id);
            summary.skipped += 1;
        }
        Some(entry) => {
            let row = merge_with_local(table, &stored, remote, &entry);
            txn.overwrite_row(table, &row, false, RecordSyncStatus::Pending).await?;
            summary.merged_with_local += 1;
        }
    }
    Ok(())
}

async fn resolve_receipt_clash(
    txn: &mut WriteTxn,
    id: Uuid,
    remote: &Row,
    summary: &mut ApplySummary,
) -> DomainResult<()> {
    let Some(ref_no) = remote.get("ref_no").and_then(Value::as_str) else {
        return Ok(());
    };
    let Some(holder) = txn.payment_id_by_ref_no(ref_no, id).await? else {
        return Ok(());
    };

    if change_log::entry_for(txn.tx(), Table::Payments, holder).await?.is_none() {
        return Err(DomainError::UniqueConflict {
            table: Table::Payments.to_string(),
            id,
            detail: format!("ref_no {} is already held by synced payment {}", ref_no, holder),
        });
    }

    let replacement = txn.renumber_payment(holder, ref_no).await?;
    log::warn!(
        "Pulled payment {} reuses receipt {}; local payment {} renumbered to {}",
        id,
        ref_no,
        holder,
        replacement
    );
    summary.renumbered_receipts += 1;
    Ok(())
}

async fn apply_remote_delete(
    txn: &mut WriteTxn,
    table: Table,
    id: Uuid,
    summary: &mut ApplySummary,
) -> DomainResult<()> {
    let Some(stored) = txn.fetch_stored(table, id).await? else {
        log::debug!("Remote delete for unknown {} {}", table, id);
        summary.skipped += 1;
        return Ok(());
    };

    if change_log::discard(txn.tx(), table, id).await? {
        log::warn!(
            "Remote delete of {} {} overrides a pending local change; local change discarded",
            table,
            id
        );
        summary.discarded_local += 1;
    }

    if stored.deleted && stored.sync_status == RecordSyncStatus::Synced {
        return Ok(());
    }
    txn.set_tombstone(table, id, now_millis(), RecordSyncStatus::Synced).await?;
    summary.deleted += 1;
    Ok(())
}

/// Local values for dirty columns, remote values elsewhere.
fn merge_with_local(table: Table, stored: &StoredRow, remote: &Row, entry: &ChangeLogEntry) -> Row {
    let mut row = overlay(table, &stored.row, remote, Some(entry));
    let local = stored.row.get("last_modified_at").and_then(Value::as_i64);
    let incoming = remote.get("last_modified_at").and_then(Value::as_i64);
    if let Some(latest) = local.into_iter().chain(incoming).max() {
        row.insert("last_modified_at".to_string(), Value::from(latest));
    }
    row
}

/// Start from `base` and copy every mapped column present in `remote`,
/// except columns `dirty` marks as locally edited. Unmapped keys are dropped.
fn overlay(table: Table, base: &Row, remote: &Row, dirty: Option<&ChangeLogEntry>) -> Row {
    let mut row = Row::new();
    for column in table.schema().columns {
        let keep_local = dirty.map_or(false, |entry| entry.is_dirty(column.name));
        let value = if keep_local {
            base.get(column.name)
        } else {
            remote.get(column.name).or_else(|| base.get(column.name))
        };
        row.insert(column.name.to_string(), value.cloned().unwrap_or(Value::Null));
    }
    row
}
