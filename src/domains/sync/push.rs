use std::collections::BTreeMap;

use crate::database::store::fetch_stored;
use crate::database::{EntityStore, Table};
use crate::domains::sync::change_log;
use crate::domains::sync::types::{ChangeLogEntry, ChangeOperation, DeletedRecord, PushRequest, TableChanges};
use crate::errors::{DbError, DomainResult};
use crate::types::RecordRef;

/// A push request together with the exact entries it was built from.
#[derive(Debug, Clone)]
pub struct PushBatch {
    pub request: PushRequest,
    pub entries: Vec<ChangeLogEntry>,
}

impl PushBatch {
    /// Entries the server did not report as failed.
    pub fn accepted_entries(&self, failed: &[RecordRef]) -> Vec<ChangeLogEntry> {
        self.entries
            .iter()
            .filter(|entry| !failed.contains(&entry.record_ref()))
            .cloned()
            .collect()
    }
}

/// Snapshot every pending entry and its current row in one read transaction.
///
/// Returns `None` when there is nothing to push.
pub async fn collect_batch(store: &EntityStore, send_created_as_updated: bool) -> DomainResult<Option<PushBatch>> {
    let mut tx = store.pool().begin().await.map_err(DbError::from)?;
    let pending = change_log::pending_changes(&mut *tx).await?;
    if pending.is_empty() {
        return Ok(None);
    }

    let mut request = PushRequest::default();
    let mut entries = Vec::with_capacity(pending.len());

    for table in Table::SYNC_ORDER {
        for entry in pending.iter().filter(|e| e.table == table) {
            let Some(stored) = fetch_stored(&mut *tx, table, entry.record_id).await? else {
                log::warn!("Change log entry for missing record {}, skipping", entry.record_ref());
                continue;
            };

            let changes = request
                .changes
                .entry(table.name().to_string())
                .or_insert_with(TableChanges::default);

            if entry.operation == ChangeOperation::Deleted || stored.deleted {
                changes.deleted.push(DeletedRecord { id: entry.record_id });
            } else {
                match entry.operation {
                    ChangeOperation::Created if !send_created_as_updated => changes.created.push(stored.row),
                    _ => changes.updated.push(stored.row),
                }
                request
                    .changed_columns
                    .entry(table.name().to_string())
                    .or_insert_with(BTreeMap::new)
                    .insert(entry.record_id, entry.changed_columns.clone());
            }
            entries.push(entry.clone());
        }
    }

    tx.rollback().await.map_err(DbError::from)?;

    if entries.is_empty() {
        return Ok(None);
    }
    Ok(Some(PushBatch { request, entries }))
}
