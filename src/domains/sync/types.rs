use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::database::Table;
use crate::errors::{DomainError, SyncError, ValidationError};
use crate::types::{RecordRef, Row, Timestamp};

/// The kind of local mutation a Change Log entry carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Created,
    Updated,
    Deleted,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Created => "created",
            ChangeOperation::Updated => "updated",
            ChangeOperation::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ChangeOperation::Created),
            "updated" => Some(ChangeOperation::Updated),
            "deleted" => Some(ChangeOperation::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single unpushed entry for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogEntry {
    /// Insertion id, the tie-breaker for equal timestamps.
    pub id: i64,
    pub table: Table,
    pub record_id: Uuid,
    pub operation: ChangeOperation,
    pub changed_columns: Vec<String>,
    /// Time of the first unpushed mutation.
    pub local_timestamp: Timestamp,
    /// Bumped on every coalesce; acknowledgement only clears the revision that was pushed.
    pub revision: i64,
}

impl ChangeLogEntry {
    pub fn record_ref(&self) -> RecordRef {
        RecordRef::new(self.table, self.record_id)
    }

    pub fn is_dirty(&self, column: &str) -> bool {
        self.changed_columns.iter().any(|c| c == column)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ChangeLogEntryRow {
    pub id: i64,
    pub table_name: String,
    pub record_id: String,
    pub operation: String,
    pub changed_columns: String,
    pub local_timestamp: i64,
    pub revision: i64,
}

impl TryFrom<ChangeLogEntryRow> for ChangeLogEntry {
    type Error = DomainError;
    fn try_from(row: ChangeLogEntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            table: Table::from_name(&row.table_name).ok_or_else(|| {
                DomainError::Validation(ValidationError::invalid_value("change_log.table_name", &row.table_name))
            })?,
            record_id: Uuid::parse_str(&row.record_id).map_err(|_| {
                DomainError::Validation(ValidationError::format(
                    "change_log.record_id",
                    &format!("Invalid UUID format: {}", row.record_id),
                ))
            })?,
            operation: ChangeOperation::from_str(&row.operation).ok_or_else(|| {
                DomainError::Validation(ValidationError::custom("Invalid ChangeOperation"))
            })?,
            changed_columns: serde_json::from_str(&row.changed_columns)?,
            local_timestamp: row.local_timestamp,
            revision: row.revision,
        })
    }
}

/// `{id}` element of a table's `deleted` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRecord {
    pub id: Uuid,
}

/// Per-table partition of a change set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableChanges {
    #[serde(default)]
    pub created: Vec<Row>,
    #[serde(default)]
    pub updated: Vec<Row>,
    #[serde(default)]
    pub deleted: Vec<DeletedRecord>,
}

impl TableChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

/// Changes keyed by table name. Kept as strings so unknown tables from a newer
/// server survive deserialisation and can be skipped.
pub type ChangeSet = BTreeMap<String, TableChanges>;

/// Dirty-column hint sent alongside a push: table -> record id -> columns.
pub type ChangedColumns = BTreeMap<String, BTreeMap<Uuid, Vec<String>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub last_pulled_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub changes: ChangeSet,
    /// Server time the pull was taken at; becomes the next cursor.
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub changes: ChangeSet,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub changed_columns: ChangedColumns,
}

impl PushRequest {
    pub fn record_count(&self) -> usize {
        self.changes.values().map(TableChanges::len).sum()
    }
}

/// Raw push response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<RecordRef>,
}

impl PushResponse {
    pub fn accepted() -> Self {
        Self { ok: true, failed: Vec::new() }
    }

    pub fn partial(failed: Vec<RecordRef>) -> Self {
        Self { ok: false, failed }
    }
}

/// Interpreted push outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushAck {
    Accepted,
    PartialFailure(Vec<RecordRef>),
}

impl TryFrom<PushResponse> for PushAck {
    type Error = SyncError;
    fn try_from(response: PushResponse) -> Result<Self, Self::Error> {
        match (response.ok, response.failed.is_empty()) {
            (true, _) => Ok(PushAck::Accepted),
            (false, false) => Ok(PushAck::PartialFailure(response.failed)),
            (false, true) => Err(SyncError::Protocol(
                "push rejected without naming failed records".to_string(),
            )),
        }
    }
}

/// Counters from applying one pulled change set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Records whose pending local columns were kept over the remote version.
    pub merged_with_local: usize,
    /// Pending local entries dropped because the server deleted the record.
    pub discarded_local: usize,
    /// Pending local payments given a new receipt reference to make way for a pulled one.
    pub renumbered_receipts: usize,
    pub skipped: usize,
    pub unknown_tables: Vec<String>,
}

/// Where the engine currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Pulling,
    Applying,
    Pushing,
    Acknowledging,
    /// Last cycle failed; waiting out the backoff before returning to `Idle`.
    Error,
    /// Fatal incompatibility. No cycle will run until the application is updated.
    Blocked,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Pulling => "pulling",
            SyncState::Applying => "applying",
            SyncState::Pushing => "pushing",
            SyncState::Acknowledging => "acknowledging",
            SyncState::Error => "error",
            SyncState::Blocked => "blocked",
        }
    }
}

/// Passive status for a "pending sync" indicator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub pending_changes: i64,
    pub last_error: Option<String>,
    pub last_synced_at: Option<Timestamp>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            pending_changes: 0,
            last_error: None,
            last_synced_at: None,
        }
    }
}

/// What one completed cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub applied: ApplySummary,
    pub pushed: usize,
    pub acknowledged: usize,
    pub purged_tombstones: u64,
    pub cursor: Option<Timestamp>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pull_response_shape() {
        let body = json!({
            "changes": {
                "payers": {
                    "created": [{"id": "6f1c1f9e-6d7a-4c8e-9a43-3c2f7c4b8a11", "name": "Ama"}],
                    "updated": [],
                    "deleted": [{"id": "0b8e3d52-2a37-4c1b-8f7e-1c0f8b8e5d22"}]
                },
                "vehicles": {"created": [], "updated": [], "deleted": []}
            },
            "timestamp": 1714550400000i64
        });
        let response: PullResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.timestamp, 1_714_550_400_000);
        assert_eq!(response.changes["payers"].created.len(), 1);
        assert_eq!(response.changes["payers"].deleted.len(), 1);
        assert!(response.changes["vehicles"].is_empty());
    }

    #[test]
    fn test_pull_request_null_cursor() {
        let request = PullRequest { last_pulled_at: None };
        assert_eq!(serde_json::to_value(&request).unwrap(), json!({"last_pulled_at": null}));
    }

    #[test]
    fn test_push_request_omits_empty_hint() {
        let request = PushRequest::default();
        assert_eq!(serde_json::to_value(&request).unwrap(), json!({"changes": {}}));
    }

    #[test]
    fn test_push_response_variants() {
        let ok: PushResponse = serde_json::from_value(json!({"ok": true})).unwrap();
        assert_eq!(PushAck::try_from(ok).unwrap(), PushAck::Accepted);

        let id = Uuid::new_v4();
        let partial: PushResponse = serde_json::from_value(json!({
            "ok": false,
            "failed": [{"table": "invoices", "id": id}]
        }))
        .unwrap();
        assert_eq!(
            PushAck::try_from(partial).unwrap(),
            PushAck::PartialFailure(vec![RecordRef::new(Table::Invoices, id)])
        );

        let empty = PushResponse { ok: false, failed: vec![] };
        assert!(matches!(PushAck::try_from(empty), Err(SyncError::Protocol(_))));
    }
}
