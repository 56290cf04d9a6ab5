use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::database::Table;

/// A full record as exchanged with the remote authority: column name -> JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Identifies one record in one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordRef {
    pub table: Table,
    pub id: Uuid,
}

impl RecordRef {
    pub fn new(table: Table, id: Uuid) -> Self {
        Self { table, id }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.id)
    }
}

/// Local-only bookkeeping: whether a record still has changes the server has not acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordSyncStatus {
    Pending,
    Synced,
}

impl RecordSyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSyncStatus::Pending => "pending",
            RecordSyncStatus::Synced => "synced",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RecordSyncStatus::Pending),
            "synced" => Some(RecordSyncStatus::Synced),
            _ => None,
        }
    }
}
