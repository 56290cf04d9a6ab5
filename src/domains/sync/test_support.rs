//! In-memory remote authority used by the engine tests.
//!
//! Behaves like the real server where it matters: a logical clock stamps every
//! accepted write, the last write to arrive wins, deletes win over later
//! updates, and rows whose parents are unknown are reported back as failed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::database::store::row_id;
use crate::database::Table;
use crate::domains::sync::remote::RemoteAuthority;
use crate::domains::sync::types::{DeletedRecord, PullResponse, PushRequest, PushResponse, TableChanges};
use crate::errors::{SyncError, SyncResult};
use crate::types::{RecordRef, Row, Timestamp};

#[derive(Debug, Clone)]
pub struct ServerRecord {
    pub row: Row,
    pub deleted: bool,
    pub server_ts: Timestamp,
}

#[derive(Default)]
struct ServerState {
    clock: Timestamp,
    tables: BTreeMap<Table, BTreeMap<Uuid, ServerRecord>>,
    failing_pulls: u32,
    failing_pushes: u32,
    lost_acks: u32,
    upgrade_required: bool,
    rejected: BTreeSet<RecordRef>,
    pushes_received: usize,
}

#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<ServerState>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` pulls fail with a network error.
    pub fn fail_pulls(&self, n: u32) {
        self.state.lock().unwrap().failing_pulls = n;
    }

    /// The next `n` pushes fail with a network error before being applied.
    pub fn fail_pushes(&self, n: u32) {
        self.state.lock().unwrap().failing_pushes = n;
    }

    /// The next `n` pushes are applied but the acknowledgement is lost.
    pub fn lose_acks(&self, n: u32) {
        self.state.lock().unwrap().lost_acks = n;
    }

    /// Report these records as failed on every push until cleared.
    pub fn reject(&self, records: &[RecordRef]) {
        self.state.lock().unwrap().rejected = records.iter().copied().collect();
    }

    pub fn require_upgrade(&self) {
        self.state.lock().unwrap().upgrade_required = true;
    }

    pub fn pushes_received(&self) -> usize {
        self.state.lock().unwrap().pushes_received
    }

    /// Write a row as if another client (or the back office) had pushed it.
    pub fn seed(&self, table: Table, row: Row) {
        let mut state = self.state.lock().unwrap();
        state.clock += 1;
        let ts = state.clock;
        if let Ok(id) = row_id(table, &row) {
            state.tables.entry(table).or_default().insert(id, ServerRecord { row, deleted: false, server_ts: ts });
        }
    }

    pub fn record(&self, table: Table, id: Uuid) -> Option<ServerRecord> {
        self.state.lock().unwrap().tables.get(&table).and_then(|t| t.get(&id)).cloned()
    }

    pub fn live_count(&self, table: Table) -> usize {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&table)
            .map(|t| t.values().filter(|r| !r.deleted).count())
            .unwrap_or(0)
    }
}

impl ServerState {
    fn parents_present(&self, table: Table, row: &Row) -> bool {
        table.schema().columns.iter().all(|column| {
            let Some(parent) = column.references else {
                return true;
            };
            match row.get(column.name) {
                None | Some(Value::Null) => true,
                Some(value) => value
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .map_or(false, |id| self.tables.get(&parent).map_or(false, |t| t.contains_key(&id))),
            }
        })
    }
}

#[async_trait]
impl RemoteAuthority for InMemoryRemote {
    async fn pull_changes(&self, last_pulled_at: Option<Timestamp>) -> SyncResult<PullResponse> {
        let mut state = self.state.lock().unwrap();
        if state.upgrade_required {
            return Err(SyncError::SchemaIncompatible("server requires a newer client".into()));
        }
        if state.failing_pulls > 0 {
            state.failing_pulls -= 1;
            return Err(SyncError::Network("pull failed".into()));
        }

        state.clock += 1;
        let since = last_pulled_at.unwrap_or(Timestamp::MIN);
        let mut response = PullResponse { changes: BTreeMap::new(), timestamp: state.clock };
        for (table, records) in &state.tables {
            let mut changes = TableChanges::default();
            for (id, record) in records.iter().filter(|(_, r)| r.server_ts > since) {
                if record.deleted {
                    changes.deleted.push(DeletedRecord { id: *id });
                } else {
                    changes.updated.push(record.row.clone());
                }
            }
            if !changes.is_empty() {
                response.changes.insert(table.name().to_string(), changes);
            }
        }
        Ok(response)
    }

    async fn push_changes(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        let mut state = self.state.lock().unwrap();
        if state.failing_pushes > 0 {
            state.failing_pushes -= 1;
            return Err(SyncError::Network("push failed".into()));
        }

        state.clock += 1;
        state.pushes_received += 1;
        let ts = state.clock;
        let mut failed = Vec::new();

        for table in Table::SYNC_ORDER {
            let Some(changes) = request.changes.get(table.name()) else {
                continue;
            };
            for row in changes.created.iter().chain(changes.updated.iter()) {
                let Ok(id) = row_id(table, row) else {
                    continue;
                };
                if state.rejected.contains(&RecordRef::new(table, id)) || !state.parents_present(table, row) {
                    failed.push(RecordRef::new(table, id));
                    continue;
                }
                let records = state.tables.entry(table).or_default();
                match records.get_mut(&id) {
                    Some(existing) if existing.deleted => {}
                    Some(existing) => {
                        existing.row = row.clone();
                        existing.server_ts = ts;
                    }
                    None => {
                        records.insert(id, ServerRecord { row: row.clone(), deleted: false, server_ts: ts });
                    }
                }
            }
            for deleted in &changes.deleted {
                if let Some(existing) = state.tables.entry(table).or_default().get_mut(&deleted.id) {
                    existing.deleted = true;
                    existing.server_ts = ts;
                }
            }
        }

        if state.lost_acks > 0 {
            state.lost_acks -= 1;
            return Err(SyncError::Timeout);
        }
        if failed.is_empty() {
            Ok(PushResponse::accepted())
        } else {
            Ok(PushResponse::partial(failed))
        }
    }
}
