use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, Transaction};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::database::entity::Entity;
use crate::database::query::Filter;
use crate::database::row::{changed_columns, decode_row, decode_stored, push_bind_value, StoredRow};
use crate::database::schema::Table;
use crate::db_migration::Migrator;
use crate::domains::payment::{generate_ref_no, Payment};
use crate::domains::payment_history::PaymentHistory;
use crate::domains::sync::change_log;
use crate::domains::sync::cursor;
use crate::domains::sync::types::{ChangeLogEntry, ChangeOperation};
use crate::errors::{DbError, DomainError, DomainResult, ValidationError};
use crate::types::{now_millis, RecordSyncStatus, Row, Timestamp};

/// Connection tuning for [`EntityStore::open_with`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

struct StoreInner {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
    notifier: broadcast::Sender<Table>,
    device_id: String,
}

/// Schema-versioned local store for every synchronised entity.
///
/// Reads go straight to the pool. All mutations happen inside a [`WriteTxn`],
/// and only one `WriteTxn` exists at a time.
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<StoreInner>,
}

impl EntityStore {
    /// Open (creating if missing) the database at `database_url` and bring it
    /// to the newest registered schema version.
    pub async fn open(database_url: &str, device_id: &str) -> DomainResult<Self> {
        Self::open_with(database_url, device_id, StoreOptions::default(), &Migrator::default()).await
    }

    pub async fn open_with(
        database_url: &str,
        device_id: &str,
        options: StoreOptions,
        migrator: &Migrator,
    ) -> DomainResult<Self> {
        let connect = SqliteConnectOptions::from_str(database_url)
            .map_err(DbError::from)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect)
            .await
            .map_err(|e| DbError::ConnectionPool(e.to_string()))?;

        migrator.run(&pool).await?;

        let (notifier, _) = broadcast::channel(64);
        log::info!("Entity store opened at {} for device {}", database_url, device_id);

        Ok(Self {
            inner: Arc::new(StoreInner {
                pool,
                write_gate: Arc::new(Mutex::new(())),
                notifier,
                device_id: device_id.to_string(),
            }),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.inner.pool
    }

    /// Wait for the single write slot and open a transaction on it.
    pub async fn begin_write(&self) -> DomainResult<WriteTxn> {
        let guard = self.inner.write_gate.clone().lock_owned().await;
        let tx = self
            .inner
            .pool
            .begin()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;
        Ok(WriteTxn {
            tx,
            _guard: guard,
            inner: self.inner.clone(),
            touched: BTreeSet::new(),
        })
    }

    /// Run `f` inside one write transaction. Commits if `f` returns `Ok`,
    /// rolls back otherwise.
    ///
    /// ```ignore
    /// store.write(|txn| Box::pin(async move { txn.create(&payer).await })).await?;
    /// ```
    pub async fn write<T, F>(&self, f: F) -> DomainResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut WriteTxn) -> BoxFuture<'t, DomainResult<T>> + Send,
    {
        let mut txn = self.begin_write().await?;
        let value = f(&mut txn).await?;
        txn.commit().await?;
        Ok(value)
    }

    /// Fetch a live record. Tombstoned records are reported as not found.
    pub async fn get<T: Entity>(&self, id: Uuid) -> DomainResult<T> {
        let stored = fetch_stored(&self.inner.pool, T::TABLE, id).await?;
        live_entity(T::TABLE, id, stored)
    }

    pub async fn query<T: Entity>(&self, filter: &Filter) -> DomainResult<Vec<T>> {
        fetch_filtered(&self.inner.pool, T::TABLE, filter)
            .await?
            .into_iter()
            .map(T::from_row)
            .collect()
    }

    /// Raw stored row including tombstones and bookkeeping columns.
    pub async fn get_row(&self, table: Table, id: Uuid) -> DomainResult<Option<StoredRow>> {
        fetch_stored(&self.inner.pool, table, id).await
    }

    pub async fn sync_status(&self, table: Table, id: Uuid) -> DomainResult<Option<RecordSyncStatus>> {
        Ok(self.get_row(table, id).await?.map(|stored| stored.sync_status))
    }

    /// Unpushed Change Log entries in causal order.
    pub async fn pending_changes(&self) -> DomainResult<Vec<ChangeLogEntry>> {
        change_log::pending_changes(&self.inner.pool).await
    }

    pub async fn pending_count(&self) -> DomainResult<i64> {
        change_log::pending_count(&self.inner.pool).await
    }

    pub async fn last_pulled_at(&self) -> DomainResult<Option<Timestamp>> {
        cursor::last_pulled_at(&self.inner.pool).await
    }

    /// Snapshot of every live record matching `filter`, re-emitted after each
    /// committed transaction that touched `T`'s table.
    pub fn subscribe<T: Entity>(&self, filter: Filter) -> impl Stream<Item = DomainResult<Vec<T>>> + Send + 'static {
        let changes = BroadcastStream::new(self.inner.notifier.subscribe())
            .filter(|event| {
                // A lagged receiver missed notifications; refresh to be safe.
                let relevant = match event {
                    Ok(table) => *table == T::TABLE,
                    Err(_) => true,
                };
                futures::future::ready(relevant)
            })
            .map(|_| ());

        let store = self.clone();
        stream::once(futures::future::ready(()))
            .chain(changes)
            .then(move |_| {
                let store = store.clone();
                let filter = filter.clone();
                async move { store.query::<T>(&filter).await }
            })
    }
}

/// Tries before giving up on finding an unused receipt reference.
const RENUMBER_ATTEMPTS: usize = 8;

/// The single in-flight write transaction.
///
/// Dropping it without calling [`WriteTxn::commit`] rolls everything back.
pub struct WriteTxn {
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
    inner: Arc<StoreInner>,
    touched: BTreeSet<Table>,
}

impl WriteTxn {
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub async fn get<T: Entity>(&mut self, id: Uuid) -> DomainResult<T> {
        let stored = fetch_stored(&mut *self.tx, T::TABLE, id).await?;
        live_entity(T::TABLE, id, stored)
    }

    pub async fn query<T: Entity>(&mut self, filter: &Filter) -> DomainResult<Vec<T>> {
        fetch_filtered(&mut *self.tx, T::TABLE, filter)
            .await?
            .into_iter()
            .map(T::from_row)
            .collect()
    }

    /// Insert a new record, stamped and queued for push.
    pub async fn create<T: Entity>(&mut self, entity: &T) -> DomainResult<T> {
        entity.validate()?;
        let id = entity.id();
        match self.fetch_stored(T::TABLE, id).await? {
            Some(stored) if stored.deleted => {
                return Err(DomainError::DeletedEntity(T::TABLE.to_string(), id));
            }
            Some(_) => return Err(ValidationError::unique("id").into()),
            None => {}
        }

        let now = now_millis();
        let mut row = entity.to_row()?;
        row.insert("last_modified_at".to_string(), Value::from(now));
        self.insert_row(T::TABLE, &row, RecordSyncStatus::Pending).await?;

        let columns: Vec<&str> = T::TABLE
            .schema()
            .columns
            .iter()
            .map(|c| c.name)
            .filter(|name| *name != "id" && *name != "last_modified_at")
            .collect();
        change_log::record_mutation(&mut self.tx, T::TABLE, id, ChangeOperation::Created, &columns, now).await?;

        log::debug!("Created {} {}", T::TABLE, id);
        T::from_row(row)
    }

    /// Persist the columns of `entity` that differ from the stored record.
    ///
    /// Returns the stored record unchanged when nothing differs.
    pub async fn update<T: Entity>(&mut self, entity: &T) -> DomainResult<T> {
        entity.validate()?;
        let id = entity.id();
        let stored = self
            .fetch_stored(T::TABLE, id)
            .await?
            .ok_or_else(|| DomainError::EntityNotFound(T::TABLE.to_string(), id))?;
        if stored.deleted {
            return Err(DomainError::DeletedEntity(T::TABLE.to_string(), id));
        }

        let mut row = entity.to_row()?;
        let changed = changed_columns(T::TABLE.schema(), &stored.row, &row);
        if changed.is_empty() {
            return T::from_row(stored.row);
        }

        let previous = stored.row.get("last_modified_at").and_then(Value::as_i64).unwrap_or(0);
        let now = now_millis().max(previous);
        row.insert("last_modified_at".to_string(), Value::from(now));
        self.overwrite_row(T::TABLE, &row, false, RecordSyncStatus::Pending).await?;
        change_log::record_mutation(&mut self.tx, T::TABLE, id, ChangeOperation::Updated, &changed, now).await?;

        if T::TABLE == Table::Payments {
            for column in &changed {
                let history = PaymentHistory::for_change(
                    id,
                    column,
                    stored.row.get(*column),
                    row.get(*column),
                    &self.inner.device_id,
                    now,
                );
                self.create(&history).await?;
            }
        }

        log::debug!("Updated {} {} ({})", T::TABLE, id, changed.join(", "));
        T::from_row(row)
    }

    /// Tombstone a record. The row stays until the deletion has been acknowledged.
    pub async fn delete<T: Entity>(&mut self, id: Uuid) -> DomainResult<()> {
        self.delete_record(T::TABLE, id).await
    }

    pub async fn delete_record(&mut self, table: Table, id: Uuid) -> DomainResult<()> {
        let stored = self
            .fetch_stored(table, id)
            .await?
            .ok_or_else(|| DomainError::EntityNotFound(table.to_string(), id))?;
        if stored.deleted {
            return Err(DomainError::DeletedEntity(table.to_string(), id));
        }

        let now = now_millis();
        self.set_tombstone(table, id, now, RecordSyncStatus::Pending).await?;
        change_log::record_mutation(&mut self.tx, table, id, ChangeOperation::Deleted, &[], now).await?;
        log::debug!("Deleted {} {}", table, id);
        Ok(())
    }

    /// The payment other than `excluding` that holds `ref_no`, tombstones included.
    pub(crate) async fn payment_id_by_ref_no(&mut self, ref_no: &str, excluding: Uuid) -> DomainResult<Option<Uuid>> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM payments WHERE ref_no = ? AND id <> ?")
            .bind(ref_no)
            .bind(excluding.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(DbError::from)?;
        id.map(|s| Uuid::parse_str(&s).map_err(|e| DomainError::Serialization(e.to_string())))
            .transpose()
    }

    /// Give payment `id` a fresh receipt reference dated like the original,
    /// avoiding `taken` and every reference already stored.
    ///
    /// A live payment goes through [`WriteTxn::update`], so the change is
    /// queued for push and lands in its payment history. A tombstoned one only
    /// has its column rewritten.
    pub(crate) async fn renumber_payment(&mut self, id: Uuid, taken: &str) -> DomainResult<String> {
        let stored = self
            .fetch_stored(Table::Payments, id)
            .await?
            .ok_or_else(|| DomainError::EntityNotFound(Table::Payments.to_string(), id))?;
        let deleted = stored.deleted;
        let mut payment = Payment::from_row(stored.row)?;
        let issued_on = DateTime::<Utc>::from_timestamp_millis(payment.paid_at)
            .map_or_else(|| Utc::now().date_naive(), |at| at.date_naive());

        let mut replacement = None;
        for _ in 0..RENUMBER_ATTEMPTS {
            let candidate = generate_ref_no(issued_on);
            if candidate != taken && self.payment_id_by_ref_no(&candidate, id).await?.is_none() {
                replacement = Some(candidate);
                break;
            }
        }
        let replacement = replacement.ok_or_else(|| DomainError::from(ValidationError::unique("ref_no")))?;

        if deleted {
            sqlx::query("UPDATE payments SET ref_no = ? WHERE id = ?")
                .bind(&replacement)
                .bind(id.to_string())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_write_error(Table::Payments, id, e))?;
            self.touched.insert(Table::Payments);
        } else {
            payment.ref_no = replacement.clone();
            self.update(&payment).await?;
        }
        Ok(replacement)
    }

    /// Commit and notify subscribers of every table written.
    pub async fn commit(self) -> DomainResult<()> {
        let WriteTxn { tx, _guard, inner, touched } = self;
        tx.commit()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;
        drop(_guard);
        for table in touched {
            // No receivers is not an error.
            let _ = inner.notifier.send(table);
        }
        Ok(())
    }

    pub(crate) fn tx(&mut self) -> &mut Transaction<'static, Sqlite> {
        &mut self.tx
    }

    pub(crate) async fn fetch_stored(&mut self, table: Table, id: Uuid) -> DomainResult<Option<StoredRow>> {
        fetch_stored(&mut *self.tx, table, id).await
    }

    pub(crate) async fn insert_row(&mut self, table: Table, row: &Row, status: RecordSyncStatus) -> DomainResult<()> {
        let schema = table.schema();
        let id = row_id(table, row)?;
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "INSERT INTO {} ({}, deleted, sync_status) VALUES (",
            table.name(),
            schema.column_list()
        ));
        for column in schema.columns {
            push_bind_value(&mut builder, column, row.get(column.name).unwrap_or(&Value::Null))?;
            builder.push(", ");
        }
        builder.push("0, ");
        builder.push_bind(status.as_str());
        builder.push(")");

        builder
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_write_error(table, id, e))?;
        self.touched.insert(table);
        Ok(())
    }

    pub(crate) async fn overwrite_row(
        &mut self,
        table: Table,
        row: &Row,
        deleted: bool,
        status: RecordSyncStatus,
    ) -> DomainResult<()> {
        let schema = table.schema();
        let id = row_id(table, row)?;
        let mut builder = QueryBuilder::<Sqlite>::new(format!("UPDATE {} SET ", table.name()));
        for column in schema.columns.iter().filter(|c| c.name != "id") {
            builder.push(format!("{} = ", column.name));
            push_bind_value(&mut builder, column, row.get(column.name).unwrap_or(&Value::Null))?;
            builder.push(", ");
        }
        builder.push("deleted = ");
        builder.push_bind(deleted);
        builder.push(", sync_status = ");
        builder.push_bind(status.as_str());
        builder.push(" WHERE id = ");
        builder.push_bind(id.to_string());

        builder
            .build()
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_write_error(table, id, e))?;
        self.touched.insert(table);
        Ok(())
    }

    pub(crate) async fn set_tombstone(
        &mut self,
        table: Table,
        id: Uuid,
        at: Timestamp,
        status: RecordSyncStatus,
    ) -> DomainResult<()> {
        let sql = format!(
            "UPDATE {} SET deleted = 1, sync_status = ?, last_modified_at = MAX(last_modified_at, ?) WHERE id = ?",
            table.name()
        );
        sqlx::query(&sql)
            .bind(status.as_str())
            .bind(at)
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_write_error(table, id, e))?;
        self.touched.insert(table);
        Ok(())
    }
}

pub(crate) async fn fetch_stored<'e, E>(executor: E, table: Table, id: Uuid) -> DomainResult<Option<StoredRow>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let schema = table.schema();
    let sql = format!(
        "SELECT {}, deleted, sync_status FROM {} WHERE id = ?",
        schema.column_list(),
        table.name()
    );
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(executor)
        .await
        .map_err(DbError::from)?;
    row.map(|r| decode_stored(schema, &r)).transpose()
}

async fn fetch_filtered<'e, E>(executor: E, table: Table, filter: &Filter) -> DomainResult<Vec<Row>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let schema = table.schema();
    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM {}",
        schema.column_list(),
        table.name()
    ));
    filter.push_sql(schema, &mut builder)?;
    let rows = builder
        .build()
        .fetch_all(executor)
        .await
        .map_err(DbError::from)?;
    rows.iter().map(|r| decode_row(schema, r)).collect()
}

fn live_entity<T: Entity>(table: Table, id: Uuid, stored: Option<StoredRow>) -> DomainResult<T> {
    match stored {
        Some(stored) if !stored.deleted => T::from_row(stored.row),
        _ => Err(DomainError::EntityNotFound(table.to_string(), id)),
    }
}

pub(crate) fn row_id(table: Table, row: &Row) -> DomainResult<Uuid> {
    row.get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| {
            DomainError::Validation(ValidationError::format("id", &format!("{} row has no valid UUID id", table)))
        })
}

fn map_write_error(table: Table, id: Uuid, error: sqlx::Error) -> DomainError {
    if let Some(db_error) = error.as_database_error() {
        if db_error.is_foreign_key_violation() {
            return DomainError::ReferentialViolation {
                table: table.to_string(),
                id,
                detail: db_error.message().to_string(),
            };
        }
        if db_error.is_unique_violation() {
            return DomainError::Validation(ValidationError::custom(&format!(
                "{} {} violates a unique constraint: {}",
                table,
                id,
                db_error.message()
            )));
        }
    }
    DomainError::Database(DbError::from(error))
}
