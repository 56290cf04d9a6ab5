use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::database::EntityStore;
use crate::domains::sync::change_log;
use crate::domains::sync::config::SyncSettings;
use crate::domains::sync::cursor;
use crate::domains::sync::merger;
use crate::domains::sync::network::NetworkMonitor;
use crate::domains::sync::push;
use crate::domains::sync::remote::RemoteAuthority;
use crate::domains::sync::types::{
    ApplySummary, ChangeLogEntry, ChangeSet, PullResponse, PushAck, SyncReport, SyncState, SyncStatus,
};
use crate::errors::{DomainResult, SyncError, SyncResult};
use crate::types::now_millis;

/// Result of asking for a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(SyncReport),
    /// A cycle was already running; it will run once more when it finishes.
    Coalesced,
}

/// Pull-then-push synchronisation against one remote authority.
///
/// Owns no data itself. Every step that touches local state runs in its own
/// store write transaction, and no transaction is held across a network call.
pub struct SyncEngine {
    store: EntityStore,
    remote: Arc<dyn RemoteAuthority>,
    settings: SyncSettings,
    cycle_lock: Mutex<()>,
    rerun_requested: AtomicBool,
    cancel_requested: AtomicBool,
    failed_attempts: AtomicU32,
    apply_violations: AtomicU32,
    status_tx: watch::Sender<SyncStatus>,
    trigger: Notify,
}

impl SyncEngine {
    pub fn new(store: EntityStore, remote: Arc<dyn RemoteAuthority>, settings: SyncSettings) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::default());
        Self {
            store,
            remote,
            settings,
            cycle_lock: Mutex::new(()),
            rerun_requested: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            failed_attempts: AtomicU32::new(0),
            apply_violations: AtomicU32::new(0),
            status_tx,
            trigger: Notify::new(),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn state(&self) -> SyncState {
        self.status_tx.borrow().state
    }

    /// Live status for a passive sync indicator.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Ask the background worker to run a cycle soon.
    pub fn request_sync(&self) {
        self.trigger.notify_one();
    }

    /// Abort the running cycle at its next step boundary.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Delay before the next retry given the failures so far.
    pub fn retry_delay(&self) -> Duration {
        let attempts = self.failed_attempts.load(Ordering::SeqCst);
        self.settings.backoff_delay(attempts.saturating_sub(1))
    }

    /// Run a cycle now, or mark one to follow the cycle already in flight.
    pub async fn sync_now(&self) -> SyncResult<CycleOutcome> {
        if self.state() == SyncState::Blocked {
            return Err(SyncError::SchemaIncompatible(
                self.status_tx.borrow().last_error.clone().unwrap_or_default(),
            ));
        }

        let Ok(_guard) = self.cycle_lock.try_lock() else {
            log::debug!("Sync already in progress, scheduling another cycle");
            self.rerun_requested.store(true, Ordering::SeqCst);
            return Ok(CycleOutcome::Coalesced);
        };

        loop {
            self.rerun_requested.store(false, Ordering::SeqCst);
            self.cancel_requested.store(false, Ordering::SeqCst);

            let result = self.run_cycle().await;
            match &result {
                Ok(report) => self.record_success(report).await,
                Err(error) => self.record_failure(error).await,
            }

            let report = result?;
            if !self.rerun_requested.swap(false, Ordering::SeqCst) {
                return Ok(CycleOutcome::Completed(report));
            }
            log::debug!("Running coalesced follow-up sync cycle");
        }
    }

    /// Forget the cursor so the next cycle re-pulls everything.
    pub async fn full_resync(&self) -> DomainResult<()> {
        let _guard = self.cycle_lock.lock().await;
        let mut txn = self.store.begin_write().await?;
        cursor::reset(txn.tx()).await?;
        txn.commit().await?;
        log::info!("Sync cursor reset; next cycle performs a full pull");
        Ok(())
    }

    async fn run_cycle(&self) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();

        self.set_state(SyncState::Pulling);
        let since = self.store.last_pulled_at().await?;
        let pulled = self.with_timeout(self.remote.pull_changes(since)).await?;
        self.checkpoint()?;

        self.set_state(SyncState::Applying);
        report.applied = match self.apply(&pulled).await {
            Ok(summary) => summary,
            Err(error) => {
                if matches!(error, SyncError::ReferentialViolation(_) | SyncError::UniqueConflict(_)) {
                    self.note_apply_violation(&pulled, &error);
                }
                return Err(error);
            }
        };
        self.apply_violations.store(0, Ordering::SeqCst);
        self.checkpoint()?;

        self.set_state(SyncState::Pushing);
        let batch = push::collect_batch(&self.store, self.settings.send_created_as_updated).await?;
        let ack = match &batch {
            Some(batch) => {
                log::info!("Pushing {} change(s)", batch.request.record_count());
                let response = self.with_timeout(self.remote.push_changes(&batch.request)).await?;
                PushAck::try_from(response)?
            }
            None => PushAck::Accepted,
        };
        report.pushed = batch.as_ref().map_or(0, |b| b.entries.len());
        self.checkpoint()?;

        self.set_state(SyncState::Acknowledging);
        let accepted = match (&batch, &ack) {
            (Some(batch), PushAck::Accepted) => batch.entries.clone(),
            (Some(batch), PushAck::PartialFailure(failed)) => batch.accepted_entries(failed),
            (None, _) => Vec::new(),
        };
        self.acknowledge(&accepted, &pulled, &mut report).await?;

        match ack {
            PushAck::Accepted => Ok(report),
            PushAck::PartialFailure(failed) => {
                log::warn!("Push partially failed for {} record(s); they stay queued", failed.len());
                Err(SyncError::PartialPushFailure { failed })
            }
        }
    }

    async fn apply(&self, pulled: &PullResponse) -> SyncResult<ApplySummary> {
        let mut txn = self.store.begin_write().await?;
        let summary = merger::apply_changes(&mut txn, &pulled.changes).await?;
        txn.commit().await?;
        Ok(summary)
    }

    /// Clear acknowledged entries, advance the cursor and purge tombstones, atomically.
    async fn acknowledge(
        &self,
        accepted: &[ChangeLogEntry],
        pulled: &PullResponse,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let mut txn = self.store.begin_write().await?;
        let cleared = change_log::mark_pushed(txn.tx(), accepted).await?;
        let cursor = cursor::advance(txn.tx(), pulled.timestamp, now_millis()).await?;
        let purged = change_log::purge_tombstones(txn.tx()).await?;
        txn.commit().await?;

        report.acknowledged = cleared.len();
        report.purged_tombstones = purged;
        report.cursor = Some(cursor);
        Ok(())
    }

    async fn with_timeout<T, F>(&self, call: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        match tokio::time::timeout(self.settings.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        }
    }

    fn checkpoint(&self) -> SyncResult<()> {
        if self.cancel_requested.swap(false, Ordering::SeqCst) {
            log::info!("Sync cycle cancelled");
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    fn note_apply_violation(&self, pulled: &PullResponse, error: &SyncError) {
        let count = self.apply_violations.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.settings.referential_alert_threshold {
            log::error!(
                "Integrity violation applying pull for the {} consecutive time ({}); batch at {}: {}",
                count,
                error,
                pulled.timestamp,
                summarize(&pulled.changes)
            );
        } else {
            log::warn!("Integrity violation applying pull, will retry: {}", error);
        }
    }

    fn set_state(&self, state: SyncState) {
        self.status_tx.send_modify(|status| status.state = state);
    }

    async fn record_success(&self, report: &SyncReport) {
        self.failed_attempts.store(0, Ordering::SeqCst);
        let pending = self.store.pending_count().await.ok();
        let synced_at = cursor::last_synced_at(self.store.pool()).await.ok().flatten();
        self.status_tx.send_modify(|status| {
            status.state = SyncState::Idle;
            status.last_error = None;
            status.last_synced_at = synced_at.or(status.last_synced_at);
            if let Some(pending) = pending {
                status.pending_changes = pending;
            }
        });
        log::info!(
            "Sync cycle complete: pulled {} change(s), pushed {}, cursor {:?}",
            report.applied.inserted + report.applied.updated + report.applied.deleted,
            report.pushed,
            report.cursor
        );
    }

    async fn record_failure(&self, error: &SyncError) {
        let pending = self.store.pending_count().await.ok();
        let state = if error.is_fatal() {
            log::error!("Sync blocked until the application is updated: {}", error);
            SyncState::Blocked
        } else if matches!(error, SyncError::Cancelled) {
            SyncState::Idle
        } else {
            let attempts = self.failed_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            log::warn!("Sync cycle failed (attempt {}): {}", attempts, error);
            SyncState::Error
        };

        self.status_tx.send_modify(|status| {
            status.state = state;
            if state != SyncState::Idle {
                status.last_error = Some(error.to_string());
            }
            if let Some(pending) = pending {
                status.pending_changes = pending;
            }
        });
    }

    /// Start the single background task that owns sync scheduling.
    ///
    /// Cycles run on every offline-to-online transition, on
    /// [`SyncEngine::request_sync`], and when a retry backoff expires.
    pub fn spawn_worker(self: &Arc<Self>, monitor: Arc<dyn NetworkMonitor>) -> SyncWorker {
        let engine = Arc::clone(self);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut connectivity = monitor.subscribe();
            let mut online = connectivity.borrow_and_update().is_online();
            let mut due: Option<Instant> = online.then(Instant::now);

            loop {
                let deadline = due.unwrap_or_else(Instant::now);
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let now_online = connectivity.borrow_and_update().is_online();
                        if now_online && !online {
                            log::info!("Back online, scheduling sync");
                            due = Some(Instant::now());
                        }
                        online = now_online;
                    }
                    _ = engine.trigger.notified() => {
                        if online {
                            due = Some(Instant::now());
                        } else {
                            log::debug!("Sync requested while offline; waiting for connectivity");
                        }
                    }
                    _ = tokio::time::sleep_until(deadline), if due.is_some() && online => {
                        due = None;
                        if engine.state() == SyncState::Error {
                            engine.set_state(SyncState::Idle);
                        }
                        match engine.sync_now().await {
                            Ok(_) | Err(SyncError::Cancelled) => {}
                            Err(error) if error.is_fatal() => {}
                            Err(_) => due = Some(Instant::now() + engine.retry_delay()),
                        }
                    }
                }
            }
            log::debug!("Sync worker stopped");
        });

        SyncWorker { handle, shutdown: shutdown_tx }
    }
}

/// Handle to the background worker.
pub struct SyncWorker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl SyncWorker {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

fn summarize(changes: &ChangeSet) -> String {
    changes
        .iter()
        .map(|(table, c)| {
            format!(
                "{}: {} created/{} updated/{} deleted",
                table,
                c.created.len(),
                c.updated.len(),
                c.deleted.len()
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}
