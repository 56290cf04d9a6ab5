use std::sync::Arc;

// Public modules
pub mod database;
pub mod db_migration;
pub mod domains;
pub mod errors;
pub mod types;
pub mod validation;

use crate::database::EntityStore;
use crate::domains::settings::CoreSettings;
use crate::domains::sync::{HttpRemoteAuthority, ManualNetworkMonitor, SyncEngine, SyncWorker};
use crate::errors::ServiceResult;

/// Initialise `env_logger` once, defaulting `RUST_LOG` to `debug` in debug builds and `info` otherwise.
pub fn init_logging() {
    #[cfg(debug_assertions)]
    let default_level = "debug";
    #[cfg(not(debug_assertions))]
    let default_level = "info";

    // A second call (or a host that installed its own logger) is not an error.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).try_init();
}

/// The wired-up core for one device. Owned by the host; there are no global singletons.
pub struct CoreContext {
    pub store: EntityStore,
    pub remote: Arc<HttpRemoteAuthority>,
    pub engine: Arc<SyncEngine>,
    pub network: Arc<ManualNetworkMonitor>,
}

impl CoreContext {
    /// Start the background sync worker driven by [`CoreContext::network`].
    pub fn start_sync(&self) -> SyncWorker {
        self.engine.spawn_worker(self.network.clone())
    }
}

/// Open (and migrate) the local store and build the sync engine around it.
///
/// The network monitor starts offline; the host reports connectivity through
/// `context.network.set(..)`.
pub async fn initialize(settings: CoreSettings) -> ServiceResult<CoreContext> {
    init_logging();
    settings.validate()?;

    log::info!("Initializing revenue sync core");
    log::debug!("Database URL: {}", settings.database_url);
    log::debug!("Device ID: {}", settings.device_id);

    let store = EntityStore::open(&settings.database_url, &settings.device_id).await?;
    let remote = Arc::new(HttpRemoteAuthority::new(
        &settings.sync.api_endpoint,
        settings.sync.request_timeout,
    )?);
    let engine = Arc::new(SyncEngine::new(store.clone(), remote.clone(), settings.sync.clone()));
    let network = Arc::new(ManualNetworkMonitor::default());

    log::info!("Revenue sync core initialized");
    Ok(CoreContext {
        store,
        remote,
        engine,
        network,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::payer::Payer;
    use crate::domains::sync::{SyncSettings, SyncState};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_initialize_opens_store_and_engine() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("core.db").display());
        let settings = CoreSettings::new(&url, "tablet-01", SyncSettings::new("http://127.0.0.1:9/api"));

        let context = initialize(settings.clone()).await.unwrap();
        assert_eq!(context.store.device_id(), "tablet-01");
        assert_eq!(context.engine.state(), SyncState::Idle);

        let mut txn = context.store.begin_write().await.unwrap();
        txn.create(&Payer::new("Offline Entry")).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(context.store.pending_count().await.unwrap(), 1);

        // Reopening an already-migrated database is fine.
        drop(context);
        let reopened = initialize(settings).await.unwrap();
        assert_eq!(reopened.store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_initialize_rejects_bad_settings() {
        let settings = CoreSettings::new("not-a-url", "tablet-01", SyncSettings::default());
        assert!(initialize(settings).await.is_err());
    }
}
