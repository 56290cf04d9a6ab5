pub mod change_log;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod merger;
pub mod network;
pub mod push;
pub mod remote;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::SyncSettings;
pub use engine::{CycleOutcome, SyncEngine, SyncWorker};
pub use network::{Connectivity, ManualNetworkMonitor, NetworkMonitor};
pub use remote::{HttpRemoteAuthority, RemoteAuthority};
pub use types::{ChangeLogEntry, ChangeOperation, SyncReport, SyncState, SyncStatus};
