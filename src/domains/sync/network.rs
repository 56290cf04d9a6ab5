use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online)
    }
}

/// Source of connectivity transitions. The sync worker starts a cycle on
/// every `Offline -> Online` edge.
pub trait NetworkMonitor: Send + Sync {
    fn subscribe(&self) -> watch::Receiver<Connectivity>;

    fn current(&self) -> Connectivity {
        *self.subscribe().borrow()
    }
}

/// Monitor driven by the host platform (or tests) calling [`ManualNetworkMonitor::set`].
pub struct ManualNetworkMonitor {
    sender: watch::Sender<Connectivity>,
}

impl ManualNetworkMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    pub fn set(&self, connectivity: Connectivity) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == connectivity {
                false
            } else {
                *current = connectivity;
                true
            }
        });
        if changed {
            log::info!("Connectivity changed to {:?}", connectivity);
        }
    }
}

impl Default for ManualNetworkMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Offline)
    }
}

impl NetworkMonitor for ManualNetworkMonitor {
    fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_are_observed_once() {
        let monitor = ManualNetworkMonitor::default();
        let mut rx = monitor.subscribe();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Offline);

        monitor.set(Connectivity::Offline);
        assert!(!rx.has_changed().unwrap());

        monitor.set(Connectivity::Online);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_online());
        assert_eq!(monitor.current(), Connectivity::Online);
    }
}
