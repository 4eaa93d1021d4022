//! Connectivity signal shared by the coordinator, the outbox and the actions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::remote::RemoteAuthority;

/// Observable online/offline flag. Clones observe the same flag.
#[derive(Clone, Debug)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns whether the flag changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Poll `remote.ping()` every `interval` and publish the result.
///
/// The task runs until aborted.
pub fn spawn_probe<R: RemoteAuthority>(
    remote: Arc<R>,
    connectivity: Connectivity,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let online = remote.ping().await;
            if connectivity.set_online(online) {
                tracing::info!(online, "Connectivity changed");
            }
        }
    })
}
