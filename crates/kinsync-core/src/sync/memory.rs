//! In-process merge authority.
//!
//! Runs the same merge as the HTTP server against state held in memory. Used to
//! exercise coordinators without a network, and by tests across the workspace.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::remote::{RemoteAuthority, RemoteError, RemoteResult};
use crate::merge::merge_snapshots;
use crate::models::{PresenceMap, Snapshot, SyncEnvelope};

struct Canonical {
    snapshot: Snapshot,
    presence: PresenceMap,
}

/// Cloneable handle; clones share canonical state.
#[derive(Clone)]
pub struct InMemoryRemote {
    canonical: Arc<Mutex<Canonical>>,
    reachable: Arc<AtomicBool>,
    pushes: Arc<AtomicUsize>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::with_snapshot(Snapshot::default())
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            canonical: Arc::new(Mutex::new(Canonical {
                snapshot,
                presence: PresenceMap::default(),
            })),
            reachable: Arc::new(AtomicBool::new(true)),
            pushes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Simulate the server going away; requests fail while unreachable.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of `push` calls that reached the server.
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.canonical.lock().await.snapshot.clone()
    }

    fn check_reachable(&self) -> RemoteResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Api("server unreachable (503)".to_string()))
        }
    }
}

impl RemoteAuthority for InMemoryRemote {
    async fn push(&self, envelope: &SyncEnvelope) -> RemoteResult<SyncEnvelope> {
        self.check_reachable()?;
        self.pushes.fetch_add(1, Ordering::SeqCst);

        let mut canonical = self.canonical.lock().await;
        let (merged, _) = merge_snapshots(&canonical.snapshot, &envelope.snapshot);
        canonical.snapshot = merged;
        canonical.presence.merge_from(&envelope.online);
        Ok(SyncEnvelope::new(
            canonical.snapshot.clone(),
            canonical.presence.clone(),
        ))
    }

    async fn fetch(&self) -> RemoteResult<Snapshot> {
        self.check_reachable()?;
        Ok(self.canonical.lock().await.snapshot.clone())
    }

    async fn ping(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}
