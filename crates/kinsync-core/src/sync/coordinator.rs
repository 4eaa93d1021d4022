//! Client-side sync control loop.
//!
//! The coordinator owns the only path by which merged server state reaches the
//! local replica. A cycle pushes the full local snapshot (plus presence), and
//! writes the merged answer back only if it differs and no local write happened
//! while the request was in flight.

use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::connectivity::Connectivity;
use super::remote::RemoteAuthority;
use crate::config::ClientConfig;
use crate::models::SyncEnvelope;
use crate::mutation::Mutation;
use crate::outbox::{DrainReport, Outbox};
use crate::services::LocalReplica;
use crate::state::SyncState;
use crate::util::unix_millis_now;
use crate::Result;

/// What one call to [`SyncCoordinator::sync_once`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No connectivity; nothing was sent.
    SkippedOffline,
    /// Another cycle was already running.
    SkippedInFlight,
    /// The merged state equals the local state.
    Unchanged,
    /// The merged state replaced the local collections.
    Applied,
    /// A local write raced the request; the next cycle pushes it.
    Deferred,
    Failed(String),
}

/// How a dispatched mutation was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Applied,
    /// Deferred to the outbox under this entry id.
    Queued(i64),
}

pub struct SyncCoordinator<R> {
    replica: LocalReplica,
    outbox: Outbox,
    remote: Arc<R>,
    connectivity: Connectivity,
    config: ClientConfig,
    state: watch::Sender<SyncState>,
}

impl<R: RemoteAuthority> SyncCoordinator<R> {
    pub fn new(
        replica: LocalReplica,
        remote: Arc<R>,
        connectivity: Connectivity,
        config: ClientConfig,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            outbox: Outbox::new(replica.clone()),
            replica,
            remote,
            connectivity,
            config,
            state,
        }
    }

    pub const fn replica(&self) -> &LocalReplica {
        &self.replica
    }

    pub const fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub const fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Run one reconciliation cycle. Never returns an error: failures are
    /// logged, reflected in [`SyncState::Failed`], and retried next tick.
    pub async fn sync_once(&self) -> CycleOutcome {
        if !self.connectivity.is_online() {
            tracing::debug!("Offline, skipping sync cycle");
            return CycleOutcome::SkippedOffline;
        }

        let acquired = self.state.send_if_modified(|state| {
            if *state == SyncState::Syncing {
                false
            } else {
                *state = SyncState::Syncing;
                true
            }
        });
        if !acquired {
            tracing::debug!("Sync cycle already in flight");
            return CycleOutcome::SkippedInFlight;
        }

        match self.run_cycle().await {
            Ok(outcome) => {
                self.state.send_replace(SyncState::Idle);
                tracing::debug!(?outcome, "Sync cycle finished");
                outcome
            }
            Err(error) => {
                self.state.send_replace(SyncState::Failed);
                tracing::warn!(%error, "Sync cycle failed");
                CycleOutcome::Failed(error.to_string())
            }
        }
    }

    async fn run_cycle(&self) -> Result<CycleOutcome> {
        let local = self.replica.read().await;
        let presence = self.replica.presence().await;
        let merged = self
            .remote
            .push(&SyncEnvelope::new(local.clone(), presence))
            .await?;

        if !merged.online.is_empty() {
            self.replica
                .update_presence(|presence| presence.merge_from(&merged.online))
                .await?;
        }

        if merged.snapshot == local {
            return Ok(CycleOutcome::Unchanged);
        }
        if self
            .replica
            .compare_and_write(&local, &merged.snapshot)
            .await?
        {
            tracing::info!(
                records = merged.snapshot.record_count(),
                "Applied merged state from server"
            );
            Ok(CycleOutcome::Applied)
        } else {
            Ok(CycleOutcome::Deferred)
        }
    }

    /// Apply now, or defer to the outbox when offline and the policy says so.
    pub async fn dispatch(&self, mutation: Mutation) -> Result<DispatchOutcome> {
        if !self.connectivity.is_online() && self.config.offline_queue.defers(&mutation) {
            if let Some(entry) = self.outbox.enqueue(&mutation).await {
                return Ok(DispatchOutcome::Queued(entry.id));
            }
            tracing::warn!(
                mutation = mutation.kind(),
                "Offline queue unavailable, applying locally"
            );
        }
        self.replica.apply_mutation(&mutation).await?;
        Ok(DispatchOutcome::Applied)
    }

    /// Connectivity came back: settle, replay the outbox, then sync right away.
    pub async fn handle_reconnect(&self) -> CycleOutcome {
        tokio::time::sleep(self.config.reconnect_settle()).await;
        self.replay_outbox().await;
        self.sync_once().await
    }

    /// A scheduled cycle. Anything still queued while online is replayed
    /// first, which covers a queue left over from an earlier offline session
    /// and reconnects the connectivity watch coalesced away.
    async fn tick(&self) -> CycleOutcome {
        if self.connectivity.is_online() && !self.outbox.is_empty().await {
            self.replay_outbox().await;
        }
        self.sync_once().await
    }

    async fn replay_outbox(&self) {
        match self.outbox.drain_if_online(&self.connectivity).await {
            Ok(Some(DrainReport { applied, dropped })) if applied + dropped > 0 => {
                tracing::info!(applied, dropped, "Replayed offline queue");
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "Failed to drain offline queue"),
        }
    }

    /// Stamp presence for the signed-in user, if any.
    pub async fn heartbeat(&self) -> Result<bool> {
        let Some(user_id) = self
            .replica
            .current_user()
            .await
            .and_then(|user| user.id())
        else {
            return Ok(false);
        };
        let now = unix_millis_now();
        self.replica
            .update_presence(|presence| presence.heartbeat(user_id.to_string(), now))
            .await
    }

    /// Spawn the control loop: a sync every `sync_interval` (the first one
    /// immediately, replaying any leftover outbox), heartbeats, and reconnect
    /// handling.
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move { coordinator.run(shutdown_rx).await });
        SyncHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(&self, mut shutdown: oneshot::Receiver<()>) {
        let mut sync_tick = tokio::time::interval(self.config.sync_interval());
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_tick = tokio::time::interval(self.config.heartbeat_interval());
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut online_rx = self.connectivity.subscribe();
        let mut was_online = *online_rx.borrow_and_update();

        tracing::info!(
            interval_secs = self.config.sync_interval_secs,
            online = was_online,
            "Sync coordinator started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = sync_tick.tick() => {
                    self.tick().await;
                }
                _ = heartbeat_tick.tick() => {
                    if let Err(error) = self.heartbeat().await {
                        tracing::warn!(%error, "Failed to record heartbeat");
                    }
                }
                Ok(()) = online_rx.changed() => {
                    let online = *online_rx.borrow_and_update();
                    if online && !was_online {
                        tracing::info!("Connectivity regained");
                        self.handle_reconnect().await;
                    }
                    was_online = online;
                }
            }
        }

        tracing::info!("Sync coordinator stopped");
    }
}

/// Owns the running control loop. Dropping the handle also ends the loop.
pub struct SyncHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Stop the loop after the current step and wait for it to exit.
    pub async fn stop(self) {
        self.shutdown.send(()).ok();
        if let Err(error) = self.task.await {
            tracing::warn!(%error, "Sync coordinator task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::models::{CollectionKind, Record, RecordId, Snapshot};
    use crate::sync::InMemoryRemote;

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn fast_config() -> ClientConfig {
        ClientConfig {
            sync_interval_secs: 1,
            heartbeat_interval_secs: 1,
            reconnect_settle_ms: 0,
            ..ClientConfig::default()
        }
    }

    async fn coordinator(
        remote: &InMemoryRemote,
        online: bool,
    ) -> Arc<SyncCoordinator<InMemoryRemote>> {
        let replica = LocalReplica::open_in_memory().await.unwrap();
        Arc::new(SyncCoordinator::new(
            replica,
            Arc::new(remote.clone()),
            Connectivity::new(online),
            fast_config(),
        ))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_cycle_sends_nothing_and_changes_nothing() {
        let remote = InMemoryRemote::new();
        let client = coordinator(&remote, false).await;
        client
            .dispatch(Mutation::UpdateGoal(record(json!({"id": "g1"}))))
            .await
            .unwrap();
        let before = client.replica().read().await;

        assert_eq!(client.sync_once().await, CycleOutcome::SkippedOffline);
        assert_eq!(remote.push_count(), 0);
        assert_eq!(client.replica().read().await, before);
        assert_eq!(client.state(), SyncState::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cycle_pulls_canonical_state() {
        let remote = InMemoryRemote::with_snapshot(Snapshot {
            posts: vec![record(json!({"id": "p1", "timestamp": 1}))],
            ..Snapshot::default()
        });
        let client = coordinator(&remote, true).await;

        assert_eq!(client.sync_once().await, CycleOutcome::Applied);
        assert_eq!(client.replica().read().await.posts.len(), 1);
        assert_eq!(client.sync_once().await, CycleOutcome::Unchanged);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_cycle_is_reported_and_retried() {
        let remote = InMemoryRemote::new();
        remote.set_reachable(false);
        let client = coordinator(&remote, true).await;

        assert!(matches!(client.sync_once().await, CycleOutcome::Failed(_)));
        assert_eq!(client.state(), SyncState::Failed);

        remote.set_reachable(true);
        assert_eq!(client.sync_once().await, CycleOutcome::Unchanged);
        assert_eq!(client.state(), SyncState::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_cycle_is_suppressed() {
        let remote = InMemoryRemote::new();
        let client = coordinator(&remote, true).await;
        client.state.send_replace(SyncState::Syncing);

        assert_eq!(client.sync_once().await, CycleOutcome::SkippedInFlight);
        assert_eq!(remote.push_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispatch_queues_legacy_mutations_while_offline() {
        let remote = InMemoryRemote::new();
        let client = coordinator(&remote, false).await;

        let queued = client
            .dispatch(Mutation::AddPost(record(json!({"id": "p1", "timestamp": 1}))))
            .await
            .unwrap();
        assert!(matches!(queued, DispatchOutcome::Queued(_)));
        assert!(client.replica().read().await.posts.is_empty());

        let applied = client
            .dispatch(Mutation::AddMeeting(record(json!({"id": "m1", "timestamp": 1}))))
            .await
            .unwrap();
        assert_eq!(applied, DispatchOutcome::Applied);
        assert_eq!(client.replica().read().await.meetings.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reconnect_drains_then_syncs() {
        let remote = InMemoryRemote::new();
        let client = coordinator(&remote, false).await;
        client
            .dispatch(Mutation::SendMessage(record(json!({"id": "m1", "timestamp": 3}))))
            .await
            .unwrap();

        client.connectivity().set_online(true);
        assert_eq!(client.handle_reconnect().await, CycleOutcome::Unchanged);

        assert!(client.outbox().is_empty().await);
        let canonical = remote.snapshot().await;
        assert!(canonical
            .find(CollectionKind::Messages, &RecordId::from("m1"))
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn two_clients_converge_through_the_server() {
        let shared = record(json!({"id": "u1", "timestamp": 1, "name": "Ana"}));
        let remote = InMemoryRemote::with_snapshot(Snapshot {
            users: vec![shared.clone()],
            ..Snapshot::default()
        });
        let alice = coordinator(&remote, true).await;
        let bob = coordinator(&remote, true).await;
        assert_eq!(alice.sync_once().await, CycleOutcome::Applied);
        assert_eq!(bob.sync_once().await, CycleOutcome::Applied);

        alice
            .dispatch(Mutation::AddGoal(record(json!({"id": "ga", "timestamp": 1, "title": "a"}))))
            .await
            .unwrap();
        bob.dispatch(Mutation::AddGoal(record(json!({"id": "gb", "timestamp": 2, "title": "b"}))))
            .await
            .unwrap();

        alice.sync_once().await;
        bob.sync_once().await;
        alice.sync_once().await;

        let canonical = remote.snapshot().await;
        assert_eq!(alice.replica().read().await, canonical);
        assert_eq!(bob.replica().read().await, canonical);
        assert_eq!(canonical.users, vec![shared]);
        assert_eq!(canonical.goals.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn heartbeat_travels_with_the_next_cycle() {
        let remote = InMemoryRemote::new();
        let alice = coordinator(&remote, true).await;
        let bob = coordinator(&remote, true).await;

        let user = record(json!({"id": "u_alice", "timestamp": 1}));
        alice.replica().set_current_user(Some(&user)).await.unwrap();
        assert!(alice.heartbeat().await.unwrap());
        assert!(!bob.heartbeat().await.unwrap());

        alice.sync_once().await;
        bob.sync_once().await;
        assert!(bob.replica().presence().await.last_seen("u_alice").is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn started_loop_syncs_immediately_and_stops() {
        let remote = InMemoryRemote::with_snapshot(Snapshot {
            users: vec![record(json!({"id": "u1", "timestamp": 1}))],
            ..Snapshot::default()
        });
        let client = coordinator(&remote, true).await;
        let mut events = client.replica().subscribe();

        let handle = client.start();
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(client.replica().read().await.users.len(), 1);

        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tick_replays_leftover_queue_while_online() {
        let remote = InMemoryRemote::new();
        let client = coordinator(&remote, true).await;
        client
            .outbox()
            .enqueue(&Mutation::AddPost(record(json!({"id": "p1", "timestamp": 1}))))
            .await
            .unwrap();

        assert_eq!(client.tick().await, CycleOutcome::Unchanged);
        assert!(client.outbox().is_empty().await);
        assert!(remote
            .snapshot()
            .await
            .find(CollectionKind::Posts, &RecordId::from("p1"))
            .is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn started_loop_replays_queue_left_by_earlier_session() {
        let remote = InMemoryRemote::new();
        let client = coordinator(&remote, true).await;
        client
            .outbox()
            .enqueue(&Mutation::AddPost(record(json!({"id": "p1", "timestamp": 1}))))
            .await
            .unwrap();

        let handle = client.start();
        tokio::time::timeout(Duration::from_secs(5), async {
            while remote
                .snapshot()
                .await
                .find(CollectionKind::Posts, &RecordId::from("p1"))
                .is_none()
            {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        handle.stop().await;

        assert!(client.outbox().is_empty().await);
        assert_eq!(client.replica().read().await.posts.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn started_loop_replays_outbox_on_reconnect() {
        let remote = InMemoryRemote::new();
        let client = coordinator(&remote, false).await;
        client
            .dispatch(Mutation::AddPost(record(json!({"id": "p1", "timestamp": 1}))))
            .await
            .unwrap();

        let handle = client.start();
        client.connectivity().set_online(true);

        tokio::time::timeout(Duration::from_secs(5), async {
            while remote
                .snapshot()
                .await
                .find(CollectionKind::Posts, &RecordId::from("p1"))
                .is_none()
            {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        handle.stop().await;
        assert!(client.outbox().is_empty().await);
    }
}
