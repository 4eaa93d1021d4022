//! Durable queue of mutations deferred while offline.

use serde::{Deserialize, Serialize};

use crate::models::OutboxEntry;
use crate::mutation::Mutation;
use crate::services::LocalReplica;
use crate::sync::Connectivity;
use crate::util::unix_millis_now;
use crate::Result;

/// Which mutations are deferred when there is no connectivity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OfflineQueuePolicy {
    /// Only posts, messages and new goals wait for the network; everything else
    /// is written locally right away.
    #[default]
    Legacy,
    /// Every collection mutation waits for the network.
    AllMutations,
}

impl OfflineQueuePolicy {
    pub const fn defers(self, mutation: &Mutation) -> bool {
        match self {
            Self::Legacy => mutation.is_legacy_queueable(),
            Self::AllMutations => true,
        }
    }
}

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    /// Entries that could not be decoded or applied; they are not retried.
    pub dropped: usize,
}

/// Outbox backed by the local replica's `ds_offline_queue` record.
#[derive(Clone)]
pub struct Outbox {
    replica: LocalReplica,
}

impl Outbox {
    pub const fn new(replica: LocalReplica) -> Self {
        Self { replica }
    }

    /// Append a mutation. Best-effort: a storage failure is logged and `None`
    /// is returned instead of an error.
    pub async fn enqueue(&self, mutation: &Mutation) -> Option<OutboxEntry> {
        match self.replica.push_outbox(mutation, unix_millis_now()).await {
            Ok(entry) => {
                tracing::info!(entry = entry.id, mutation = %entry.kind, "Queued offline mutation");
                Some(entry)
            }
            Err(error) => {
                tracing::warn!(mutation = mutation.kind(), %error, "Failed to queue offline mutation");
                None
            }
        }
    }

    pub async fn entries(&self) -> Vec<OutboxEntry> {
        self.replica.outbox_entries().await
    }

    pub async fn len(&self) -> usize {
        self.entries().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries().await.is_empty()
    }

    /// Drain when connected; returns `None` without touching anything when offline.
    pub async fn drain_if_online(&self, connectivity: &Connectivity) -> Result<Option<DrainReport>> {
        if !connectivity.is_online() {
            return Ok(None);
        }
        self.drain().await.map(Some)
    }

    /// Apply every queued entry in insertion order, then clear the batch.
    ///
    /// A failing entry is logged and dropped; the batch is cleared regardless.
    /// Entries queued while the drain runs are left for the next one.
    pub async fn drain(&self) -> Result<DrainReport> {
        let entries = self.replica.outbox_entries().await;
        let Some(last_id) = entries.last().map(|entry| entry.id) else {
            return Ok(DrainReport::default());
        };

        let mut report = DrainReport::default();
        for entry in &entries {
            let applied = match Mutation::from_entry(entry) {
                Ok(mutation) => self.replica.apply_mutation(&mutation).await,
                Err(error) => Err(error),
            };
            match applied {
                Ok(()) => {
                    tracing::debug!(entry = entry.id, mutation = %entry.kind, "Replayed offline mutation");
                    report.applied += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        entry = entry.id,
                        mutation = %entry.kind,
                        %error,
                        "Dropping offline mutation that failed to apply"
                    );
                    report.dropped += 1;
                }
            }
        }

        self.replica.clear_outbox_through(last_id).await?;
        tracing::info!(
            applied = report.applied,
            dropped = report.dropped,
            "Drained offline queue"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::models::Record;

    fn post(id: &str) -> Mutation {
        Mutation::AddPost(
            Record::from_value(json!({"id": id, "timestamp": 10, "content": "hello"})).unwrap(),
        )
    }

    async fn outbox() -> (LocalReplica, Outbox) {
        let replica = LocalReplica::open_in_memory().await.unwrap();
        (replica.clone(), Outbox::new(replica))
    }

    #[test]
    fn legacy_policy_defers_only_three_actions() {
        let goal_update = Mutation::UpdateGoal(Record::with_id("g1", 1));
        assert!(OfflineQueuePolicy::Legacy.defers(&post("p1")));
        assert!(!OfflineQueuePolicy::Legacy.defers(&goal_update));
        assert!(OfflineQueuePolicy::AllMutations.defers(&goal_update));
    }

    #[test]
    fn policy_parses_kebab_case() {
        let policy: OfflineQueuePolicy = serde_json::from_value(json!("all-mutations")).unwrap();
        assert_eq!(policy, OfflineQueuePolicy::AllMutations);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replayed_post_matches_online_post() {
        let (queued_replica, outbox) = outbox().await;
        outbox.enqueue(&post("p1")).await.unwrap();
        assert!(queued_replica.read().await.posts.is_empty());

        let report = outbox.drain().await.unwrap();
        assert_eq!(report, DrainReport { applied: 1, dropped: 0 });
        assert!(outbox.is_empty().await);

        let online_replica = LocalReplica::open_in_memory().await.unwrap();
        online_replica.apply_mutation(&post("p1")).await.unwrap();

        assert_eq!(queued_replica.read().await, online_replica.read().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn entries_replay_in_insertion_order() {
        let (replica, outbox) = outbox().await;
        outbox.enqueue(&post("first")).await.unwrap();
        outbox.enqueue(&post("second")).await.unwrap();
        outbox.drain().await.unwrap();

        // Posts are prepended, so the last replayed comes first
        let ids: Vec<_> = replica
            .read()
            .await
            .posts
            .iter()
            .filter_map(Record::id)
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["second", "first"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_entries_are_dropped_and_queue_cleared() {
        let (replica, outbox) = outbox().await;
        replica
            .push_outbox_raw("ADD_POST".into(), json!("not a record"), 1)
            .await
            .unwrap();
        replica
            .push_outbox_raw("WHAT_IS_THIS".into(), json!({}), 2)
            .await
            .unwrap();
        outbox.enqueue(&post("ok")).await.unwrap();

        let report = outbox.drain().await.unwrap();
        assert_eq!(report, DrainReport { applied: 1, dropped: 2 });
        assert!(outbox.is_empty().await);
        assert_eq!(replica.read().await.posts.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_drain_leaves_queue_alone() {
        let (_replica, outbox) = outbox().await;
        outbox.enqueue(&post("p1")).await.unwrap();

        let connectivity = Connectivity::new(false);
        assert_eq!(outbox.drain_if_online(&connectivity).await.unwrap(), None);
        assert_eq!(outbox.len().await, 1);

        connectivity.set_online(true);
        let report = outbox.drain_if_online(&connectivity).await.unwrap();
        assert_eq!(report, Some(DrainReport { applied: 1, dropped: 0 }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn draining_an_empty_queue_is_a_noop() {
        let (_replica, outbox) = outbox().await;
        assert_eq!(outbox.drain().await.unwrap(), DrainReport::default());
    }
}
