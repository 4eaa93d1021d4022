//! Canonical snapshot held by the merge server.
//!
//! The document on disk is exactly the seven collections. Presence is merged
//! alongside but kept in memory only.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::Mutex;

use kinsync_core::models::PresenceMap;
use kinsync_core::util::unix_millis_now;
use kinsync_core::{merge_snapshots, MergeReport, Snapshot, SyncEnvelope};

use crate::error::AppError;

/// Merge totals since the server started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeMetrics {
    pub syncs: u64,
    pub inserted: u64,
    pub replaced: u64,
    pub stale: u64,
    pub skipped: u64,
}

impl MergeMetrics {
    fn record(&mut self, report: MergeReport) {
        self.syncs += 1;
        self.inserted += report.inserted as u64;
        self.replaced += report.replaced as u64;
        self.stale += report.stale as u64;
        self.skipped += report.skipped as u64;
    }
}

struct Canonical {
    snapshot: Snapshot,
    presence: PresenceMap,
    metrics: MergeMetrics,
}

pub struct CanonicalStore {
    path: PathBuf,
    state: Mutex<Canonical>,
}

impl CanonicalStore {
    /// Load the canonical document, creating it on first run.
    ///
    /// An unreadable document is moved aside as `<file>.corrupt-<ms>` and the
    /// server starts from an empty snapshot.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let snapshot = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<Snapshot>(&raw) {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    tracing::warn!(%error, path = %path.display(), "Canonical store is corrupt");
                    quarantine(&path).await?;
                    Snapshot::default()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(error) => {
                return Err(AppError::storage(format!(
                    "failed to read {}: {error}",
                    path.display()
                )))
            }
        };

        if !path.exists() {
            persist(&path, &snapshot).await?;
        }
        tracing::info!(
            path = %path.display(),
            records = snapshot.record_count(),
            "Loaded canonical store"
        );

        Ok(Self {
            path,
            state: Mutex::new(Canonical {
                snapshot,
                presence: PresenceMap::default(),
                metrics: MergeMetrics::default(),
            }),
        })
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.snapshot.clone()
    }

    pub async fn metrics(&self) -> MergeMetrics {
        self.state.lock().await.metrics
    }

    pub async fn presence(&self) -> PresenceMap {
        self.state.lock().await.presence.clone()
    }

    /// Merge a client envelope into canonical state and persist it before
    /// answering. Read, merge and write happen under one lock.
    pub async fn sync(&self, envelope: &SyncEnvelope) -> Result<(SyncEnvelope, MergeReport), AppError> {
        let mut state = self.state.lock().await;
        let (merged, report) = merge_snapshots(&state.snapshot, &envelope.snapshot);

        if merged != state.snapshot {
            persist(&self.path, &merged).await?;
            state.snapshot = merged;
        }
        state.presence.merge_from(&envelope.online);
        state.metrics.record(report);

        Ok((
            SyncEnvelope::new(state.snapshot.clone(), state.presence.clone()),
            report,
        ))
    }
}

/// Write through a temp file so a crash never leaves a half-written document.
async fn persist(path: &Path, snapshot: &Snapshot) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|error| AppError::storage(format!("failed to create {}: {error}", parent.display())))?;
    }
    let payload = serde_json::to_string_pretty(snapshot)
        .map_err(|error| AppError::internal(format!("failed to encode snapshot: {error}")))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, payload)
        .await
        .map_err(|error| AppError::storage(format!("failed to write {}: {error}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|error| AppError::storage(format!("failed to replace {}: {error}", path.display())))
}

async fn quarantine(path: &Path) -> Result<(), AppError> {
    let file_name = path
        .file_name()
        .map_or_else(|| "db.json".into(), |name| name.to_string_lossy().into_owned());
    let target = path.with_file_name(format!("{file_name}.corrupt-{}", unix_millis_now()));
    tokio::fs::rename(path, &target).await.map_err(|error| {
        AppError::storage(format!("failed to move aside {}: {error}", path.display()))
    })?;
    tracing::warn!(
        "Moved corrupt canonical store from {} to {}",
        path.display(),
        target.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use super::*;

    fn envelope(value: Value) -> SyncEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn first_run_writes_empty_document() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db.json");

        let store = CanonicalStore::open(&path).await.unwrap();
        assert!(store.snapshot().await.is_empty());

        let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            on_disk,
            json!({
                "users": [], "posts": [], "messages": [], "tree": [],
                "meetings": [], "emergencies": [], "goals": []
            })
        );
    }

    #[tokio::test]
    async fn sync_persists_before_answering() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db.json");
        let store = CanonicalStore::open(&path).await.unwrap();

        let (answer, report) = store
            .sync(&envelope(json!({
                "posts": [{"id": 1, "timestamp": 100, "v": "a"}],
                "online": {"u1": 5}
            })))
            .await
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(answer.online.last_seen("u1"), Some(5));

        let reopened = CanonicalStore::open(&path).await.unwrap();
        assert_eq!(reopened.snapshot().await, answer.snapshot);
        // Presence is not part of the persisted document.
        assert!(reopened.presence().await.is_empty());
        assert!(!std::fs::read_to_string(&path).unwrap().contains("online"));
    }

    #[tokio::test]
    async fn sign_out_replaces_older_heartbeat() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CanonicalStore::open(tmp.path().join("db.json")).await.unwrap();

        store
            .sync(&envelope(json!({"online": {"u1": 1_000}})))
            .await
            .unwrap();
        let (answer, _) = store
            .sync(&envelope(json!({"online": {"u1": -2_000}})))
            .await
            .unwrap();
        assert_eq!(answer.online.last_seen("u1"), None);

        // A client still holding the old heartbeat cannot bring it back.
        let (answer, _) = store
            .sync(&envelope(json!({"online": {"u1": 1_000}})))
            .await
            .unwrap();
        assert!(answer
            .online
            .online_users(2_500, std::time::Duration::from_secs(30))
            .is_empty());
    }

    #[tokio::test]
    async fn newer_timestamp_wins_and_metrics_accumulate() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CanonicalStore::open(tmp.path().join("db.json")).await.unwrap();

        store
            .sync(&envelope(json!({"goals": [{"id": 1, "timestamp": 100, "v": "a"}]})))
            .await
            .unwrap();
        store
            .sync(&envelope(json!({"goals": [{"id": 1, "timestamp": 200, "v": "b"}]})))
            .await
            .unwrap();
        let (answer, _) = store
            .sync(&envelope(json!({"goals": [{"id": 1, "timestamp": 50, "v": "c"}, {"v": "no id"}]})))
            .await
            .unwrap();

        assert_eq!(answer.snapshot.goals[0].get_str("v"), Some("b"));
        assert_eq!(
            store.metrics().await,
            MergeMetrics {
                syncs: 3,
                inserted: 1,
                replaced: 1,
                stale: 1,
                skipped: 1,
            }
        );
    }

    #[tokio::test]
    async fn corrupt_document_is_quarantined() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = CanonicalStore::open(&path).await.unwrap();
        assert!(store.snapshot().await.is_empty());

        let quarantined = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(Result::ok)
            .any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("db.json.corrupt-")
            });
        assert!(quarantined);
        assert!(path.exists());
    }
}
