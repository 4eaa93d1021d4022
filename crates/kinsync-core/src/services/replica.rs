//! Local replica store: the client's durable view of the shared dataset.
//!
//! Every collection, the settings, the session pointer, the presence map and the
//! outbox live under their own key in one libSQL table. Reads never fail: a
//! missing or unparsable value is replaced by its empty default and logged.
//! Every successful write is announced on a broadcast channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex};

use crate::db::{Database, LibSqlReplicaRepository, ReplicaRepository};
use crate::models::{CollectionKind, OutboxEntry, PresenceMap, Record, Settings, Snapshot};
use crate::mutation::Mutation;
use crate::util::unix_millis_now;
use crate::Result;

const SETTINGS_KEY: &str = "ds_settings";
const CURRENT_USER_KEY: &str = "ds_current_user";
const PRESENCE_KEY: &str = "ds_online_status";
const OUTBOX_KEY: &str = "ds_offline_queue";

const EVENT_CAPACITY: usize = 64;

/// Change notification raised after a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// All seven collections were replaced (merged state from the server).
    SnapshotChanged,
    CollectionChanged(CollectionKind),
    SettingsChanged,
    SessionChanged,
    PresenceChanged,
    OutboxChanged,
}

/// Thread-safe handle to the local replica. Clones share the same database.
#[derive(Clone)]
pub struct LocalReplica {
    db: Arc<Mutex<Database>>,
    events: broadcast::Sender<StoreEvent>,
}

impl LocalReplica {
    /// Open (or create) the replica at `db_path`.
    ///
    /// A file that is not a database is moved aside and replaced by a fresh one.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path).await {
            Ok(db) => db,
            Err(error) if is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local replica at {} is unreadable: {}. Starting from an empty replica.",
                    db_path.display(),
                    error
                );
                quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path).await?
            }
            Err(error) => return Err(error),
        };
        tracing::debug!("Opened local replica at {}", db_path.display());
        Ok(Self::from_database(db))
    }

    /// Open an in-memory replica (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory().await?))
    }

    fn from_database(db: Database) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db: Arc::new(Mutex::new(db)),
            events,
        }
    }

    /// Receive change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine
        self.events.send(event).ok();
    }

    /// Current snapshot. Never fails; unreadable collections come back empty.
    pub async fn read(&self) -> Snapshot {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaRepository::new(db.connection());
        load_snapshot(&repo).await
    }

    /// One collection, with the same fallback rules as [`LocalReplica::read`].
    pub async fn read_collection(&self, kind: CollectionKind) -> Vec<Record> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaRepository::new(db.connection());
        load_or_default(&repo, kind.storage_key()).await
    }

    /// Replace all seven collections in one transaction.
    pub async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        {
            let db = self.db.lock().await;
            let repo = LibSqlReplicaRepository::new(db.connection());
            store_collections(&repo, snapshot, &CollectionKind::ALL).await?;
        }
        self.notify(StoreEvent::SnapshotChanged);
        Ok(())
    }

    /// Replace all collections only if the replica still holds `expected`.
    ///
    /// Returns `false` (and writes nothing) when a local write slipped in.
    pub async fn compare_and_write(&self, expected: &Snapshot, next: &Snapshot) -> Result<bool> {
        {
            let db = self.db.lock().await;
            let repo = LibSqlReplicaRepository::new(db.connection());
            if &load_snapshot(&repo).await != expected {
                return Ok(false);
            }
            store_collections(&repo, next, &CollectionKind::ALL).await?;
        }
        self.notify(StoreEvent::SnapshotChanged);
        Ok(true)
    }

    /// Apply `f` to one collection and persist the result.
    pub async fn mutate<F>(&self, kind: CollectionKind, f: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Record>),
    {
        {
            let db = self.db.lock().await;
            let repo = LibSqlReplicaRepository::new(db.connection());
            let mut records: Vec<Record> = load_or_default(&repo, kind.storage_key()).await;
            f(&mut records);
            repo.put(kind.storage_key(), &serde_json::to_string(&records)?, unix_millis_now())
                .await?;
        }
        self.notify(StoreEvent::CollectionChanged(kind));
        Ok(())
    }

    /// Apply a mutation, persisting only the collections it actually changed.
    pub async fn apply_mutation(&self, mutation: &Mutation) -> Result<()> {
        let changed: Vec<CollectionKind> = {
            let db = self.db.lock().await;
            let repo = LibSqlReplicaRepository::new(db.connection());
            let before = load_snapshot(&repo).await;
            let mut after = before.clone();
            mutation.apply(&mut after)?;

            let changed: Vec<_> = mutation
                .targets()
                .iter()
                .copied()
                .filter(|kind| before.collection(*kind) != after.collection(*kind))
                .collect();
            if !changed.is_empty() {
                store_collections(&repo, &after, &changed).await?;
            }
            changed
        };

        tracing::debug!(
            mutation = mutation.kind(),
            changed = changed.len(),
            "Applied mutation to local replica"
        );
        for kind in changed {
            self.notify(StoreEvent::CollectionChanged(kind));
        }
        Ok(())
    }

    pub async fn settings(&self) -> Settings {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaRepository::new(db.connection());
        load_or_default(&repo, SETTINGS_KEY).await
    }

    /// Shallow-merge `patch` into the stored settings.
    pub async fn update_settings(&self, patch: &Map<String, Value>) -> Result<Settings> {
        let settings = {
            let db = self.db.lock().await;
            let repo = LibSqlReplicaRepository::new(db.connection());
            let current: Settings = load_or_default(&repo, SETTINGS_KEY).await;
            let next = current.merged_with(patch)?;
            store_value(&repo, SETTINGS_KEY, &next).await?;
            next
        };
        self.notify(StoreEvent::SettingsChanged);
        Ok(settings)
    }

    /// Signed-in user, if any.
    pub async fn current_user(&self) -> Option<Record> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaRepository::new(db.connection());
        load_or_default(&repo, CURRENT_USER_KEY).await
    }

    /// Store or clear the signed-in user pointer.
    pub async fn set_current_user(&self, user: Option<&Record>) -> Result<()> {
        {
            let db = self.db.lock().await;
            let repo = LibSqlReplicaRepository::new(db.connection());
            match user {
                Some(user) => store_value(&repo, CURRENT_USER_KEY, user).await?,
                None => repo.remove(CURRENT_USER_KEY).await?,
            }
        }
        self.notify(StoreEvent::SessionChanged);
        Ok(())
    }

    pub async fn presence(&self) -> PresenceMap {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaRepository::new(db.connection());
        load_or_default(&repo, PRESENCE_KEY).await
    }

    /// Read-modify-write the presence map. `f` returns whether it changed anything.
    pub async fn update_presence<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&mut PresenceMap) -> bool,
    {
        let changed = {
            let db = self.db.lock().await;
            let repo = LibSqlReplicaRepository::new(db.connection());
            let mut presence: PresenceMap = load_or_default(&repo, PRESENCE_KEY).await;
            let changed = f(&mut presence);
            if changed {
                store_value(&repo, PRESENCE_KEY, &presence).await?;
            }
            changed
        };
        if changed {
            self.notify(StoreEvent::PresenceChanged);
        }
        Ok(changed)
    }

    /// Queued entries in insertion order.
    pub async fn outbox_entries(&self) -> Vec<OutboxEntry> {
        let db = self.db.lock().await;
        let repo = LibSqlReplicaRepository::new(db.connection());
        load_or_default(&repo, OUTBOX_KEY).await
    }

    /// Append a mutation to the outbox. Entry ids strictly increase even when two
    /// mutations are queued within the same millisecond.
    pub async fn push_outbox(&self, mutation: &Mutation, now: i64) -> Result<OutboxEntry> {
        let encoded = mutation.to_entry(now, now)?;
        self.push_outbox_raw(encoded.kind, encoded.payload, now)
            .await
    }

    pub(crate) async fn push_outbox_raw(
        &self,
        kind: String,
        payload: Value,
        now: i64,
    ) -> Result<OutboxEntry> {
        let entry = {
            let db = self.db.lock().await;
            let repo = LibSqlReplicaRepository::new(db.connection());
            let mut entries: Vec<OutboxEntry> = load_or_default(&repo, OUTBOX_KEY).await;
            let id = entries
                .last()
                .map_or(now, |last| now.max(last.id.saturating_add(1)));
            let entry = OutboxEntry {
                id,
                kind,
                payload,
                timestamp: now,
            };
            entries.push(entry.clone());
            store_value(&repo, OUTBOX_KEY, &entries).await?;
            entry
        };
        self.notify(StoreEvent::OutboxChanged);
        Ok(entry)
    }

    /// Remove every entry with an id up to and including `last_id`.
    ///
    /// Entries queued after a drain started survive.
    pub async fn clear_outbox_through(&self, last_id: i64) -> Result<()> {
        {
            let db = self.db.lock().await;
            let repo = LibSqlReplicaRepository::new(db.connection());
            let mut entries: Vec<OutboxEntry> = load_or_default(&repo, OUTBOX_KEY).await;
            entries.retain(|entry| entry.id > last_id);
            store_value(&repo, OUTBOX_KEY, &entries).await?;
        }
        self.notify(StoreEvent::OutboxChanged);
        Ok(())
    }
}

async fn load_snapshot<R: ReplicaRepository>(repo: &R) -> Snapshot {
    let mut snapshot = Snapshot::default();
    for kind in CollectionKind::ALL {
        *snapshot.collection_mut(kind) = load_or_default(repo, kind.storage_key()).await;
    }
    snapshot
}

/// Load and parse one key, falling back to the type's default on any failure.
async fn load_or_default<R, T>(repo: &R, key: &str) -> T
where
    R: ReplicaRepository,
    T: DeserializeOwned + Default,
{
    match repo.get(key).await {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|error| {
            tracing::warn!(key, %error, "Corrupt replica record, treating it as empty");
            T::default()
        }),
        Ok(None) => T::default(),
        Err(error) => {
            tracing::warn!(key, %error, "Failed to read replica record, treating it as empty");
            T::default()
        }
    }
}

async fn store_value<R, T>(repo: &R, key: &str, value: &T) -> Result<()>
where
    R: ReplicaRepository,
    T: Serialize + ?Sized,
{
    repo.put(key, &serde_json::to_string(value)?, unix_millis_now())
        .await
}

async fn store_collections<R: ReplicaRepository>(
    repo: &R,
    snapshot: &Snapshot,
    kinds: &[CollectionKind],
) -> Result<()> {
    let mut entries = Vec::with_capacity(kinds.len());
    for kind in kinds {
        entries.push((
            kind.storage_key(),
            serde_json::to_string(snapshot.collection(*kind))?,
        ));
    }
    repo.put_many(&entries, unix_millis_now()).await
}

fn is_corrupted_db_error(error: &crate::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("file is not a database") || message.contains("database disk image is malformed")
}

/// Move a broken database file aside as `<name>.corrupt-<ms>` and drop its
/// WAL/SHM sidecars.
fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
    if db_path.exists() {
        let Some(file_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let backup_path =
            db_path.with_file_name(format!("{file_name}.corrupt-{}", unix_millis_now()));
        std::fs::rename(db_path, &backup_path)?;
        tracing::warn!(
            "Moved corrupted replica file from {} to {}",
            db_path.display(),
            backup_path.display()
        );
    }

    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
        return Ok(());
    };
    let sidecar_prefix = format!("{base_name}-");

    for entry in std::fs::read_dir(parent)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with(&sidecar_prefix) {
            let path = entry.path();
            std::fs::remove_file(&path)?;
            tracing::warn!("Removed stale replica sidecar {}", path.display());
        }
    }

    Ok(())
}
