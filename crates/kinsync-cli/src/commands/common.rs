use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::Value;

use kinsync_core::sync::{Connectivity, CycleOutcome, DispatchOutcome, HttpRemote};
use kinsync_core::{
    Actions, CollectionKind, LocalReplica, Record, RecordId, RemoteAuthority, Snapshot,
    SyncCoordinator,
};

use crate::config::CliContext;
use crate::error::CliError;

/// An opened replica wired to the configured server.
pub struct Session {
    pub actions: Actions<HttpRemote>,
    remote: Arc<HttpRemote>,
    connectivity: Connectivity,
    sync_after: bool,
}

impl Session {
    /// Open the replica and probe the server once so dispatch knows whether
    /// to apply or queue.
    pub async fn open(context: &CliContext) -> Result<Self, CliError> {
        let session = Self::open_offline(context).await?;
        if context.sync_after {
            session.probe().await;
        }
        Ok(session)
    }

    /// Open without touching the network.
    pub async fn open_offline(context: &CliContext) -> Result<Self, CliError> {
        let replica = LocalReplica::open_path(&context.db_path).await?;
        let remote = Arc::new(HttpRemote::new(
            context.config.server_url.clone(),
            context.config.request_timeout(),
        )?);
        let connectivity = Connectivity::new(false);
        let coordinator = Arc::new(SyncCoordinator::new(
            replica,
            Arc::clone(&remote),
            connectivity.clone(),
            context.config.clone(),
        ));
        Ok(Self {
            actions: Actions::new(coordinator),
            remote,
            connectivity,
            sync_after: context.sync_after,
        })
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator<HttpRemote>> {
        self.actions.coordinator()
    }

    pub fn remote(&self) -> &Arc<HttpRemote> {
        &self.remote
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub async fn probe(&self) -> bool {
        let online = self.remote.ping().await;
        self.connectivity.set_online(online);
        tracing::debug!(online, server = self.remote.base_url(), "Probed merge server");
        online
    }

    /// Replay the queue and run one cycle, unless `--no-sync` was given.
    pub async fn finish(&self) -> Result<(), CliError> {
        if !self.sync_after {
            return Ok(());
        }
        self.sync_now().await.map(|_| ())
    }

    pub async fn sync_now(&self) -> Result<CycleOutcome, CliError> {
        let coordinator = self.coordinator();
        if let Some(report) = coordinator
            .outbox()
            .drain_if_online(coordinator.connectivity())
            .await?
        {
            if report.applied + report.dropped > 0 {
                println!(
                    "Replayed {} queued change(s), dropped {}",
                    report.applied, report.dropped
                );
            }
        }
        let outcome = coordinator.sync_once().await;
        if let CycleOutcome::Failed(message) = &outcome {
            eprintln!("Sync failed: {message}");
        }
        Ok(outcome)
    }

    /// The signed-in user, required by anything that writes as someone.
    pub async fn require_user(&self) -> Result<Record, CliError> {
        self.actions.current_user().await.ok_or(CliError::NotSignedIn)
    }
}

pub fn describe_dispatch(what: &str, outcome: DispatchOutcome) -> String {
    match outcome {
        DispatchOutcome::Applied => format!("{what} saved"),
        DispatchOutcome::Queued(entry) => {
            format!("{what} queued offline (entry {entry}); it will be sent when the server is reachable")
        }
    }
}

pub fn describe_cycle(outcome: &CycleOutcome) -> &'static str {
    match outcome {
        CycleOutcome::SkippedOffline => "Server unreachable, working offline",
        CycleOutcome::SkippedInFlight => "Another sync is already running",
        CycleOutcome::Unchanged => "Already up to date",
        CycleOutcome::Applied => "Sync completed",
        CycleOutcome::Deferred => "Local changes raced the sync; they will go out next cycle",
        CycleOutcome::Failed(_) => "Sync failed",
    }
}

/// Join positional words into one trimmed text, rejecting empties.
pub fn join_text(parts: &[String], what: &'static str) -> Result<String, CliError> {
    kinsync_core::util::normalize_text_option(Some(parts.join(" "))).ok_or(CliError::EmptyInput(what))
}

/// Find a record by the id typed on the command line, which may be numeric or text.
pub fn resolve_record(
    snapshot: &Snapshot,
    kind: CollectionKind,
    raw_id: &str,
) -> Result<Record, CliError> {
    let raw_id = raw_id.trim();
    snapshot
        .collection(kind)
        .iter()
        .find(|record| record.id().is_some_and(|id| id.to_string() == raw_id))
        .cloned()
        .ok_or_else(|| CliError::RecordNotFound {
            kind: kind.name(),
            id: raw_id.to_string(),
        })
}

pub fn resolve_id(
    snapshot: &Snapshot,
    kind: CollectionKind,
    raw_id: &str,
) -> Result<RecordId, CliError> {
    Ok(resolve_record(snapshot, kind, raw_id)?.require_id()?)
}

/// Settings values are JSON when they parse as JSON, plain strings otherwise.
pub fn parse_setting_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map_or_else(|| timestamp_ms.to_string(), |time| time.to_rfc3339())
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

pub fn display_name(record: &Record) -> String {
    record
        .get_str("name")
        .or_else(|| record.get_str("email"))
        .map_or_else(
            || record.id().map(|id| id.to_string()).unwrap_or_default(),
            str::to_string,
        )
}
