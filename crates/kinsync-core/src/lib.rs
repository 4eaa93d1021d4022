//! kinsync-core - Core library for kinsync
//!
//! This crate contains the shared data model, the local replica, the offline
//! outbox, the last-write-wins merge and the sync coordinator used by the
//! merge server and every client.

pub mod actions;
pub mod config;
pub mod db;
pub mod error;
pub mod merge;
pub mod models;
pub mod mutation;
pub mod outbox;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use actions::{Actions, Role};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use merge::{merge_collection, merge_snapshots, MergeReport};
pub use models::{CollectionKind, Record, RecordId, Settings, Snapshot, SyncEnvelope};
pub use mutation::Mutation;
pub use outbox::{OfflineQueuePolicy, Outbox};
pub use services::{LocalReplica, StoreEvent};
pub use state::SyncState;
pub use sync::{HttpRemote, InMemoryRemote, RemoteAuthority, SyncCoordinator};
