//! Data models for kinsync

mod outbox;
mod presence;
mod record;
mod settings;
mod snapshot;

pub use outbox::OutboxEntry;
pub use presence::{PresenceMap, PRESENCE_TTL};
pub use record::{Record, RecordId};
pub use settings::{Settings, ThemeMode};
pub use snapshot::{CollectionKind, Snapshot, SyncEnvelope};
