//! Snapshot model: all seven collections at one instant

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use super::{PresenceMap, Record, RecordId};

/// The seven replicated collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Users,
    Posts,
    Messages,
    Tree,
    Meetings,
    Emergencies,
    Goals,
}

impl CollectionKind {
    /// Every collection, in wire order.
    pub const ALL: [Self; 7] = [
        Self::Users,
        Self::Posts,
        Self::Messages,
        Self::Tree,
        Self::Meetings,
        Self::Emergencies,
        Self::Goals,
    ];

    /// Field name used on the wire and in the canonical document.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Posts => "posts",
            Self::Messages => "messages",
            Self::Tree => "tree",
            Self::Meetings => "meetings",
            Self::Emergencies => "emergencies",
            Self::Goals => "goals",
        }
    }

    /// Key of the durable client record holding this collection.
    pub const fn storage_key(self) -> &'static str {
        match self {
            Self::Users => "ds_users",
            Self::Posts => "ds_posts",
            Self::Messages => "ds_messages",
            Self::Tree => "ds_tree",
            Self::Meetings => "ds_meetings",
            Self::Emergencies => "ds_emergencies",
            Self::Goals => "ds_goals",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CollectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| format!("unknown collection '{s}'"))
    }
}

/// Full dataset exchanged between a client replica and the merge server.
///
/// Missing or `null` collections deserialize as empty so partial documents from
/// older clients are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<Record>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub posts: Vec<Record>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<Record>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tree: Vec<Record>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub meetings: Vec<Record>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub emergencies: Vec<Record>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub goals: Vec<Record>,
}

impl Snapshot {
    pub const fn collection(&self, kind: CollectionKind) -> &Vec<Record> {
        match kind {
            CollectionKind::Users => &self.users,
            CollectionKind::Posts => &self.posts,
            CollectionKind::Messages => &self.messages,
            CollectionKind::Tree => &self.tree,
            CollectionKind::Meetings => &self.meetings,
            CollectionKind::Emergencies => &self.emergencies,
            CollectionKind::Goals => &self.goals,
        }
    }

    pub fn collection_mut(&mut self, kind: CollectionKind) -> &mut Vec<Record> {
        match kind {
            CollectionKind::Users => &mut self.users,
            CollectionKind::Posts => &mut self.posts,
            CollectionKind::Messages => &mut self.messages,
            CollectionKind::Tree => &mut self.tree,
            CollectionKind::Meetings => &mut self.meetings,
            CollectionKind::Emergencies => &mut self.emergencies,
            CollectionKind::Goals => &mut self.goals,
        }
    }

    /// Find a record by id in one collection.
    pub fn find(&self, kind: CollectionKind, id: &RecordId) -> Option<&Record> {
        self.collection(kind)
            .iter()
            .find(|record| record.id().as_ref() == Some(id))
    }

    /// Total number of records across all collections.
    pub fn record_count(&self) -> usize {
        CollectionKind::ALL
            .into_iter()
            .map(|kind| self.collection(kind).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }
}

/// Body of `POST /api/sync` in both directions.
///
/// The snapshot fields are flattened so plain snapshot documents are valid
/// envelopes; `online` carries heartbeats alongside the data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    #[serde(default, skip_serializing_if = "PresenceMap::is_empty")]
    pub online: PresenceMap,
}

impl SyncEnvelope {
    pub const fn new(snapshot: Snapshot, online: PresenceMap) -> Self {
        Self { snapshot, online }
    }
}

impl From<Snapshot> for SyncEnvelope {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            online: PresenceMap::default(),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Record>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Record>>::deserialize(deserializer)?.unwrap_or_default())
}
