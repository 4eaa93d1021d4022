//! Collection mutations shared by the online path and outbox replay.
//!
//! A [`Mutation`] carries the resolved target state of an action rather than an
//! instruction relative to the current state, so applying it twice is the same
//! as applying it once. Modifications raise the touched record's `timestamp` to
//! the mutation instant so the merge server accepts them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::models::{CollectionKind, OutboxEntry, Record, RecordId, Snapshot};

/// Every change an action can make to the replicated collections.
///
/// Serialized adjacently tagged (`{"type": "ADD_POST", "payload": {...}}`), which
/// is also the outbox entry layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Mutation {
    RegisterUser(Record),
    UpdateUser(Record),
    DeleteUser {
        id: RecordId,
    },
    AddPost(Record),
    SetReaction {
        post_id: RecordId,
        user_id: RecordId,
        /// `None` removes the user's reaction.
        reaction: Option<String>,
        at: i64,
    },
    AddComment {
        post_id: RecordId,
        comment: Value,
        at: i64,
    },
    SendMessage(Record),
    AddGoal(Record),
    UpdateGoal(Record),
    AddMeeting(Record),
    DeleteMeeting {
        id: RecordId,
    },
    AddFamilyMember(Record),
    UpdateMember(Record),
    ConnectMembers {
        parent_id: RecordId,
        child_id: RecordId,
        at: i64,
    },
    TriggerEmergency(Record),
    ResolveEmergency {
        id: RecordId,
        resolved_at: i64,
    },
    AddEmergencyChat {
        id: RecordId,
        message: Value,
        at: i64,
    },
    RespondToEmergency {
        id: RecordId,
        responder: Value,
        at: i64,
    },
}

enum Placement {
    Front,
    Back,
}

impl Mutation {
    /// Wire tag of this mutation.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RegisterUser(_) => "REGISTER_USER",
            Self::UpdateUser(_) => "UPDATE_USER",
            Self::DeleteUser { .. } => "DELETE_USER",
            Self::AddPost(_) => "ADD_POST",
            Self::SetReaction { .. } => "SET_REACTION",
            Self::AddComment { .. } => "ADD_COMMENT",
            Self::SendMessage(_) => "SEND_MESSAGE",
            Self::AddGoal(_) => "ADD_GOAL",
            Self::UpdateGoal(_) => "UPDATE_GOAL",
            Self::AddMeeting(_) => "ADD_MEETING",
            Self::DeleteMeeting { .. } => "DELETE_MEETING",
            Self::AddFamilyMember(_) => "ADD_FAMILY_MEMBER",
            Self::UpdateMember(_) => "UPDATE_MEMBER",
            Self::ConnectMembers { .. } => "CONNECT_MEMBERS",
            Self::TriggerEmergency(_) => "TRIGGER_EMERGENCY",
            Self::ResolveEmergency { .. } => "RESOLVE_EMERGENCY",
            Self::AddEmergencyChat { .. } => "ADD_EMERGENCY_CHAT",
            Self::RespondToEmergency { .. } => "RESPOND_TO_EMERGENCY",
        }
    }

    /// Collections this mutation may write.
    pub const fn targets(&self) -> &'static [CollectionKind] {
        match self {
            Self::RegisterUser(_) => &[CollectionKind::Users],
            Self::UpdateUser(_) | Self::DeleteUser { .. } => {
                &[CollectionKind::Users, CollectionKind::Tree]
            }
            Self::AddPost(_) | Self::SetReaction { .. } | Self::AddComment { .. } => {
                &[CollectionKind::Posts]
            }
            Self::SendMessage(_) => &[CollectionKind::Messages],
            Self::AddGoal(_) | Self::UpdateGoal(_) => &[CollectionKind::Goals],
            Self::AddMeeting(_) | Self::DeleteMeeting { .. } => &[CollectionKind::Meetings],
            Self::AddFamilyMember(_) | Self::UpdateMember(_) | Self::ConnectMembers { .. } => {
                &[CollectionKind::Tree]
            }
            Self::TriggerEmergency(_)
            | Self::ResolveEmergency { .. }
            | Self::AddEmergencyChat { .. }
            | Self::RespondToEmergency { .. } => &[CollectionKind::Emergencies],
        }
    }

    /// The three actions older clients deferred while offline.
    pub const fn is_legacy_queueable(&self) -> bool {
        matches!(
            self,
            Self::AddPost(_) | Self::SendMessage(_) | Self::AddGoal(_)
        )
    }

    /// Apply to a snapshot. A mutation whose target record is gone is a no-op.
    pub fn apply(&self, snapshot: &mut Snapshot) -> Result<()> {
        match self {
            Self::RegisterUser(user) => upsert(&mut snapshot.users, user, Placement::Back),
            Self::UpdateUser(user) => {
                let id = user.require_id()?;
                replace(&mut snapshot.users, &id, user);
                if let Some(node) = snapshot
                    .tree
                    .iter_mut()
                    .find(|node| node.refers_to("userId", &id))
                {
                    sync_tree_node(node, user);
                }
                Ok(())
            }
            Self::DeleteUser { id } => {
                snapshot.users.retain(|user| user.id().as_ref() != Some(id));
                snapshot.tree.retain(|node| !node.refers_to("userId", id));
                Ok(())
            }
            Self::AddPost(post) => upsert(&mut snapshot.posts, post, Placement::Front),
            Self::SetReaction {
                post_id,
                user_id,
                reaction,
                at,
            } => {
                modify(&mut snapshot.posts, post_id, |post| {
                    post.update_array("likes", |likes| {
                        set_reaction(likes, user_id, reaction.as_deref());
                    });
                    post.touch(*at);
                });
                Ok(())
            }
            Self::AddComment {
                post_id,
                comment,
                at,
            } => {
                modify(&mut snapshot.posts, post_id, |post| {
                    post.update_array("comments", |comments| push_unique(comments, comment));
                    post.touch(*at);
                });
                Ok(())
            }
            Self::SendMessage(message) => {
                upsert(&mut snapshot.messages, message, Placement::Back)
            }
            Self::AddGoal(goal) => upsert(&mut snapshot.goals, goal, Placement::Front),
            Self::UpdateGoal(goal) => {
                replace(&mut snapshot.goals, &goal.require_id()?, goal);
                Ok(())
            }
            Self::AddMeeting(meeting) => {
                upsert(&mut snapshot.meetings, meeting, Placement::Front)
            }
            Self::DeleteMeeting { id } => {
                snapshot
                    .meetings
                    .retain(|meeting| meeting.id().as_ref() != Some(id));
                Ok(())
            }
            Self::AddFamilyMember(member) => upsert(&mut snapshot.tree, member, Placement::Back),
            Self::UpdateMember(member) => {
                replace(&mut snapshot.tree, &member.require_id()?, member);
                Ok(())
            }
            Self::ConnectMembers {
                parent_id,
                child_id,
                at,
            } => {
                for node in &mut snapshot.tree {
                    let Some(id) = node.id() else { continue };
                    if &id == parent_id {
                        let child = child_id.to_value();
                        node.update_array("children", |children| {
                            if !children.contains(&child) {
                                children.push(child);
                            }
                        });
                        node.touch(*at);
                    } else if &id == child_id {
                        node.set("parent", parent_id.to_value());
                        node.touch(*at);
                    }
                }
                Ok(())
            }
            Self::TriggerEmergency(alert) => {
                upsert(&mut snapshot.emergencies, alert, Placement::Front)
            }
            Self::ResolveEmergency { id, resolved_at } => {
                modify(&mut snapshot.emergencies, id, |alert| {
                    alert.set("active", false);
                    alert.set("resolvedAt", *resolved_at);
                    alert.touch(*resolved_at);
                });
                Ok(())
            }
            Self::AddEmergencyChat { id, message, at } => {
                modify(&mut snapshot.emergencies, id, |alert| {
                    alert.update_array("chat", |chat| push_unique(chat, message));
                    alert.touch(*at);
                });
                Ok(())
            }
            Self::RespondToEmergency { id, responder, at } => {
                let responder_id = responder
                    .get("id")
                    .and_then(RecordId::from_value)
                    .ok_or_else(|| Error::InvalidInput("responder is missing an id".into()))?;
                modify(&mut snapshot.emergencies, id, |alert| {
                    alert.update_array("responders", |responders| {
                        match responders.iter().position(|existing| {
                            existing.get("id").and_then(RecordId::from_value).as_ref()
                                == Some(&responder_id)
                        }) {
                            Some(index) => responders[index] = responder.clone(),
                            None => responders.push(responder.clone()),
                        }
                    });
                    alert.touch(*at);
                });
                Ok(())
            }
        }
    }

    /// Encode as an outbox entry.
    pub fn to_entry(&self, id: i64, timestamp: i64) -> Result<OutboxEntry> {
        let mut value = serde_json::to_value(self)?;
        let payload = value
            .as_object_mut()
            .and_then(|object| object.remove("payload"))
            .unwrap_or(Value::Null);
        Ok(OutboxEntry {
            id,
            kind: self.kind().to_string(),
            payload,
            timestamp,
        })
    }

    /// Decode a queued entry. Fails for unknown tags and malformed payloads.
    pub fn from_entry(entry: &OutboxEntry) -> Result<Self> {
        Ok(serde_json::from_value(json!({
            "type": entry.kind,
            "payload": entry.payload,
        }))?)
    }
}

fn position(records: &[Record], id: &RecordId) -> Option<usize> {
    records
        .iter()
        .position(|record| record.id().as_ref() == Some(id))
}

/// Insert, or replace in place when the id already exists (replay after a crash).
fn upsert(records: &mut Vec<Record>, record: &Record, placement: Placement) -> Result<()> {
    let id = record.require_id()?;
    match (position(records, &id), placement) {
        (Some(index), _) => records[index] = record.clone(),
        (None, Placement::Front) => records.insert(0, record.clone()),
        (None, Placement::Back) => records.push(record.clone()),
    }
    Ok(())
}

fn replace(records: &mut [Record], id: &RecordId, record: &Record) {
    if let Some(index) = position(records, id) {
        records[index] = record.clone();
    }
}

fn modify(records: &mut [Record], id: &RecordId, f: impl FnOnce(&mut Record)) {
    if let Some(index) = position(records, id) {
        f(&mut records[index]);
    }
}

fn sync_tree_node(node: &mut Record, user: &Record) {
    for (user_field, node_field) in [("name", "name"), ("avatar", "img")] {
        match user.get(user_field) {
            Some(value) => node.set(node_field, value.clone()),
            None => {
                node.remove(node_field);
            }
        }
    }
    if let Some(at) = user.timestamp() {
        node.touch(at);
    }
}

/// Older clients stored likes as bare user id strings.
fn normalize_like(like: &Value) -> Value {
    match like {
        Value::String(user_id) => json!({"userId": user_id, "type": "like"}),
        other => other.clone(),
    }
}

fn set_reaction(likes: &mut Vec<Value>, user_id: &RecordId, reaction: Option<&str>) {
    let normalized: Vec<Value> = likes.iter().map(normalize_like).collect();
    *likes = normalized;

    let existing = likes.iter().position(|like| {
        like.get("userId").and_then(RecordId::from_value).as_ref() == Some(user_id)
    });

    match (existing, reaction) {
        (Some(index), Some(kind)) => likes[index] = reaction_value(user_id, kind),
        (None, Some(kind)) => likes.push(reaction_value(user_id, kind)),
        (Some(index), None) => {
            likes.remove(index);
        }
        (None, None) => {}
    }
}

fn reaction_value(user_id: &RecordId, kind: &str) -> Value {
    let mut like = Map::new();
    like.insert("userId".into(), user_id.to_value());
    like.insert("type".into(), Value::String(kind.to_string()));
    Value::Object(like)
}

/// Append unless an element with the same `id` (or an identical element) is present.
fn push_unique(items: &mut Vec<Value>, item: &Value) {
    let item_id = item.get("id").and_then(RecordId::from_value);
    let present = items.iter().any(|existing| match &item_id {
        Some(id) => existing.get("id").and_then(RecordId::from_value).as_ref() == Some(id),
        None => existing == item,
    });
    if !present {
        items.push(item.clone());
    }
}

/// Reaction a like button press resolves to: pressing the current reaction
/// clears it, anything else sets it.
pub fn toggled_reaction(post: &Record, user_id: &RecordId, pressed: &str) -> Option<String> {
    let current = post
        .get("likes")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .map(normalize_like)
        .find(|like| like.get("userId").and_then(RecordId::from_value).as_ref() == Some(user_id))
        .and_then(|like| like.get("type").and_then(Value::as_str).map(str::to_string));

    if current.as_deref() == Some(pressed) {
        None
    } else {
        Some(pressed.to_string())
    }
}
