//! Action API consumed by user interfaces.
//!
//! Each collection-affecting action fills in ids and timestamps, builds a
//! [`Mutation`] and hands it to the coordinator, which applies it or defers it
//! to the outbox. Session, presence and settings changes are local-only and are
//! never queued.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::models::{CollectionKind, Record, RecordId, Settings, Snapshot};
use crate::mutation::{toggled_reaction, Mutation};
use crate::services::LocalReplica;
use crate::sync::{DispatchOutcome, RemoteAuthority, SyncCoordinator};
use crate::util::{new_record_id, normalize_text_option, unix_millis_now};

/// Role granted to an account when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    /// The first account of a family administers it.
    pub const fn for_new_account(existing_users: usize) -> Self {
        if existing_users == 0 {
            Self::Admin
        } else {
            Self::Member
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

pub struct Actions<R> {
    coordinator: Arc<SyncCoordinator<R>>,
}

impl<R> Clone for Actions<R> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<R: RemoteAuthority> Actions<R> {
    pub const fn new(coordinator: Arc<SyncCoordinator<R>>) -> Self {
        Self { coordinator }
    }

    pub const fn coordinator(&self) -> &Arc<SyncCoordinator<R>> {
        &self.coordinator
    }

    fn replica(&self) -> &LocalReplica {
        self.coordinator.replica()
    }

    async fn dispatch(&self, mutation: Mutation) -> Result<DispatchOutcome> {
        self.coordinator.dispatch(mutation).await
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.replica().read().await
    }

    // Session

    /// Sign in by email, creating the account on first use.
    ///
    /// The role is decided once, when the account is created.
    pub async fn login(&self, profile: Record) -> Result<Record> {
        let email = normalize_text_option(profile.get_str("email").map(str::to_string))
            .ok_or_else(|| Error::InvalidInput("email is required to sign in".into()))?;
        let now = unix_millis_now();

        let users = self.replica().read_collection(CollectionKind::Users).await;
        let user = if let Some(existing) = users
            .iter()
            .find(|user| user.get_str("email").map(str::trim) == Some(email.as_str()))
        {
            existing.clone()
        } else {
            let user = new_account(profile, &email, Role::for_new_account(users.len()), now);
            // Registration is part of signing in, so it is never deferred.
            self.replica()
                .apply_mutation(&Mutation::RegisterUser(user.clone()))
                .await?;
            tracing::info!(user = ?user.id(), role = user.get_str("role"), "Registered new account");
            user
        };

        let user_id = user.require_id()?;
        self.replica()
            .update_presence(|presence| presence.heartbeat(user_id.to_string(), now))
            .await?;
        self.replica().set_current_user(Some(&user)).await?;
        Ok(user)
    }

    /// Sign out locally. The sign-out is kept in the presence map so the next
    /// sync tells the server and other clients instead of being undone by them.
    pub async fn logout(&self, user_id: &RecordId) -> Result<()> {
        let now = unix_millis_now();
        self.replica()
            .update_presence(|presence| presence.sign_out(user_id.to_string(), now))
            .await?;
        self.replica().set_current_user(None).await
    }

    pub async fn current_user(&self) -> Option<Record> {
        self.replica().current_user().await
    }

    pub async fn update_heartbeat(&self, user_id: &RecordId) -> Result<()> {
        let now = unix_millis_now();
        self.replica()
            .update_presence(|presence| presence.heartbeat(user_id.to_string(), now))
            .await?;
        Ok(())
    }

    /// Users whose heartbeat is within the presence TTL at `now`.
    pub async fn online_users(&self, now: i64) -> Vec<String> {
        self.replica()
            .presence()
            .await
            .online_users(now, self.coordinator.config().presence_ttl())
    }

    // Users

    pub async fn update_user(&self, mut user: Record) -> Result<DispatchOutcome> {
        let id = user.require_id()?;
        user.touch(unix_millis_now());
        let outcome = self.dispatch(Mutation::UpdateUser(user.clone())).await?;

        let is_current = self
            .current_user()
            .await
            .and_then(|current| current.id())
            .is_some_and(|current| current == id);
        if is_current {
            self.replica().set_current_user(Some(&user)).await?;
        }
        Ok(outcome)
    }

    pub async fn delete_user(&self, id: RecordId) -> Result<DispatchOutcome> {
        let key = id.to_string();
        let outcome = self.dispatch(Mutation::DeleteUser { id }).await?;
        let now = unix_millis_now();
        self.replica()
            .update_presence(|presence| presence.sign_out(key, now))
            .await?;
        Ok(outcome)
    }

    // Posts

    pub async fn add_post(&self, post: Record) -> Result<DispatchOutcome> {
        let post = stamp_new(post, "p", unix_millis_now());
        self.dispatch(Mutation::AddPost(post)).await
    }

    /// Press a reaction button: the same reaction again removes it, a
    /// different one replaces it.
    pub async fn like_post(
        &self,
        post_id: RecordId,
        user_id: RecordId,
        reaction: &str,
    ) -> Result<DispatchOutcome> {
        let snapshot = self.replica().read().await;
        let post = snapshot
            .find(CollectionKind::Posts, &post_id)
            .ok_or_else(|| Error::NotFound(format!("post {post_id}")))?;
        let reaction = toggled_reaction(post, &user_id, reaction);
        self.dispatch(Mutation::SetReaction {
            post_id,
            user_id,
            reaction,
            at: unix_millis_now(),
        })
        .await
    }

    pub async fn add_comment(&self, post_id: RecordId, comment: Value) -> Result<DispatchOutcome> {
        let now = unix_millis_now();
        self.dispatch(Mutation::AddComment {
            post_id,
            comment: with_element_id(comment, "c", now)?,
            at: now,
        })
        .await
    }

    // Messages

    pub async fn send_message(&self, message: Record) -> Result<DispatchOutcome> {
        let message = stamp_new(message, "m", unix_millis_now());
        self.dispatch(Mutation::SendMessage(message)).await
    }

    // Goals

    pub async fn add_goal(&self, goal: Record) -> Result<DispatchOutcome> {
        let goal = stamp_new(goal, "g", unix_millis_now());
        self.dispatch(Mutation::AddGoal(goal)).await
    }

    pub async fn update_goal(&self, mut goal: Record) -> Result<DispatchOutcome> {
        goal.require_id()?;
        goal.touch(unix_millis_now());
        self.dispatch(Mutation::UpdateGoal(goal)).await
    }

    // Meetings

    pub async fn add_meeting(&self, meeting: Record) -> Result<DispatchOutcome> {
        let meeting = stamp_new(meeting, "mt", unix_millis_now());
        self.dispatch(Mutation::AddMeeting(meeting)).await
    }

    pub async fn delete_meeting(&self, id: RecordId) -> Result<DispatchOutcome> {
        self.dispatch(Mutation::DeleteMeeting { id }).await
    }

    // Family tree

    pub async fn add_family_member(&self, member: Record) -> Result<DispatchOutcome> {
        let mut member = stamp_new(member, "t", unix_millis_now());
        if member.get("children").is_none() {
            member.set("children", json!([]));
        }
        self.dispatch(Mutation::AddFamilyMember(member)).await
    }

    pub async fn update_member(&self, mut member: Record) -> Result<DispatchOutcome> {
        member.require_id()?;
        member.touch(unix_millis_now());
        self.dispatch(Mutation::UpdateMember(member)).await
    }

    pub async fn connect_members(
        &self,
        parent_id: RecordId,
        child_id: RecordId,
    ) -> Result<DispatchOutcome> {
        if parent_id == child_id {
            return Err(Error::InvalidInput(
                "a member cannot be their own parent".into(),
            ));
        }
        self.dispatch(Mutation::ConnectMembers {
            parent_id,
            child_id,
            at: unix_millis_now(),
        })
        .await
    }

    // Emergencies

    pub async fn trigger_emergency(&self, alert: Record) -> Result<DispatchOutcome> {
        let mut alert = stamp_new(alert, "e", unix_millis_now());
        if alert.get("active").is_none() {
            alert.set("active", true);
        }
        self.dispatch(Mutation::TriggerEmergency(alert)).await
    }

    pub async fn resolve_emergency(&self, id: RecordId) -> Result<DispatchOutcome> {
        self.dispatch(Mutation::ResolveEmergency {
            id,
            resolved_at: unix_millis_now(),
        })
        .await
    }

    pub async fn add_emergency_chat(&self, id: RecordId, message: Value) -> Result<DispatchOutcome> {
        let now = unix_millis_now();
        self.dispatch(Mutation::AddEmergencyChat {
            id,
            message: with_element_id(message, "ec", now)?,
            at: now,
        })
        .await
    }

    /// `responder` is `{id, name, status, time}`; a second response from the
    /// same responder replaces the first.
    pub async fn respond_to_emergency(
        &self,
        id: RecordId,
        responder: Value,
    ) -> Result<DispatchOutcome> {
        if responder.get("id").and_then(RecordId::from_value).is_none() {
            return Err(Error::InvalidInput("responder is missing an id".into()));
        }
        self.dispatch(Mutation::RespondToEmergency {
            id,
            responder,
            at: unix_millis_now(),
        })
        .await
    }

    // Settings

    pub async fn settings(&self) -> Settings {
        self.replica().settings().await
    }

    pub async fn update_settings(&self, patch: &Map<String, Value>) -> Result<Settings> {
        self.replica().update_settings(patch).await
    }
}

/// Give a new record an id and creation timestamp unless it already has them.
fn stamp_new(mut record: Record, prefix: &str, now: i64) -> Record {
    if record.id().is_none() {
        record.set("id", new_record_id(prefix));
    }
    if record.conflict_time().is_none() {
        record.set("timestamp", now);
    }
    record
}

/// Comments and chat lines are de-duplicated by id on replay, so they need one.
fn with_element_id(value: Value, prefix: &str, now: i64) -> Result<Value> {
    let Value::Object(mut object) = value else {
        return Err(Error::InvalidInput("expected a JSON object".into()));
    };
    object
        .entry("id")
        .or_insert_with(|| Value::String(new_record_id(prefix)));
    object.entry("time").or_insert_with(|| Value::from(now));
    Ok(Value::Object(object))
}

fn new_account(profile: Record, email: &str, role: Role, now: i64) -> Record {
    let mut user = profile;
    user.set("email", email);
    if user.id().is_none() {
        user.set("id", new_record_id("u"));
    }
    let defaults = [
        ("birthday", json!("")),
        ("address", json!("")),
        ("contact", json!("")),
        ("children", json!([])),
        ("bio", json!("")),
        (
            "medical",
            json!({"bloodType": "", "allergies": "", "conditions": "", "notes": ""}),
        ),
        ("photos", json!([])),
    ];
    for (key, value) in defaults {
        if user.get(key).is_none() {
            user.set(key, value);
        }
    }
    user.set("isOnline", true);
    user.set("role", role.as_str());
    user.set("isAdmin", role == Role::Admin);
    user.set("timestamp", now);
    user
}
