//! Commands that create or change family content.

use serde_json::{json, Value};

use kinsync_core::util::unix_millis_now;
use kinsync_core::{CollectionKind, Record, RecordId};

use crate::cli::{EmergencyCommands, GoalCommands, MeetingCommands, MemberCommands};
use crate::commands::common::{
    describe_dispatch, display_name, format_timestamp, join_text, resolve_id, resolve_record,
    Session,
};
use crate::config::CliContext;
use crate::error::CliError;

/// Attribution fields every authored record carries.
fn authored(user: &Record) -> Result<Record, CliError> {
    let mut record = Record::new();
    record.set("author", display_name(user));
    record.set("authorId", user.require_id()?.to_value());
    if let Some(avatar) = user.get("avatar") {
        record.set("avatar", avatar.clone());
    }
    Ok(record)
}

pub async fn run_post(
    content: &[String],
    image: Option<String>,
    feeling: Option<String>,
    context: &CliContext,
) -> Result<(), CliError> {
    let content = join_text(content, "Post content")?;
    let session = Session::open(context).await?;
    let user = session.require_user().await?;

    let mut post = authored(&user)?;
    post.set("content", content);
    post.set("image", image.map_or(Value::Null, Value::String));
    post.set("feeling", feeling.unwrap_or_default());
    post.set("likes", json!([]));
    post.set("comments", json!([]));

    let outcome = session.actions.add_post(post).await?;
    println!("{}", describe_dispatch("Post", outcome));
    session.finish().await
}

pub async fn run_message(to: &str, text: &[String], context: &CliContext) -> Result<(), CliError> {
    let text = join_text(text, "Message text")?;
    let session = Session::open(context).await?;
    let user = session.require_user().await?;
    let snapshot = session.actions.snapshot().await;
    let recipient = resolve_id(&snapshot, CollectionKind::Users, to)?;

    let mut message = Record::new();
    message.set("fromId", user.require_id()?.to_value());
    message.set("toId", recipient.to_value());
    message.set("text", text);

    let outcome = session.actions.send_message(message).await?;
    println!("{}", describe_dispatch("Message", outcome));
    session.finish().await
}

pub async fn run_goal(command: GoalCommands, context: &CliContext) -> Result<(), CliError> {
    let session = Session::open(context).await?;
    let user = session.require_user().await?;

    let outcome = match command {
        GoalCommands::Add { title, target } => {
            let mut goal = Record::new();
            goal.set("title", join_text(&title, "Goal title")?);
            goal.set("target", target);
            goal.set("progress", 0);
            goal.set("completed", false);
            goal.set("contributions", json!([]));
            goal.set("createdBy", user.require_id()?.to_value());
            session.actions.add_goal(goal).await?
        }
        GoalCommands::Contribute { id, amount } => {
            let snapshot = session.actions.snapshot().await;
            let mut goal = resolve_record(&snapshot, CollectionKind::Goals, &id)?;
            let progress = goal.get("progress").and_then(Value::as_f64).unwrap_or(0.0) + amount;
            let target = goal.get("target").and_then(Value::as_f64).unwrap_or(f64::MAX);
            goal.set("progress", progress);
            goal.set("completed", progress >= target);
            goal.update_array("contributions", |contributions| {
                contributions.push(json!({
                    "userId": user.id().map(|id| id.to_value()),
                    "amount": amount,
                    "time": unix_millis_now(),
                }));
            });
            session.actions.update_goal(goal).await?
        }
    };
    println!("{}", describe_dispatch("Goal", outcome));
    session.finish().await
}

pub async fn run_like(post_id: &str, reaction: &str, context: &CliContext) -> Result<(), CliError> {
    let session = Session::open(context).await?;
    let user = session.require_user().await?;
    let snapshot = session.actions.snapshot().await;
    let post_id = resolve_id(&snapshot, CollectionKind::Posts, post_id)?;

    let outcome = session
        .actions
        .like_post(post_id, user.require_id()?, reaction.trim())
        .await?;
    println!("{}", describe_dispatch("Reaction", outcome));
    session.finish().await
}

pub async fn run_comment(post_id: &str, text: &[String], context: &CliContext) -> Result<(), CliError> {
    let text = join_text(text, "Comment")?;
    let session = Session::open(context).await?;
    let user = session.require_user().await?;
    let snapshot = session.actions.snapshot().await;
    let post_id = resolve_id(&snapshot, CollectionKind::Posts, post_id)?;

    let outcome = session
        .actions
        .add_comment(post_id, json!({"user": display_name(&user), "text": text}))
        .await?;
    println!("{}", describe_dispatch("Comment", outcome));
    session.finish().await
}

pub async fn run_meeting(command: MeetingCommands, context: &CliContext) -> Result<(), CliError> {
    let session = Session::open(context).await?;
    let outcome = match command {
        MeetingCommands::List { json } => return list_meetings(&session, json).await,
        MeetingCommands::Add {
            title,
            date,
            kind,
            description,
        } => {
            let user = session.require_user().await?;
            let mut meeting = authored(&user)?;
            meeting.remove("avatar");
            meeting.set("title", join_text(&title, "Meeting title")?);
            meeting.set("date", date);
            meeting.set("type", kind);
            meeting.set("description", description.unwrap_or_default());
            session.actions.add_meeting(meeting).await?
        }
        MeetingCommands::Delete { id } => {
            let snapshot = session.actions.snapshot().await;
            let id = resolve_id(&snapshot, CollectionKind::Meetings, &id)?;
            session.actions.delete_meeting(id).await?
        }
    };
    println!("{}", describe_dispatch("Meeting", outcome));
    session.finish().await
}

async fn list_meetings(session: &Session, as_json: bool) -> Result<(), CliError> {
    session.finish().await?;
    let meetings = session.actions.snapshot().await.meetings;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&meetings)?);
        return Ok(());
    }
    if meetings.is_empty() {
        println!("No meetings scheduled.");
        return Ok(());
    }
    for meeting in &meetings {
        println!(
            "{}  {}  {} [{}]",
            meeting.id().map(|id| id.to_string()).unwrap_or_default(),
            meeting.get_str("date").unwrap_or("-"),
            meeting.get_str("title").unwrap_or("(untitled)"),
            meeting.get_str("type").unwrap_or("meeting"),
        );
    }
    Ok(())
}

pub async fn run_member(command: MemberCommands, context: &CliContext) -> Result<(), CliError> {
    let session = Session::open(context).await?;
    let outcome = match command {
        MemberCommands::Add {
            name,
            relation,
            user_id,
        } => {
            let snapshot = session.actions.snapshot().await;
            let mut member = Record::new();
            member.set("name", join_text(&name, "Member name")?);
            member.set("relation", relation.unwrap_or_default());
            if let Some(user_id) = user_id {
                let user = resolve_record(&snapshot, CollectionKind::Users, &user_id)?;
                member.set("userId", user.require_id()?.to_value());
                if let Some(avatar) = user.get("avatar") {
                    member.set("img", avatar.clone());
                }
            }
            session.actions.add_family_member(member).await?
        }
        MemberCommands::Update { id, name, relation } => {
            let snapshot = session.actions.snapshot().await;
            let mut member = resolve_record(&snapshot, CollectionKind::Tree, &id)?;
            if let Some(name) = name {
                member.set("name", name);
            }
            if let Some(relation) = relation {
                member.set("relation", relation);
            }
            session.actions.update_member(member).await?
        }
    };
    println!("{}", describe_dispatch("Family member", outcome));
    session.finish().await
}

pub async fn run_connect(parent: &str, child: &str, context: &CliContext) -> Result<(), CliError> {
    let session = Session::open(context).await?;
    let snapshot = session.actions.snapshot().await;
    let parent = resolve_id(&snapshot, CollectionKind::Tree, parent)?;
    let child = resolve_id(&snapshot, CollectionKind::Tree, child)?;

    let outcome = session.actions.connect_members(parent, child).await?;
    println!("{}", describe_dispatch("Connection", outcome));
    session.finish().await
}

pub async fn run_emergency(command: EmergencyCommands, context: &CliContext) -> Result<(), CliError> {
    let session = Session::open(context).await?;
    let user = session.require_user().await?;
    let now = unix_millis_now();
    let snapshot = session.actions.snapshot().await;
    let find = |raw: &str| -> Result<RecordId, CliError> {
        resolve_id(&snapshot, CollectionKind::Emergencies, raw)
    };

    let outcome = match command {
        EmergencyCommands::Trigger { kind, lat, lng } => {
            let mut alert = Record::new();
            alert.set("type", kind);
            alert.set("lat", lat.unwrap_or(0.0));
            alert.set("lng", lng.unwrap_or(0.0));
            alert.set("createdAt", now);
            alert.set("active", true);
            alert.set("raisedBy", user.require_id()?.to_value());
            alert.set("responders", json!([]));
            alert.set("chat", json!([]));
            let outcome = session.actions.trigger_emergency(alert).await?;
            println!("Emergency broadcast at {}", format_timestamp(now));
            outcome
        }
        EmergencyCommands::Resolve { id } => session.actions.resolve_emergency(find(&id)?).await?,
        EmergencyCommands::Chat { id, text } => {
            let text = join_text(&text, "Chat message")?;
            session
                .actions
                .add_emergency_chat(find(&id)?, json!({"sender": display_name(&user), "text": text}))
                .await?
        }
        EmergencyCommands::Respond { id, status } => {
            let responder = json!({
                "id": user.require_id()?.to_value(),
                "name": display_name(&user),
                "status": status,
                "time": now,
            });
            session.actions.respond_to_emergency(find(&id)?, responder).await?
        }
    };
    println!("{}", describe_dispatch("Emergency update", outcome));
    session.finish().await
}
