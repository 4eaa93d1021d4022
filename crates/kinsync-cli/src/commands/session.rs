use serde_json::json;

use kinsync_core::util::unix_millis_now;
use kinsync_core::{CollectionKind, Record};

use crate::commands::common::{display_name, format_relative_time, Session};
use crate::config::CliContext;
use crate::error::CliError;

pub async fn run_login(
    email: &str,
    name: Option<String>,
    avatar: Option<String>,
    context: &CliContext,
) -> Result<(), CliError> {
    let session = Session::open(context).await?;
    // Pull the family first so an existing account is found instead of duplicated.
    session.finish().await?;

    let mut profile = Record::new();
    profile.set("email", email);
    if let Some(name) = name {
        profile.set("name", name);
    }
    if let Some(avatar) = avatar {
        profile.set("avatar", avatar);
    }

    let user = session.actions.login(profile).await?;
    println!(
        "Signed in as {} ({})",
        display_name(&user),
        user.get_str("role").unwrap_or("member")
    );
    session.finish().await
}

pub async fn run_logout(context: &CliContext) -> Result<(), CliError> {
    let session = Session::open(context).await?;
    let user = session.require_user().await?;
    session.actions.logout(&user.require_id()?).await?;
    println!("Signed out {}", display_name(&user));
    session.finish().await
}

pub async fn run_whoami(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let session = Session::open_offline(context).await?;
    let user = session.require_user().await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        println!(
            "{} <{}> {}",
            display_name(&user),
            user.get_str("email").unwrap_or_default(),
            user.get_str("role").unwrap_or("member")
        );
    }
    Ok(())
}

pub async fn run_online(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let session = Session::open(context).await?;
    session.coordinator().heartbeat().await?;
    session.finish().await?;

    let now = unix_millis_now();
    let online = session.actions.online_users(now).await;
    let snapshot = session.actions.snapshot().await;
    let presence = session.coordinator().replica().presence().await;

    let rows: Vec<_> = online
        .iter()
        .map(|user_id| {
            let name = snapshot
                .collection(CollectionKind::Users)
                .iter()
                .find(|user| user.id().is_some_and(|id| id.to_string() == *user_id))
                .map_or_else(|| user_id.clone(), display_name);
            (user_id, name, presence.last_seen(user_id).unwrap_or(now))
        })
        .collect();

    if as_json {
        let items: Vec<_> = rows
            .iter()
            .map(|(id, name, seen)| json!({"id": id, "name": name, "lastSeen": seen}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("Nobody is online.");
        return Ok(());
    }
    for (id, name, seen) in rows {
        println!("{name} ({id}) - {}", format_relative_time(seen, now));
    }
    Ok(())
}
