use serde::Serialize;

use kinsync_core::sync::spawn_probe;

use crate::commands::common::{describe_cycle, display_name, format_timestamp, Session};
use crate::config::CliContext;
use crate::error::CliError;

pub async fn run_sync(context: &CliContext) -> Result<(), CliError> {
    let session = Session::open(context).await?;
    let outcome = session.sync_now().await?;
    println!("{}", describe_cycle(&outcome));
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub server_url: String,
    pub online: bool,
    pub db_path: String,
    pub signed_in_as: Option<String>,
    pub queued: usize,
    pub oldest_queued_at: Option<String>,
    pub records: usize,
    pub offline_queue: String,
}

pub async fn run_status(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let session = Session::open_offline(context).await?;
    let online = if context.sync_after {
        session.probe().await
    } else {
        false
    };
    let entries = session.coordinator().outbox().entries().await;

    let report = StatusReport {
        server_url: context.config.server_url.clone(),
        online,
        db_path: context.db_path.display().to_string(),
        signed_in_as: session.actions.current_user().await.map(|user| display_name(&user)),
        queued: entries.len(),
        oldest_queued_at: entries.first().map(|entry| format_timestamp(entry.timestamp)),
        records: session.actions.snapshot().await.record_count(),
        offline_queue: serde_json::to_value(context.config.offline_queue)?
            .as_str()
            .unwrap_or_default()
            .to_string(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Server:   {} ({})",
        report.server_url,
        if report.online { "online" } else { "offline" }
    );
    println!("Replica:  {} ({} records)", report.db_path, report.records);
    println!(
        "User:     {}",
        report.signed_in_as.as_deref().unwrap_or("not signed in")
    );
    match report.oldest_queued_at {
        Some(oldest) => println!("Queue:    {} pending since {oldest}", report.queued),
        None => println!("Queue:    empty"),
    }
    println!("Policy:   {}", report.offline_queue);
    Ok(())
}

/// Run the coordinator loop with a connectivity probe until Ctrl-C.
pub async fn run_daemon(context: &CliContext) -> Result<(), CliError> {
    let session = Session::open(context).await?;
    let coordinator = session.coordinator();
    let probe = spawn_probe(
        std::sync::Arc::clone(session.remote()),
        session.connectivity().clone(),
        context.config.sync_interval(),
    );
    let handle = coordinator.start();

    println!(
        "Syncing with {} every {}s. Press Ctrl-C to stop.",
        context.config.server_url, context.config.sync_interval_secs
    );
    tokio::signal::ctrl_c().await?;

    handle.stop().await;
    probe.abort();
    println!("Stopped.");
    Ok(())
}
