use chrono::Utc;

use crate::cli::OutboxCommands;
use crate::commands::common::{format_relative_time, Session};
use crate::config::CliContext;
use crate::error::CliError;

pub async fn run_outbox(command: OutboxCommands, context: &CliContext) -> Result<(), CliError> {
    match command {
        OutboxCommands::List { json } => list_outbox(json, context).await,
        OutboxCommands::Drain => drain_outbox(context).await,
    }
}

async fn list_outbox(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let session = Session::open_offline(context).await?;
    let entries = session.coordinator().outbox().entries().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("Offline queue is empty.");
        return Ok(());
    }

    let now = Utc::now().timestamp_millis();
    for entry in &entries {
        println!(
            "{}  {:<20} {}",
            entry.id,
            entry.kind,
            format_relative_time(entry.timestamp, now)
        );
    }
    Ok(())
}

async fn drain_outbox(context: &CliContext) -> Result<(), CliError> {
    let session = Session::open(context).await?;
    if !session.connectivity().is_online() {
        println!("Server unreachable; queued changes stay until it is back.");
        return Ok(());
    }
    let report = session.coordinator().outbox().drain().await?;
    println!(
        "Applied {} queued change(s), dropped {}",
        report.applied, report.dropped
    );
    session.finish().await
}
