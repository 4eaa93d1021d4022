//! kinsync CLI - the family feed from the command line
//!
//! Every command works against the local replica first and syncs with the
//! merge server afterwards when it is reachable.

mod cli;
mod commands;
mod config;
mod error;


use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::commands::completions::run_completions;
use crate::commands::content::{
    run_comment, run_connect, run_emergency, run_goal, run_like, run_meeting, run_member,
    run_message, run_post,
};
use crate::commands::outbox::run_outbox;
use crate::commands::session::{run_login, run_logout, run_online, run_whoami};
use crate::commands::settings::run_settings;
use crate::commands::sync::{run_daemon, run_status, run_sync};
use crate::config::resolve_context;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::from_default_env();
    let filter = match "kinsync=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let context = resolve_context(cli.config.as_deref(), cli.server, cli.db_path, cli.no_sync)?;
    tracing::debug!(db = %context.db_path.display(), server = %context.config.server_url, "Resolved CLI context");

    match cli.command {
        Commands::Login {
            email,
            name,
            avatar,
        } => run_login(&email, name, avatar, &context).await,
        Commands::Logout => run_logout(&context).await,
        Commands::Whoami { json } => run_whoami(json, &context).await,
        Commands::Post {
            content,
            image,
            feeling,
        } => run_post(&content, image, feeling, &context).await,
        Commands::Message { to, text } => run_message(&to, &text, &context).await,
        Commands::Goal { command } => run_goal(command, &context).await,
        Commands::Like { post_id, reaction } => run_like(&post_id, &reaction, &context).await,
        Commands::Comment { post_id, text } => run_comment(&post_id, &text, &context).await,
        Commands::Meeting { command } => run_meeting(command, &context).await,
        Commands::Member { command } => run_member(command, &context).await,
        Commands::Connect {
            parent_id,
            child_id,
        } => run_connect(&parent_id, &child_id, &context).await,
        Commands::Emergency { command } => run_emergency(command, &context).await,
        Commands::Settings { command } => run_settings(command, &context).await,
        Commands::Outbox { command } => run_outbox(command, &context).await,
        Commands::Sync => run_sync(&context).await,
        Commands::Status { json } => run_status(json, &context).await,
        Commands::Daemon => run_daemon(&context).await,
        Commands::Online { json } => run_online(json, &context).await,
        Commands::Completions { shell, output } => run_completions(shell, output.as_deref()),
    }
}
