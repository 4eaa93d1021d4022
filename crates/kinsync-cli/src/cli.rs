use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "kinsync")]
#[command(about = "Family feed, messages and emergencies that keep working offline")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local replica database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to client config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Merge server base URL (overrides config and KINSYNC_SERVER_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub server: Option<String>,

    /// Do not contact the server after the command
    #[arg(long, global = true)]
    pub no_sync: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in by email, creating the account on first use
    Login {
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Display name for a new account
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_name = "URL")]
        avatar: Option<String>,
    },
    /// Sign out the current user
    Logout,
    /// Show the signed-in user
    Whoami {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Share a post on the family feed
    Post {
        /// Post content
        content: Vec<String>,
        #[arg(long, value_name = "URL")]
        image: Option<String>,
        #[arg(long)]
        feeling: Option<String>,
    },
    /// Send a direct message
    Message {
        /// Recipient user id
        #[arg(long, value_name = "USER_ID")]
        to: String,
        /// Message text
        text: Vec<String>,
    },
    /// Manage family goals
    Goal {
        #[command(subcommand)]
        command: GoalCommands,
    },
    /// React to a post; repeating the same reaction removes it
    Like {
        post_id: String,
        #[arg(long, default_value = "like")]
        reaction: String,
    },
    /// Comment on a post
    Comment {
        post_id: String,
        text: Vec<String>,
    },
    /// Manage meetings and events
    Meeting {
        #[command(subcommand)]
        command: MeetingCommands,
    },
    /// Manage the family tree
    Member {
        #[command(subcommand)]
        command: MemberCommands,
    },
    /// Link a child to a parent in the family tree
    Connect {
        parent_id: String,
        child_id: String,
    },
    /// Raise and follow emergencies
    Emergency {
        #[command(subcommand)]
        command: EmergencyCommands,
    },
    /// Show or change local settings
    Settings {
        #[command(subcommand)]
        command: Option<SettingsCommands>,
    },
    /// Inspect the offline queue
    Outbox {
        #[command(subcommand)]
        command: OutboxCommands,
    },
    /// Run one sync cycle with the merge server
    Sync,
    /// Show connectivity, queue and replica status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the foreground until Ctrl-C
    Daemon,
    /// List users seen within the presence window
    Online {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum GoalCommands {
    /// Start a new goal
    Add {
        title: Vec<String>,
        /// Amount needed to complete the goal
        #[arg(long, default_value = "100")]
        target: f64,
    },
    /// Add progress to a goal
    Contribute { id: String, amount: f64 },
}

#[derive(Subcommand)]
pub enum MeetingCommands {
    /// Schedule a meeting
    Add {
        title: Vec<String>,
        /// Date, e.g. 2026-12-24
        #[arg(long)]
        date: String,
        #[arg(long = "type", default_value = "meeting")]
        kind: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Cancel a meeting
    Delete { id: String },
    /// List upcoming meetings
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum MemberCommands {
    /// Add a person to the family tree
    Add {
        name: Vec<String>,
        #[arg(long)]
        relation: Option<String>,
        /// Link the node to a user account
        #[arg(long, value_name = "USER_ID")]
        user_id: Option<String>,
    },
    /// Change a family tree node
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        relation: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum EmergencyCommands {
    /// Broadcast an emergency to the family
    Trigger {
        #[arg(long = "type", default_value = "general")]
        kind: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        lng: Option<f64>,
    },
    /// Mark an emergency as resolved
    Resolve { id: String },
    /// Post to an emergency's chat
    Chat { id: String, text: Vec<String> },
    /// Tell the family how you are responding
    Respond {
        id: String,
        #[arg(long, default_value = "On my way")]
        status: String,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Print current settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set one key; the value is parsed as JSON when possible
    Set { key: String, value: String },
}

#[derive(Subcommand)]
pub enum OutboxCommands {
    /// List queued mutations
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay queued mutations now
    Drain,
}
