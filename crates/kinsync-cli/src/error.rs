use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] kinsync_core::Error),
    #[error(transparent)]
    Config(#[from] kinsync_core::config::ConfigError),
    #[error(transparent)]
    Remote(#[from] kinsync_core::sync::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("{0} cannot be empty")]
    EmptyInput(&'static str),
    #[error("No {kind} found with id {id}")]
    RecordNotFound { kind: &'static str, id: String },
    #[error("Not signed in. Run `kinsync login --email <EMAIL>` first.")]
    NotSignedIn,
    #[error("Failed to resolve the {0} directory for this platform")]
    NoPlatformDir(&'static str),
}
