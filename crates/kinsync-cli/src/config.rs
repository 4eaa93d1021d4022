//! Where the CLI keeps its config file and replica, and how flags layer over them.

use std::path::{Path, PathBuf};

use kinsync_core::ClientConfig;

use crate::error::CliError;

const APP_DIR: &str = "kinsync";
const CONFIG_FILE_NAME: &str = "config.json";
const DB_FILE_NAME: &str = "replica.db";

/// Everything a command needs to open the local replica and reach the server.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub config: ClientConfig,
    pub db_path: PathBuf,
    pub sync_after: bool,
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE_NAME))
        .ok_or(CliError::NoPlatformDir("config"))
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR).join(DB_FILE_NAME))
        .ok_or(CliError::NoPlatformDir("data"))
}

/// Precedence: command-line flag, then environment, then config file, then defaults.
pub fn resolve_context(
    config_path: Option<&Path>,
    server: Option<String>,
    db_path: Option<PathBuf>,
    no_sync: bool,
) -> Result<CliContext, CliError> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    let mut config = ClientConfig::load_from_path(&config_path)?.with_env_overrides()?;
    if let Some(server) = server {
        config.server_url = server;
        config = config.validated()?;
    }

    let db_path = match db_path.or_else(|| config.db_path.clone()) {
        Some(path) => path,
        None => default_db_path()?,
    };

    Ok(CliContext {
        config,
        db_path,
        sync_after: !no_sync,
    })
}
