use serde_json::Map;

use crate::cli::SettingsCommands;
use crate::commands::common::{parse_setting_value, Session};
use crate::config::CliContext;
use crate::error::CliError;

/// Settings live only in the local replica and never go through the queue.
pub async fn run_settings(
    command: Option<SettingsCommands>,
    context: &CliContext,
) -> Result<(), CliError> {
    let session = Session::open_offline(context).await?;
    match command.unwrap_or(SettingsCommands::Show { json: false }) {
        SettingsCommands::Show { json } => {
            let settings = session.actions.settings().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                let value = serde_json::to_value(&settings)?;
                for (key, value) in value.as_object().into_iter().flatten() {
                    println!("{key} = {value}");
                }
            }
        }
        SettingsCommands::Set { key, value } => {
            let key = key.trim().to_string();
            if key.is_empty() {
                return Err(CliError::EmptyInput("Setting key"));
            }
            let mut patch = Map::new();
            patch.insert(key.clone(), parse_setting_value(&value));
            let settings = session.actions.update_settings(&patch).await?;
            let current = serde_json::to_value(&settings)?;
            println!(
                "{key} = {}",
                current.get(&key).cloned().unwrap_or_default()
            );
        }
    }
    Ok(())
}
