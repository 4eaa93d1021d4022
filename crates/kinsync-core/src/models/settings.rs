//! Client settings model
//!
//! Settings are local preferences with no server representation; they are
//! stored next to the replica but never synced or queued.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Theme mode options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    /// Light theme
    #[default]
    Light,
    /// Dark theme
    Dark,
}

/// User preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Whether the periodic wisdom popup is shown
    #[serde(default = "default_wisdom_popup")]
    pub wisdom_popup: bool,
    /// Theme mode
    #[serde(default)]
    pub theme: ThemeMode,
    /// Keys written by UI versions this crate does not know about
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const fn default_wisdom_popup() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wisdom_popup: true,
            theme: ThemeMode::Light,
            extra: Map::new(),
        }
    }
}

impl Settings {
    /// Shallow-merge `patch` over the current settings (`{...current, ...patch}`).
    pub fn merged_with(&self, patch: &Map<String, Value>) -> Result<Self> {
        let mut current = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            current.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(current))
            .map_err(|error| Error::InvalidInput(format!("invalid settings patch: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert!(settings.wisdom_popup);
        assert_eq!(settings.theme, ThemeMode::Light);
    }

    #[test]
    fn patch_overrides_known_and_keeps_unknown_keys() {
        let patch = json!({"theme": "dark", "fontScale": 2});
        let merged = Settings::default()
            .merged_with(patch.as_object().unwrap())
            .unwrap();
        assert_eq!(merged.theme, ThemeMode::Dark);
        assert!(merged.wisdom_popup);
        assert_eq!(merged.extra.get("fontScale"), Some(&json!(2)));
    }

    #[test]
    fn invalid_patch_is_rejected() {
        let patch = json!({"theme": "sepia"});
        assert!(Settings::default()
            .merged_with(patch.as_object().unwrap())
            .is_err());
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let value = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(value, json!({"wisdomPopup": true, "theme": "light"}));
    }
}
