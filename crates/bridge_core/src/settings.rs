use std::{collections::HashSet, fs, path::Path, time::Duration};

use serde::Deserialize;
use shared::protocol::{EVENT_CHANNEL, LOG_CHANNEL};
use thiserror::Error;

use crate::query::RacePolicy;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub event_channel: String,
    pub log_channel: String,
    pub request_timeout_ms: u64,
    /// Commands whose failures are never shown to the user.
    pub quiet_commands: HashSet<String>,
    pub race_policy: RacePolicy,
    pub backend_program: Option<String>,
    pub backend_args: Vec<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            event_channel: EVENT_CHANNEL.into(),
            log_channel: LOG_CHANNEL.into(),
            request_timeout_ms: 30_000,
            quiet_commands: HashSet::new(),
            race_policy: RacePolicy::default(),
            backend_program: None,
            backend_args: Vec::new(),
        }
    }
}

impl BridgeSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn is_quiet(&self, command: &str) -> bool {
        self.quiet_commands.contains(command)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    event_channel: Option<String>,
    log_channel: Option<String>,
    request_timeout_ms: Option<u64>,
    quiet_commands: Option<Vec<String>>,
    race_policy: Option<RacePolicy>,
    backend_program: Option<String>,
    backend_args: Option<Vec<String>>,
}

/// Defaults, then the TOML file at `path` if it exists, then `BRIDGE__*`
/// environment variables.
pub fn load_settings(path: Option<&Path>) -> Result<BridgeSettings, SettingsError> {
    let mut settings = BridgeSettings::default();

    if let Some(path) = path {
        if path.exists() {
            let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
                path: path.display().to_string(),
                source,
            })?;
            let file = parse_settings_file(&raw).map_err(|source| SettingsError::Parse {
                path: path.display().to_string(),
                source,
            })?;
            apply_file(&mut settings, file);
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn parse_settings_file(raw: &str) -> Result<SettingsFile, toml::de::Error> {
    toml::from_str(raw)
}

fn apply_file(settings: &mut BridgeSettings, file: SettingsFile) {
    if let Some(v) = file.event_channel {
        settings.event_channel = v;
    }
    if let Some(v) = file.log_channel {
        settings.log_channel = v;
    }
    if let Some(v) = file.request_timeout_ms {
        settings.request_timeout_ms = v;
    }
    if let Some(v) = file.quiet_commands {
        settings.quiet_commands = v.into_iter().collect();
    }
    if let Some(v) = file.race_policy {
        settings.race_policy = v;
    }
    if let Some(v) = file.backend_program {
        settings.backend_program = Some(v);
    }
    if let Some(v) = file.backend_args {
        settings.backend_args = v;
    }
}

fn apply_env(settings: &mut BridgeSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("BRIDGE__EVENT_CHANNEL") {
        settings.event_channel = v;
    }
    if let Some(v) = var("BRIDGE__LOG_CHANNEL") {
        settings.log_channel = v;
    }
    if let Some(v) = var("BRIDGE__REQUEST_TIMEOUT_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_ms = parsed;
        }
    }
    if let Some(v) = var("BRIDGE__QUIET_COMMANDS") {
        settings.quiet_commands = v
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(v) = var("BRIDGE__RACE_POLICY") {
        if let Ok(policy) = v.parse::<RacePolicy>() {
            settings.race_policy = policy;
        }
    }
    if let Some(v) = var("BRIDGE__BACKEND_PROGRAM") {
        settings.backend_program = Some(v);
    }
    // Whitespace separated; use the settings file for arguments with spaces.
    if let Some(v) = var("BRIDGE__BACKEND_ARGS") {
        settings.backend_args = v.split_whitespace().map(str::to_string).collect();
    }
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
