//! Mod-manager records exchanged with the backend.
//!
//! These mirror the backend's serialized shapes (camelCase keys) and are only
//! ever decoded, displayed, and sent back; no mod logic lives here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident, $inner:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub $inner);
    };
}

id_newtype!(LogPort, u16);
id_newtype!(LineNumber, u32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub owml_path: String,
    #[serde(default)]
    pub wine_prefix: Option<String>,
    pub database_url: String,
    pub alert_url: String,
    #[serde(default)]
    pub viewed_alerts: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owml_path: String::new(),
            wine_prefix: None,
            database_url: "https://ow-mods.github.io/ow-mod-db/database.json".into(),
            alert_url: "https://raw.githubusercontent.com/ow-mods/ow-mod-db/source/alert.json"
                .into(),
            viewed_alerts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Theme {
    #[default]
    White,
    Blue,
    Green,
    Pink,
    Purple,
    Yellow,
    Orange,
    Blurple,
    GhostlyGreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    English,
    Wario,
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuiConfig {
    #[serde(default)]
    pub theme: Theme,
    #[serde(default)]
    pub rainbow: bool,
    #[serde(default)]
    pub language: Language,
    #[serde(default = "default_true")]
    pub watch_fs: bool,
    #[serde(default)]
    pub no_warning: bool,
    #[serde(default)]
    pub log_multi_window: bool,
    #[serde(default)]
    pub auto_enable_deps: bool,
    #[serde(default)]
    pub no_log_server: bool,
}

impl Default for GuiConfig {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            rainbow: false,
            language: Language::default(),
            watch_fs: true,
            no_warning: false,
            log_multi_window: false,
            auto_enable_deps: false,
            no_log_server: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwmlConfig {
    pub game_path: String,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub force_exe: bool,
    /// OWML spells this key `incrementalGC`.
    #[serde(rename = "incrementalGC", default = "default_true")]
    pub incremental_gc: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owml_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prepatched_mods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModWarning {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModManifest {
    pub unique_name: String,
    pub name: String,
    pub author: String,
    pub version: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub owml_version: Option<String>,
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub conflicts: Option<Vec<String>>,
    #[serde(default)]
    pub paths_to_preserve: Option<Vec<String>>,
    #[serde(default)]
    pub warning: Option<ModWarning>,
    #[serde(default)]
    pub patcher: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "errorType", content = "payload")]
pub enum ModValidationError {
    MissingDLL(Option<String>),
    DisabledDep(String),
    ConflictingMod(String),
    InvalidManifest(String),
    MissingDep(String),
    DuplicateMod(String),
    Outdated(String),
    MismatchedOWMLVersion(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMod {
    pub enabled: bool,
    #[serde(default)]
    pub errors: Vec<ModValidationError>,
    pub mod_path: String,
    pub manifest: ModManifest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMod {
    pub error: ModValidationError,
    pub mod_path: String,
    pub display_path: String,
}

/// A local mod record that may have failed to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "loadState", content = "mod", rename_all = "camelCase")]
pub enum UnsafeLocalMod {
    Valid(Box<LocalMod>),
    Invalid(FailedMod),
}

impl UnsafeLocalMod {
    pub fn unique_name(&self) -> Option<&str> {
        match self {
            Self::Valid(local) => Some(&local.manifest.unique_name),
            Self::Invalid(_) => None,
        }
    }

    pub fn errors(&self) -> Vec<&ModValidationError> {
        match self {
            Self::Valid(local) => local.errors.iter().collect(),
            Self::Invalid(failed) => vec![&failed.error],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModReadMe {
    pub html_url: String,
    pub download_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModPrerelease {
    pub download_url: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMod {
    pub download_url: String,
    pub download_count: u32,
    pub version: String,
    pub name: String,
    pub unique_name: String,
    pub description: String,
    #[serde(default)]
    pub readme: Option<ModReadMe>,
    #[serde(default)]
    pub slug: String,
    pub repo: String,
    pub author: String,
    #[serde(default)]
    pub author_display: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub prerelease: Option<ModPrerelease>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Alert {
    pub enabled: bool,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressType {
    Definite,
    Indefinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressAction {
    Download,
    Extract,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressBar {
    pub id: String,
    #[serde(default)]
    pub unique_name: Option<String>,
    pub message: String,
    pub progress: u32,
    pub progress_type: ProgressType,
    pub progress_action: ProgressAction,
    pub len: u32,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub position: u32,
}

impl ProgressBar {
    pub fn is_finished(&self) -> bool {
        self.success.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressBars {
    pub bars: HashMap<String, ProgressBar>,
}

impl ProgressBars {
    /// Bars ordered with the most recently started first.
    pub fn ordered(&self) -> Vec<&ProgressBar> {
        let mut bars: Vec<&ProgressBar> = self.bars.values().collect();
        bars.sort_by(|a, b| b.position.cmp(&a.position));
        bars
    }

    pub fn in_progress(&self) -> usize {
        self.bars.values().filter(|bar| !bar.is_finished()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum SocketMessageType {
    Message,
    Error,
    Warning,
    Info,
    Success,
    Quit,
    Fatal,
    Debug,
}

impl From<u8> for SocketMessageType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Error,
            2 => Self::Warning,
            3 => Self::Info,
            4 => Self::Success,
            5 => Self::Quit,
            6 => Self::Fatal,
            7 => Self::Debug,
            _ => Self::Message,
        }
    }
}

impl From<SocketMessageType> for u8 {
    fn from(value: SocketMessageType) -> Self {
        match value {
            SocketMessageType::Message => 0,
            SocketMessageType::Error => 1,
            SocketMessageType::Warning => 2,
            SocketMessageType::Info => 3,
            SocketMessageType::Success => 4,
            SocketMessageType::Quit => 5,
            SocketMessageType::Fatal => 6,
            SocketMessageType::Debug => 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketMessage {
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_type: Option<String>,
    pub message: String,
    #[serde(alias = "type")]
    pub message_type: SocketMessageType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMessage {
    pub port: LogPort,
    pub message: SocketMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProtocolInstallType {
    InstallMod,
    #[serde(rename = "installURL")]
    InstallUrl,
    InstallPreRelease,
    InstallZip,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolPayload {
    pub install_type: ProtocolInstallType,
    pub payload: String,
}
