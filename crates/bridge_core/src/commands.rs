//! The closed table of backend commands.
//!
//! Every command is a zero-sized marker implementing [`Command`], which ties
//! its wire name to a request and response type. [`CommandName`] enumerates
//! the whole table.

use std::{fmt, str::FromStr};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::{
    domain::{
        Alert, Config, GameMessage, GuiConfig, LineNumber, LogPort, OwmlConfig, ProgressBars,
        RemoteMod, SocketMessageType, UnsafeLocalMod,
    },
    error::BridgeError,
};

pub trait Command: 'static {
    const NAME: CommandName;
    /// Failures of a quiet command are never shown to the user.
    const QUIET: bool = false;
    type Request: Serialize + Clone + PartialEq + Send + Sync + 'static;
    type Response: DeserializeOwned + Send + Sync + 'static;
}

/// Request of commands that take no arguments; serializes as `{}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterPayload {
    pub filter: String,
}

impl FilterPayload {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModPayload {
    pub unique_name: String,
}

impl ModPayload {
    pub fn new(unique_name: impl Into<String>) -> Self {
        Self {
            unique_name: unique_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleModPayload {
    pub unique_name: String,
    pub enabled: bool,
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleAllPayload {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModPathPayload {
    pub mod_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallModPayload {
    pub unique_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPayload {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPayload {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveConfigPayload {
    pub config: Config,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveGuiConfigPayload {
    pub gui_config: GuiConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOwmlConfigPayload {
    pub owml_config: OwmlConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniqueNamesPayload {
    pub unique_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPayload {
    pub port: LogPort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLinePayload {
    pub port: LogPort,
    pub line: LineNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLinesPayload {
    pub port: LogPort,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_type: Option<SocketMessageType>,
    pub search: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogErrorPayload {
    pub err: String,
}

macro_rules! commands {
    (@quiet) => {
        false
    };
    (@quiet $quiet:literal) => {
        $quiet
    };
    ($($marker:ident => $name:literal, $request:ty => $response:ty $(, quiet = $quiet:literal)?;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum CommandName {
            $($marker,)*
        }

        impl CommandName {
            pub const ALL: &'static [CommandName] = &[$(CommandName::$marker,)*];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(CommandName::$marker => $name,)*
                }
            }

            pub fn is_quiet(self) -> bool {
                match self {
                    $(CommandName::$marker => <$marker as Command>::QUIET,)*
                }
            }
        }

        $(
            #[derive(Debug, Clone, Copy, Default)]
            pub struct $marker;

            impl Command for $marker {
                const NAME: CommandName = CommandName::$marker;
                const QUIET: bool = commands!(@quiet $($quiet)?);
                type Request = $request;
                type Response = $response;
            }
        )*
    };
}

commands! {
    InitialSetup => "initial_setup", Empty => ();
    RefreshLocalDb => "refresh_local_db", Empty => ();
    RefreshRemoteDb => "refresh_remote_db", Empty => ();
    GetConfig => "get_config", Empty => Config;
    GetGuiConfig => "get_gui_config", Empty => GuiConfig;
    GetOwmlConfig => "get_owml_config", Empty => OwmlConfig;
    GetDefaultConfigs => "get_defaults", Empty => (Config, GuiConfig, OwmlConfig);
    GetLocalMods => "get_local_mods", FilterPayload => Vec<String>;
    GetRemoteMods => "get_remote_mods", FilterPayload => Vec<String>;
    GetUpdatableMods => "get_updatable_mods", FilterPayload => Vec<String>;
    GetLocalMod => "get_local_mod", ModPayload => Option<UnsafeLocalMod>;
    GetRemoteMod => "get_remote_mod", ModPayload => Option<RemoteMod>;
    GetLogLine => "get_game_message", LogLinePayload => GameMessage, quiet = true;
    ToggleMod => "toggle_mod", ToggleModPayload => Vec<String>;
    ToggleAll => "toggle_all", ToggleAllPayload => Vec<String>;
    OpenModFolder => "open_mod_folder", ModPayload => ();
    OpenModReadme => "open_mod_readme", ModPayload => ();
    UninstallMod => "uninstall_mod", ModPayload => Vec<String>;
    UninstallBrokenMod => "uninstall_broken_mod", ModPathPayload => ();
    InstallMod => "install_mod", InstallModPayload => ();
    InstallUrl => "install_url", UrlPayload => ();
    InstallZip => "install_zip", PathPayload => ();
    InstallOwml => "install_owml", Empty => ();
    SetOwml => "set_owml", PathPayload => bool;
    SaveConfig => "save_config", SaveConfigPayload => ();
    SaveGuiConfig => "save_gui_config", SaveGuiConfigPayload => ();
    SaveOwmlConfig => "save_owml_config", SaveOwmlConfigPayload => ();
    UpdateMod => "update_mod", ModPayload => ();
    UpdateAll => "update_all_mods", UniqueNamesPayload => ();
    LogsAreActive => "active_log", PortPayload => bool, quiet = true;
    StartLogs => "start_logs", Empty => ();
    RunGame => "run_game", Empty => ();
    ClearLogs => "clear_logs", PortPayload => ();
    GetLogLines => "get_log_lines", LogLinesPayload => Vec<(u32, u32)>, quiet = true;
    ExportMods => "export_mods", PathPayload => ();
    ImportMods => "import_mods", PathPayload => ();
    FixDeps => "fix_mod_deps", ModPayload => ();
    CheckDbForIssues => "db_has_issues", Empty => bool;
    GetAlert => "get_alert", Empty => Alert, quiet = true;
    GetWatcherPaths => "get_watcher_paths", Empty => Vec<String>;
    PopProtocolUrl => "pop_protocol_url", Empty => ();
    CheckOwml => "check_owml", Empty => bool;
    GetDownloads => "get_downloads", Empty => ProgressBars, quiet = true;
    ClearDownloads => "clear_downloads", Empty => ();
    GetModBusy => "get_mod_busy", ModPayload => bool, quiet = true;
    HasDisabledDeps => "has_disabled_deps", ModPayload => bool;
    LogError => "log_error", LogErrorPayload => (), quiet = true;
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandName {
    type Err = BridgeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == raw)
            .ok_or_else(|| BridgeError::UnknownCommand(raw.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
