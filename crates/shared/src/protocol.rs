use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{GameMessage, LineNumber, LogPort, ProtocolPayload},
    error::BridgeError,
};

/// Transport channel carrying every `{name, params}` envelope.
pub const EVENT_CHANNEL: &str = "owmods://events/invoke";
/// Transport channel carrying backend log records.
pub const LOG_CHANNEL: &str = "LOG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLineCountUpdatePayload {
    pub port: LogPort,
    pub line: LineNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsBehindPayload {
    pub port: LogPort,
    pub behind: bool,
}

/// A notification travelling over [`EVENT_CHANNEL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "params", rename_all = "camelCase")]
pub enum Event {
    LocalRefresh,
    RemoteRefresh,
    ModBusy,
    ConfigReload,
    GuiConfigReload(bool),
    OwmlConfigReload,
    GameStart(LogPort),
    LogUpdate(LogPort),
    LogLineCountUpdate(LogLineCountUpdatePayload),
    LogFatal(GameMessage),
    LogsBehind(LogsBehindPayload),
    ProtocolInvoke(ProtocolPayload),
    ProgressUpdate,
    ProgressBatchFinish(bool),
    DragEnter,
    DragLeave,
    OpenOwmlSetup,
    RequestReload(String),
    /// Never emitted; queries that only need to run once listen to it.
    None,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::LocalRefresh => EventKind::LocalRefresh,
            Self::RemoteRefresh => EventKind::RemoteRefresh,
            Self::ModBusy => EventKind::ModBusy,
            Self::ConfigReload => EventKind::ConfigReload,
            Self::GuiConfigReload(_) => EventKind::GuiConfigReload,
            Self::OwmlConfigReload => EventKind::OwmlConfigReload,
            Self::GameStart(_) => EventKind::GameStart,
            Self::LogUpdate(_) => EventKind::LogUpdate,
            Self::LogLineCountUpdate(_) => EventKind::LogLineCountUpdate,
            Self::LogFatal(_) => EventKind::LogFatal,
            Self::LogsBehind(_) => EventKind::LogsBehind,
            Self::ProtocolInvoke(_) => EventKind::ProtocolInvoke,
            Self::ProgressUpdate => EventKind::ProgressUpdate,
            Self::ProgressBatchFinish(_) => EventKind::ProgressBatchFinish,
            Self::DragEnter => EventKind::DragEnter,
            Self::DragLeave => EventKind::DragLeave,
            Self::OpenOwmlSetup => EventKind::OpenOwmlSetup,
            Self::RequestReload(_) => EventKind::RequestReload,
            Self::None => EventKind::None,
        }
    }

    pub fn to_envelope(&self) -> Result<Value, BridgeError> {
        serde_json::to_value(self).map_err(|err| BridgeError::Encode(err.to_string()))
    }

    pub fn from_envelope(envelope: Value) -> Result<Self, BridgeError> {
        serde_json::from_value(envelope).map_err(|err| BridgeError::Decode {
            command: EVENT_CHANNEL.to_string(),
            message: err.to_string(),
        })
    }
}

/// Subscription key: the `name` half of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    LocalRefresh,
    RemoteRefresh,
    ModBusy,
    ConfigReload,
    GuiConfigReload,
    OwmlConfigReload,
    GameStart,
    LogUpdate,
    LogLineCountUpdate,
    LogFatal,
    LogsBehind,
    ProtocolInvoke,
    ProgressUpdate,
    ProgressBatchFinish,
    DragEnter,
    DragLeave,
    OpenOwmlSetup,
    RequestReload,
    None,
}

impl EventKind {
    pub const ALL: &'static [EventKind] = &[
        Self::LocalRefresh,
        Self::RemoteRefresh,
        Self::ModBusy,
        Self::ConfigReload,
        Self::GuiConfigReload,
        Self::OwmlConfigReload,
        Self::GameStart,
        Self::LogUpdate,
        Self::LogLineCountUpdate,
        Self::LogFatal,
        Self::LogsBehind,
        Self::ProtocolInvoke,
        Self::ProgressUpdate,
        Self::ProgressBatchFinish,
        Self::DragEnter,
        Self::DragLeave,
        Self::OpenOwmlSetup,
        Self::RequestReload,
        Self::None,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalRefresh => "localRefresh",
            Self::RemoteRefresh => "remoteRefresh",
            Self::ModBusy => "modBusy",
            Self::ConfigReload => "configReload",
            Self::GuiConfigReload => "guiConfigReload",
            Self::OwmlConfigReload => "owmlConfigReload",
            Self::GameStart => "gameStart",
            Self::LogUpdate => "logUpdate",
            Self::LogLineCountUpdate => "logLineCountUpdate",
            Self::LogFatal => "logFatal",
            Self::LogsBehind => "logsBehind",
            Self::ProtocolInvoke => "protocolInvoke",
            Self::ProgressUpdate => "progressUpdate",
            Self::ProgressBatchFinish => "progressBatchFinish",
            Self::DragEnter => "dragEnter",
            Self::DragLeave => "dragLeave",
            Self::OpenOwmlSetup => "openOwmlSetup",
            Self::RequestReload => "requestReload",
            Self::None => "none",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = BridgeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == raw)
            .ok_or_else(|| BridgeError::UnknownEvent(raw.to_string()))
    }
}

/// Backend log record delivered on [`LOG_CHANNEL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub log_type: LogType,
    #[serde(default)]
    pub target: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogType {
    Debug,
    Info,
    Warning,
    Error,
}

/// Outcome half of a [`Frame::Reply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyResult {
    Ok(Value),
    Err(String),
}

/// One newline-delimited JSON message exchanged with a backend process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Frame {
    Invoke {
        id: u64,
        command: String,
        payload: Value,
    },
    Reply {
        id: u64,
        #[serde(flatten)]
        result: ReplyResult,
    },
    Event {
        channel: String,
        payload: Value,
    },
}

impl Frame {
    pub fn encode_line(&self) -> Result<String, BridgeError> {
        let mut line =
            serde_json::to_string(self).map_err(|err| BridgeError::Encode(err.to_string()))?;
        line.push('\n');
        Ok(line)
    }

    pub fn decode_line(line: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(line.trim_end()).map_err(|err| BridgeError::Decode {
            command: "frame".to_string(),
            message: err.to_string(),
        })
    }
}
