use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Backend,
    Protocol,
    Timeout,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("{command} failed: {message}")]
    Backend { command: String, message: String },
    #[error("failed to encode payload: {0}")]
    Encode(String),
    #[error("failed to decode response for {command}: {message}")]
    Decode { command: String, message: String },
    #[error("{command} timed out after {millis}ms")]
    Timeout { command: String, millis: u64 },
    #[error("backend connection closed")]
    Closed,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
}

impl BridgeError {
    pub fn backend(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::Encode(_)
            | Self::Decode { .. }
            | Self::UnknownCommand(_)
            | Self::UnknownEvent(_) => ErrorKind::Protocol,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Closed => ErrorKind::Closed,
        }
    }

    /// Message without the command prefix, as shown next to the command name.
    pub fn message(&self) -> String {
        match self {
            Self::Backend { message, .. } | Self::Decode { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Serializable form of a failure, as handed to presentation code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub kind: ErrorKind,
    pub command: String,
    pub message: String,
}

impl ErrorNotice {
    pub fn new(command: impl Into<String>, err: &BridgeError) -> Self {
        Self {
            kind: err.kind(),
            command: command.into(),
            message: err.message(),
        }
    }

    pub fn title(&self) -> String {
        format!("Error ({})", self.command)
    }
}
