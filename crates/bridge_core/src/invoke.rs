//! Typed command invocation and the user-facing error display policy.

use std::{collections::HashSet, sync::Arc};

use serde_json::Value;
use shared::error::{BridgeError, ErrorNotice};
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::{
    commands::{Command, CommandName},
    transport::Transport,
};

/// Per-call choice of whether a failure reaches the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorDisplay {
    #[default]
    Show,
    /// The caller handles the error itself.
    Silent,
}

/// Receives failures that should be shown to the user.
pub trait ErrorNotifier: Send + Sync {
    fn notify(&self, notice: ErrorNotice);
}

/// Writes notices to the log; used when no UI is attached.
pub struct LogNotifier;

impl ErrorNotifier for LogNotifier {
    fn notify(&self, notice: ErrorNotice) {
        error!(command = %notice.command, kind = ?notice.kind, "{}", notice.message);
    }
}

/// Queues notices for a UI to pick up and render on its own schedule.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<ErrorNotice>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ErrorNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ErrorNotifier for ChannelNotifier {
    fn notify(&self, notice: ErrorNotice) {
        if self.tx.send(notice).is_err() {
            debug!("error notice dropped; nobody is listening");
        }
    }
}

#[derive(Clone)]
pub struct Invoker {
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn ErrorNotifier>,
    quiet_commands: Arc<HashSet<String>>,
}

impl Invoker {
    pub fn new(
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn ErrorNotifier>,
        quiet_commands: HashSet<String>,
    ) -> Self {
        Self {
            transport,
            notifier,
            quiet_commands: Arc::new(quiet_commands),
        }
    }

    pub async fn invoke<C: Command>(&self, payload: C::Request) -> Result<C::Response, BridgeError> {
        self.invoke_with::<C>(payload, ErrorDisplay::Show).await
    }

    /// Invoke with the request type's default, `{}` for argument-less commands.
    pub async fn invoke_default<C>(&self) -> Result<C::Response, BridgeError>
    where
        C: Command,
        C::Request: Default,
    {
        self.invoke::<C>(C::Request::default()).await
    }

    pub async fn invoke_with<C: Command>(
        &self,
        payload: C::Request,
        display: ErrorDisplay,
    ) -> Result<C::Response, BridgeError> {
        let command = C::NAME.as_str();
        let result = async {
            let payload =
                serde_json::to_value(&payload).map_err(|err| BridgeError::Encode(err.to_string()))?;
            let raw = self.transport.invoke(command, payload).await?;
            serde_json::from_value::<C::Response>(raw).map_err(|err| BridgeError::Decode {
                command: command.to_string(),
                message: err.to_string(),
            })
        }
        .await;

        if let Err(err) = &result {
            self.report(C::NAME, display, err);
        }
        result
    }

    /// Untyped invocation by name; a `null` payload is sent as `{}`.
    pub async fn invoke_raw(
        &self,
        name: CommandName,
        payload: Value,
        display: ErrorDisplay,
    ) -> Result<Value, BridgeError> {
        let payload = if payload.is_null() {
            Value::Object(Default::default())
        } else {
            payload
        };
        let result = self.transport.invoke(name.as_str(), payload).await;
        if let Err(err) = &result {
            self.report(name, display, err);
        }
        result
    }

    pub fn is_quiet(&self, name: CommandName) -> bool {
        name.is_quiet() || self.quiet_commands.contains(name.as_str())
    }

    fn report(&self, name: CommandName, display: ErrorDisplay, err: &BridgeError) {
        if display == ErrorDisplay::Silent || self.is_quiet(name) {
            debug!(command = %name, error = %err, "command failed quietly");
            return;
        }
        self.notifier.notify(ErrorNotice::new(name.as_str(), err));
    }
}

#[cfg(test)]
#[path = "tests/invoke_tests.rs"]
mod tests;
