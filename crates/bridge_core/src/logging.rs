//! Forwarding of backend log records into this process's `tracing` output.

use futures::StreamExt;
use shared::{
    error::BridgeError,
    protocol::{LogRecord, LogType},
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::transport::{EventStream, Transport};

/// Targets that are too chatty to forward.
fn is_skipped_target(target: Option<&str>) -> bool {
    matches!(target, Some(target) if target == "progress" || target.starts_with("game"))
}

pub(crate) fn forward(record: &LogRecord) -> bool {
    let target = record.target.as_deref();
    if is_skipped_target(target) {
        return false;
    }
    let target = target.unwrap_or("backend");
    match record.log_type {
        LogType::Debug => debug!(backend_target = target, "{}", record.message),
        LogType::Info => info!(backend_target = target, "{}", record.message),
        LogType::Warning => warn!(backend_target = target, "{}", record.message),
        LogType::Error => error!(backend_target = target, "{}", record.message),
    }
    true
}

pub struct LogForwarder {
    task: JoinHandle<()>,
}

impl LogForwarder {
    pub async fn start(transport: &dyn Transport, channel: &str) -> Result<Self, BridgeError> {
        let stream = transport.subscribe(channel).await?;
        debug!(channel, "forwarding backend logs");
        Ok(Self {
            task: tokio::spawn(run(stream)),
        })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for LogForwarder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(mut stream: EventStream) {
    while let Some(payload) = stream.next().await {
        match serde_json::from_value::<LogRecord>(payload) {
            Ok(record) => {
                forward(&record);
            }
            Err(err) => debug!(error = %err, "dropping malformed log record"),
        }
    }
}

#[cfg(test)]
#[path = "tests/logging_tests.rs"]
mod tests;
