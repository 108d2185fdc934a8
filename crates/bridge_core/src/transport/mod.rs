//! The boundary to the backend: command invocation plus named event channels.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use shared::error::BridgeError;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

mod loopback;
mod process;

pub use loopback::LoopbackTransport;
pub use process::ProcessTransport;

/// Payloads buffered per event channel before a slow subscriber lags.
const CHANNEL_CAPACITY: usize = 1024;

/// Stream of raw payloads received on one event channel.
pub type EventStream = BoxStream<'static, Value>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `payload` tagged with `command` and wait for the backend's answer.
    async fn invoke(&self, command: &str, payload: Value) -> Result<Value, BridgeError>;

    /// Open a stream of everything subsequently delivered on `channel`.
    async fn subscribe(&self, channel: &str) -> Result<EventStream, BridgeError>;

    /// Send `payload` on `channel`; resolves once the transport accepted it.
    async fn emit(&self, channel: &str, payload: Value) -> Result<(), BridgeError>;
}

/// Payload of one broadcast receive; a lag gap is logged and skipped.
fn received_payload(
    channel: &str,
    received: Result<Value, BroadcastStreamRecvError>,
) -> Option<Value> {
    match received {
        Ok(payload) => Some(payload),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(channel, skipped, "event subscriber lagged; payloads dropped");
            None
        }
    }
}

#[cfg(test)]
#[path = "../tests/transport_tests.rs"]
mod tests;
