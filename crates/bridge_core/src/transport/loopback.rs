//! In-process transport: commands are answered by registered handlers and
//! emitted events loop straight back to subscribers of the same channel.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt, StreamExt};
use serde_json::Value;
use shared::error::BridgeError;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use super::{received_payload, EventStream, Transport, CHANNEL_CAPACITY};

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

#[derive(Default)]
pub struct LoopbackTransport {
    handlers: Mutex<HashMap<String, Handler>>,
    channels: Mutex<HashMap<String, broadcast::Sender<Value>>>,
    invocations: Mutex<Vec<(String, Value)>>,
    fail_subscribe: AtomicBool,
    subscribe_calls: AtomicUsize,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `command` with `handler`, replacing any previous handler.
    pub fn handle<F, Fut>(&self, command: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |payload| handler(payload).boxed());
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(command.into(), handler);
    }

    /// Answer `command` with a fixed value.
    pub fn handle_value(&self, command: impl Into<String>, value: Value) {
        self.handle(command, move |_| {
            let value = value.clone();
            async move { Ok(value) }
        });
    }

    /// Fail every call of `command` with `message`.
    pub fn handle_error(&self, command: impl Into<String>, message: impl Into<String>) {
        let message = message.into();
        self.handle(command, move |_| {
            let message = message.clone();
            async move { Err(message) }
        });
    }

    /// Payloads received so far for `command`, in issue order.
    pub fn invocations(&self, command: &str) -> Vec<Value> {
        self.invocations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(name, _)| name == command)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn invocation_count(&self, command: &str) -> usize {
        self.invocations(command).len()
    }

    /// Make subsequent `subscribe` calls fail as if the bridge were down.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Value> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn invoke(&self, command: &str, payload: Value) -> Result<Value, BridgeError> {
        let handler = {
            self.invocations
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((command.to_string(), payload.clone()));
            self.handlers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .get(command)
                .cloned()
        };
        let Some(handler) = handler else {
            return Err(BridgeError::Transport(format!(
                "no handler registered for {command}"
            )));
        };
        handler(payload)
            .await
            .map_err(|message| BridgeError::backend(command, message))
    }

    async fn subscribe(&self, channel: &str) -> Result<EventStream, BridgeError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BridgeError::Transport(format!(
                "event bridge unavailable for {channel}"
            )));
        }
        let channel_name = channel.to_string();
        let stream = BroadcastStream::new(self.sender(channel).subscribe()).filter_map(
            move |received| futures::future::ready(received_payload(&channel_name, received)),
        );
        Ok(stream.boxed())
    }

    async fn emit(&self, channel: &str, payload: Value) -> Result<(), BridgeError> {
        if self.sender(channel).send(payload).is_err() {
            debug!(channel, "loopback emit with no subscribers");
        }
        Ok(())
    }
}
