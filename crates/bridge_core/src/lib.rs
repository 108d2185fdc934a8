use std::sync::Arc;

use shared::{
    error::BridgeError,
    protocol::{Event, EventKind},
};
use tracing::info;

pub mod commands;
pub mod events;
pub mod invoke;
pub mod logging;
pub mod query;
pub mod settings;
pub mod transport;

pub use commands::{Command, CommandName};
pub use events::{EventBus, Subscription};
pub use invoke::{ChannelNotifier, ErrorDisplay, ErrorNotifier, Invoker, LogNotifier};
pub use logging::LogForwarder;
pub use query::{LoadState, Query, QuerySnapshot, RacePolicy};
pub use settings::{load_settings, BridgeSettings, SettingsError};
pub use transport::{LoopbackTransport, ProcessTransport, Transport};

/// One front-end's connection to a backend: its event bus and its command
/// invoker, sharing a transport.
pub struct Bridge {
    transport: Arc<dyn Transport>,
    events: EventBus,
    invoker: Invoker,
    settings: BridgeSettings,
}

impl Bridge {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: BridgeSettings,
        notifier: Arc<dyn ErrorNotifier>,
    ) -> Self {
        let events = EventBus::new(Arc::clone(&transport), settings.event_channel.clone());
        let invoker = Invoker::new(
            Arc::clone(&transport),
            notifier,
            settings.quiet_commands.clone(),
        );
        Self {
            transport,
            events,
            invoker,
            settings,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub async fn listen<F>(&self, kind: EventKind, callback: F) -> Result<Subscription, BridgeError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.events.listen(kind, callback).await
    }

    pub async fn emit(&self, event: &Event) -> Result<(), BridgeError> {
        self.events.emit(event).await
    }

    pub async fn invoke<C: Command>(&self, payload: C::Request) -> Result<C::Response, BridgeError> {
        self.invoker.invoke::<C>(payload).await
    }

    pub async fn query<C: Command>(
        &self,
        events: &[EventKind],
        payload: C::Request,
    ) -> Result<Query<C>, BridgeError> {
        Query::mount(self, events, payload).await
    }

    /// Re-emit backend log records through `tracing` until the returned
    /// forwarder is dropped.
    pub async fn forward_logs(&self) -> Result<LogForwarder, BridgeError> {
        LogForwarder::start(self.transport.as_ref(), &self.settings.log_channel).await
    }

    /// Stop event delivery. Queries mounted on this bridge stop refreshing;
    /// command invocation keeps working.
    pub fn shutdown(&self) {
        self.events.shutdown();
        info!(channel = %self.settings.event_channel, "bridge shut down");
    }
}

#[cfg(test)]
#[path = "tests/bridge_tests.rs"]
mod tests;
