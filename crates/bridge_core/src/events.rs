//! Fan-out of backend notifications to named subscribers.
//!
//! One transport subscription per bus carries every `{name, params}`
//! envelope; the bus decodes each one and hands it to the callbacks that
//! registered for its [`EventKind`], in registration order.

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};

use futures::StreamExt;
use shared::{
    error::BridgeError,
    protocol::{Event, EventKind},
};
use tokio::{sync::OnceCell, task::JoinHandle};
use tracing::{debug, warn};

use crate::transport::{EventStream, Transport};

pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    subscribers: Mutex<HashMap<EventKind, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl Registry {
    fn insert(&self, kind: EventKind, callback: Callback) -> (u64, Arc<AtomicBool>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.lock().entry(kind).or_default().push(Subscriber {
            id,
            active: Arc::clone(&active),
            callback,
        });
        (id, active)
    }

    fn remove(&self, kind: EventKind, id: u64) {
        let mut subscribers = self.lock();
        if let Some(list) = subscribers.get_mut(&kind) {
            list.retain(|subscriber| subscriber.id != id);
            if list.is_empty() {
                subscribers.remove(&kind);
            }
        }
    }

    fn clear(&self) {
        let mut subscribers = self.lock();
        for subscriber in subscribers.values().flatten() {
            subscriber.active.store(false, Ordering::SeqCst);
        }
        subscribers.clear();
    }

    fn count(&self, kind: EventKind) -> usize {
        self.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Deliver to a snapshot so callbacks may (un)subscribe while we iterate.
    fn dispatch(&self, event: &Event) -> usize {
        let kind = event.kind();
        let snapshot = self.lock().get(&kind).cloned().unwrap_or_default();
        let mut delivered = 0;
        for subscriber in snapshot {
            if !subscriber.active.load(Ordering::SeqCst) {
                continue;
            }
            let callback = &subscriber.callback;
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(
                    event = %kind,
                    subscriber = subscriber.id,
                    "event subscriber panicked"
                ),
            }
        }
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EventKind, Vec<Subscriber>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to one registered callback; dropping it unsubscribes.
pub struct Subscription {
    kind: EventKind,
    id: u64,
    active: Arc<AtomicBool>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Remove this callback. Calling it again is a no-op.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(registry) = self.registry.upgrade() {
                registry.remove(self.kind, self.id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

pub struct EventBus {
    transport: Arc<dyn Transport>,
    channel: String,
    registry: Arc<Registry>,
    pump: OnceCell<JoinHandle<()>>,
    shut_down: AtomicBool,
}

impl EventBus {
    pub fn new(transport: Arc<dyn Transport>, channel: impl Into<String>) -> Self {
        Self {
            transport,
            channel: channel.into(),
            registry: Arc::new(Registry::default()),
            pump: OnceCell::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Register `callback` for every future event of `kind`.
    ///
    /// The first call opens the transport subscription; if that fails the
    /// error is returned here and the next call tries again.
    pub async fn listen<F>(&self, kind: EventKind, callback: F) -> Result<Subscription, BridgeError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }
        self.ensure_pump().await?;
        let (id, active) = self.registry.insert(kind, Arc::new(callback));
        debug!(event = %kind, subscriber = id, "subscribed");
        Ok(Subscription {
            kind,
            id,
            active,
            registry: Arc::downgrade(&self.registry),
        })
    }

    /// Send `event` over the bus channel. Resolves when the transport has
    /// accepted it, not when subscribers have run.
    pub async fn emit(&self, event: &Event) -> Result<(), BridgeError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }
        let envelope = event.to_envelope()?;
        debug!(event = %event.kind(), "emitting");
        self.transport.emit(&self.channel, envelope).await
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry.count(kind)
    }

    /// Stop delivering events and drop every subscriber.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(pump) = self.pump.get() {
            pump.abort();
        }
        self.registry.clear();
        debug!(channel = %self.channel, "event bus shut down");
    }

    async fn ensure_pump(&self) -> Result<(), BridgeError> {
        self.pump
            .get_or_try_init(|| async {
                let stream = self.transport.subscribe(&self.channel).await?;
                debug!(channel = %self.channel, "transport subscription established");
                Ok::<_, BridgeError>(tokio::spawn(pump_events(
                    stream,
                    Arc::downgrade(&self.registry),
                )))
            })
            .await?;
        Ok(())
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get() {
            pump.abort();
        }
    }
}

async fn pump_events(mut stream: EventStream, registry: Weak<Registry>) {
    while let Some(envelope) = stream.next().await {
        let Some(registry) = registry.upgrade() else {
            break;
        };
        match Event::from_envelope(envelope) {
            Ok(event) => {
                let delivered = registry.dispatch(&event);
                debug!(event = %event.kind(), delivered, "event dispatched");
            }
            Err(err) => debug!(error = %err, "dropping undecodable envelope"),
        }
    }
}

#[cfg(test)]
#[path = "tests/events_tests.rs"]
mod tests;
