//! Event-refreshed command results.
//!
//! A [`Query`] runs its command once when mounted, again whenever one of its
//! events fires or its payload changes, and publishes the latest
//! [`QuerySnapshot`] for the view layer to render.

use std::{
    fmt,
    marker::PhantomData,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use serde::Deserialize;
use shared::{error::BridgeError, protocol::EventKind};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    commands::Command,
    events::Subscription,
    invoke::{ErrorDisplay, Invoker},
    Bridge,
};

/// What to do when fetches of one query overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RacePolicy {
    /// Only the most recently issued fetch may update the query.
    #[default]
    LatestIssued,
    /// Every fetch updates the query when it resolves, so a slow early fetch
    /// can overwrite a faster later one.
    LastResolved,
}

impl FromStr for RacePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "latest_issued" => Ok(Self::LatestIssued),
            "last_resolved" => Ok(Self::LastResolved),
            other => Err(format!("unknown race policy `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Done,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => f.write_str("loading"),
            Self::Done => f.write_str("done"),
        }
    }
}

pub struct QuerySnapshot<T> {
    pub state: LoadState,
    /// Last successful response; a new `Arc` means new data.
    pub value: Option<Arc<T>>,
    /// Failure of the last applied fetch, cleared by the next success.
    pub error: Option<BridgeError>,
    pub fetches_applied: u64,
}

impl<T> Clone for QuerySnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state,
            value: self.value.clone(),
            error: self.error.clone(),
            fetches_applied: self.fetches_applied,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for QuerySnapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySnapshot")
            .field("state", &self.state)
            .field("value", &self.value)
            .field("error", &self.error)
            .field("fetches_applied", &self.fetches_applied)
            .finish()
    }
}

impl<T> QuerySnapshot<T> {
    fn initial() -> Self {
        Self {
            state: LoadState::Loading,
            value: None,
            error: None,
            fetches_applied: 0,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.state == LoadState::Loading
    }

    /// The error if the last fetch failed, otherwise the cached value.
    pub fn result(&self) -> Option<Result<&T, &BridgeError>> {
        match (&self.error, &self.value) {
            (Some(err), _) => Some(Err(err)),
            (None, Some(value)) => Some(Ok(value.as_ref())),
            (None, None) => None,
        }
    }
}

struct QueryCore<C: Command> {
    invoker: Invoker,
    policy: RacePolicy,
    payload: Mutex<C::Request>,
    issued: AtomicU64,
    state: watch::Sender<QuerySnapshot<C::Response>>,
    _command: PhantomData<fn() -> C>,
}

impl<C: Command> QueryCore<C> {
    fn current_payload(&self) -> C::Request {
        self.payload
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn trigger(self: &Arc<Self>, reason: &'static str) {
        let payload = self.current_payload();
        let mut seq = 0;
        // Issuing and entering `Loading` share the channel lock with
        // `resolve`, so the latest fetch always sees its own `Loading`.
        self.state.send_modify(|snapshot| {
            seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            snapshot.state = LoadState::Loading;
        });
        debug!(command = %C::NAME, seq, reason, "query fetch scheduled");

        let core = Arc::clone(self);
        tokio::spawn(async move {
            let result = core
                .invoker
                .invoke_with::<C>(payload, ErrorDisplay::Silent)
                .await;
            core.resolve(seq, result);
        });
    }

    fn resolve(&self, seq: u64, result: Result<C::Response, BridgeError>) {
        let policy = self.policy;
        let issued = &self.issued;
        self.state.send_if_modified(move |snapshot| {
            // `issued` only moves under this same lock, in `trigger`.
            if policy == RacePolicy::LatestIssued && seq != issued.load(Ordering::SeqCst) {
                debug!(command = %C::NAME, seq, "discarding superseded fetch");
                return false;
            }
            match result {
                Ok(value) => {
                    snapshot.value = Some(Arc::new(value));
                    snapshot.error = None;
                }
                Err(err) => {
                    warn!(command = %C::NAME, seq, error = %err, "query fetch failed");
                    snapshot.error = Some(err);
                }
            }
            snapshot.state = LoadState::Done;
            snapshot.fetches_applied += 1;
            true
        });
    }
}

/// A command result kept fresh by events and payload changes.
///
/// Dropping the query unsubscribes it; fetches already in flight still run
/// to completion but nothing observes their result.
pub struct Query<C: Command> {
    core: Arc<QueryCore<C>>,
    receiver: watch::Receiver<QuerySnapshot<C::Response>>,
    _subscriptions: Vec<Subscription>,
}

impl<C: Command> Query<C> {
    /// Subscribe to `events` and start the first fetch, using the bridge's
    /// configured race policy.
    pub async fn mount(
        bridge: &Bridge,
        events: &[EventKind],
        payload: C::Request,
    ) -> Result<Self, BridgeError> {
        Self::mount_with_policy(bridge, events, payload, bridge.settings().race_policy).await
    }

    pub async fn mount_with_policy(
        bridge: &Bridge,
        events: &[EventKind],
        payload: C::Request,
        policy: RacePolicy,
    ) -> Result<Self, BridgeError> {
        let (state, receiver) = watch::channel(QuerySnapshot::initial());
        let core = Arc::new(QueryCore::<C> {
            invoker: bridge.invoker().clone(),
            policy,
            payload: Mutex::new(payload),
            issued: AtomicU64::new(0),
            state,
            _command: PhantomData,
        });

        let mut subscriptions = Vec::with_capacity(events.len());
        for kind in events {
            let weak = Arc::downgrade(&core);
            let subscription = bridge
                .events()
                .listen(*kind, move |_event| {
                    if let Some(core) = weak.upgrade() {
                        core.trigger("event");
                    }
                })
                .await?;
            subscriptions.push(subscription);
        }

        core.trigger("mount");
        Ok(Self {
            core,
            receiver,
            _subscriptions: subscriptions,
        })
    }

    /// Replace the payload; refetches only if it differs by value.
    pub fn set_payload(&self, payload: C::Request) -> bool {
        {
            let mut current = self
                .core
                .payload
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *current == payload {
                return false;
            }
            *current = payload;
        }
        self.core.trigger("payload");
        true
    }

    pub fn refresh(&self) {
        self.core.trigger("manual");
    }

    pub fn payload(&self) -> C::Request {
        self.core.current_payload()
    }

    pub fn snapshot(&self) -> QuerySnapshot<C::Response> {
        self.receiver.borrow().clone()
    }

    pub fn state(&self) -> LoadState {
        self.receiver.borrow().state
    }

    pub fn value(&self) -> Option<Arc<C::Response>> {
        self.receiver.borrow().value.clone()
    }

    pub fn error(&self) -> Option<BridgeError> {
        self.receiver.borrow().error.clone()
    }

    /// A receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<QuerySnapshot<C::Response>> {
        self.receiver.clone()
    }

    /// Wait for the next published snapshot.
    pub async fn changed(&mut self) -> Result<QuerySnapshot<C::Response>, BridgeError> {
        self.receiver
            .changed()
            .await
            .map_err(|_| BridgeError::Closed)?;
        Ok(self.receiver.borrow_and_update().clone())
    }

    /// Wait until no fetch is outstanding and return that snapshot.
    pub async fn settled(&mut self) -> Result<QuerySnapshot<C::Response>, BridgeError> {
        let snapshot = self
            .receiver
            .wait_for(|snapshot| snapshot.state == LoadState::Done)
            .await
            .map_err(|_| BridgeError::Closed)?;
        Ok(snapshot.clone())
    }
}

#[cfg(test)]
#[path = "tests/query_tests.rs"]
mod tests;
