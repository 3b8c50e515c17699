//! Push events from the background and their effect on the provider state.

use crate::state::{ProviderState, StateReader};
use opwallet_rpc::{EventMessage, RpcError};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::{fmt, sync::Arc};
use tokio::sync::{broadcast, watch};

/// Downstream consumer of chain changes, e.g. the RPC client used by the page.
pub trait ChainContext: Send + Sync {
    fn set_chain(&self, chain: &Value);
}

/// A push event as sent by the background.
#[derive(Clone, Debug, PartialEq)]
pub enum PushEvent {
    Connect(Value),
    Disconnect,
    /// `None` if the background sent no account list at all
    AccountsChanged(Option<Vec<String>>),
    NetworkChanged { network: Option<String>, chain: Option<Value> },
    Unlock,
    Lock,
    /// Any event without a dedicated handler, forwarded to listeners as is.
    Other { event: String, data: Value },
}

#[derive(Deserialize)]
struct NetworkChange {
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    chain: Option<Value>,
}

impl From<EventMessage> for PushEvent {
    fn from(msg: EventMessage) -> Self {
        let EventMessage { event, data } = msg;
        let parsed = match event.as_str() {
            "connect" => Ok(Self::Connect(data.clone())),
            "disconnect" => Ok(Self::Disconnect),
            "unlock" => Ok(Self::Unlock),
            "lock" => Ok(Self::Lock),
            "accountsChanged" => {
                serde_json::from_value::<Option<Vec<String>>>(data.clone()).map(Self::AccountsChanged)
            }
            "networkChanged" => serde_json::from_value::<NetworkChange>(data.clone())
                .map(|change| Self::NetworkChanged { network: change.network, chain: change.chain }),
            _ => return Self::Other { event, data },
        };
        parsed.unwrap_or_else(|err| {
            warn!(target: "provider", %event, %err, "malformed push event, forwarding as is");
            Self::Other { event, data }
        })
    }
}

/// Events observed by page code.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEvent {
    Connect(Value),
    Disconnect(RpcError),
    Close(RpcError),
    AccountsChanged(Vec<String>),
    /// The new network, `None` when the background no longer reports one.
    NetworkChanged(Option<String>),
    /// The startup sequence completed.
    Initialized,
    Other { event: String, data: Value },
}

impl ProviderEvent {
    /// The event name page listeners subscribe to.
    pub fn name(&self) -> &str {
        match self {
            Self::Connect(_) => "connect",
            Self::Disconnect(_) => "disconnect",
            Self::Close(_) => "close",
            Self::AccountsChanged(_) => "accountsChanged",
            Self::NetworkChanged(_) => "networkChanged",
            Self::Initialized => "_initialized",
            Self::Other { event, .. } => event,
        }
    }
}

impl fmt::Display for ProviderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A subscription to [`ProviderEvent`]s.
///
/// A receiver that falls more than the channel capacity behind skips the oldest events.
#[derive(Debug)]
pub struct EventReceiver {
    rx: broadcast::Receiver<ProviderEvent>,
}

// === impl EventReceiver ===

impl EventReceiver {
    pub fn new(rx: broadcast::Receiver<ProviderEvent>) -> Self {
        Self { rx }
    }

    /// Waits for the next event; `None` once the provider is gone.
    pub async fn recv(&mut self) -> Option<ProviderEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "provider", skipped, "event listener lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<ProviderEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(target: "provider", skipped, "event listener lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

/// The single writer of [`ProviderState`].
///
/// Each push event is applied and its notifications emitted as one step; concurrent
/// dispatches are serialized. Notifications are suppressed until the state is initialized.
pub struct PushEventDispatcher {
    state: watch::Sender<ProviderState>,
    events: broadcast::Sender<ProviderEvent>,
    chain: Option<Arc<dyn ChainContext>>,
    lock: Mutex<()>,
}

// === impl PushEventDispatcher ===

impl PushEventDispatcher {
    pub fn new(events: broadcast::Sender<ProviderEvent>, chain: Option<Arc<dyn ChainContext>>) -> Self {
        let (state, _) = watch::channel(ProviderState::default());
        Self { state, events, chain, lock: Mutex::new(()) }
    }

    pub fn reader(&self) -> StateReader {
        StateReader::new(self.state.subscribe())
    }

    pub fn snapshot(&self) -> ProviderState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    /// Number of live event subscriptions.
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Applies a push event.
    pub fn dispatch(&self, event: PushEvent) {
        let _guard = self.lock.lock();
        trace!(target: "provider", ?event, "push event");
        match event {
            PushEvent::Connect(data) => self.connect(data),
            PushEvent::Disconnect => self.disconnect(),
            PushEvent::AccountsChanged(accounts) => self.accounts_changed(accounts),
            PushEvent::NetworkChanged { network, chain } => self.network_changed(network, chain),
            PushEvent::Unlock => self.set_unlocked(true),
            PushEvent::Lock => self.set_unlocked(false),
            PushEvent::Other { event, data } => self.emit(ProviderEvent::Other { event, data }),
        }
    }

    /// Applies the state fetched during startup.
    ///
    /// `connect` is announced to listeners even though the state is not initialized yet.
    pub fn apply_initial_state(&self, initial: InitialState) {
        let _guard = self.lock.lock();
        let InitialState { network, chain, accounts, is_unlocked } = initial;
        if is_unlocked {
            self.set_unlocked(true);
        }
        let _ = self.events.send(ProviderEvent::Connect(Value::Object(Default::default())));
        self.network_changed(network, chain);
        self.accounts_changed(accounts);
    }

    /// Marks the state initialized, enabling notifications.
    pub fn initialize(&self) {
        let _guard = self.lock.lock();
        let changed = self.state.send_if_modified(|state| !std::mem::replace(&mut state.initialized, true));
        if changed {
            debug!(target: "provider", "provider initialized");
            self.emit(ProviderEvent::Initialized);
        }
    }

    fn connect(&self, data: Value) {
        if self.state.send_if_modified(|state| !std::mem::replace(&mut state.is_connected, true)) {
            self.emit(ProviderEvent::Connect(data));
        }
    }

    fn disconnect(&self) {
        self.state.send_modify(|state| {
            state.is_connected = false;
            state.accounts = None;
            state.selected_address = None;
        });
        let err = RpcError::disconnected();
        self.emit(ProviderEvent::AccountsChanged(Vec::new()));
        self.emit(ProviderEvent::Disconnect(err.clone()));
        self.emit(ProviderEvent::Close(err));
    }

    fn accounts_changed(&self, accounts: Option<Vec<String>>) {
        let first = accounts.as_ref().and_then(|accounts| accounts.first()).cloned();
        let changed = self.state.send_if_modified(|state| {
            if first == state.selected_address {
                return false;
            }
            state.selected_address = first;
            state.accounts = accounts.clone();
            true
        });
        if changed {
            self.emit(ProviderEvent::AccountsChanged(accounts.unwrap_or_default()));
        }
    }

    fn network_changed(&self, network: Option<String>, chain: Option<Value>) {
        self.connect(Value::Object(Default::default()));
        if network == self.state.borrow().network {
            return;
        }
        if let (Some(chain), Some(ctx)) = (chain.as_ref().filter(|chain| !chain.is_null()), &self.chain) {
            ctx.set_chain(chain);
        }
        self.state.send_modify(|state| state.network = network.clone());
        self.emit(ProviderEvent::NetworkChanged(network));
    }

    fn set_unlocked(&self, unlocked: bool) {
        self.state.send_if_modified(|state| std::mem::replace(&mut state.is_unlocked, unlocked) != unlocked);
    }

    fn emit(&self, event: ProviderEvent) {
        if !self.state.borrow().initialized {
            trace!(target: "provider", %event, "suppressing event before initialization");
            return;
        }
        // no listeners is fine
        let _ = self.events.send(event);
    }
}

impl fmt::Debug for PushEventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushEventDispatcher")
            .field("state", &*self.state.borrow())
            .field("listeners", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

/// Result of `getProviderState`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialState {
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub chain: Option<Value>,
    #[serde(default)]
    pub accounts: Option<Vec<String>>,
    #[serde(default)]
    pub is_unlocked: bool,
}
