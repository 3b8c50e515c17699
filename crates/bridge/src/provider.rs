//! The page facing provider and its background tasks.

use crate::{
    error::BridgeError,
    gate::ReadyGate,
    push::{ChainContext, EventReceiver, InitialState, PushEvent, PushEventDispatcher},
    queue::RequestQueue,
    state::{ProviderState, StateReader},
    transport::{Channel, MessagePort},
};
use opwallet_config::BridgeConfig;
use opwallet_rpc::RequestParams;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::{fmt, sync::Arc};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Ready gate condition mirroring page visibility.
pub const VISIBILITY_CHECK: u32 = 1;

const EVENT_CAPACITY: usize = 256;

/// Visibility of the page the provider is injected into.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Page metadata announced to the background on startup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

struct ProviderInner {
    config: BridgeConfig,
    channel: Arc<Channel>,
    queue: RequestQueue,
    gate: Arc<ReadyGate>,
    dispatcher: Arc<PushEventDispatcher>,
    state: StateReader,
    visibility: Mutex<Visibility>,
    cancel: CancellationToken,
}

impl ProviderInner {
    /// Syncs the visibility check of the ready gate with the page.
    fn refresh_gate(&self) {
        match *self.visibility.lock() {
            Visibility::Visible => self.gate.check(VISIBILITY_CHECK),
            Visibility::Hidden => self.gate.uncheck(VISIBILITY_CHECK),
        }
    }
}

/// Handle to the injected wallet provider.
///
/// Cheap to clone. All clones share one channel, one request queue and one state.
#[derive(Clone)]
pub struct Provider {
    inner: Arc<ProviderInner>,
}

// === impl Provider ===

impl Provider {
    pub fn builder() -> ProviderBuilder {
        ProviderBuilder::default()
    }

    /// Sends a request through the queue.
    ///
    /// Readiness is re-evaluated from the current page visibility before admission.
    pub async fn request(&self, request: RequestParams) -> Result<Value, BridgeError> {
        request.validate().map_err(|_| BridgeError::InvalidRequest)?;
        self.inner.refresh_gate();

        let method = request.method.clone();
        debug!(target: "provider", %method, "request");
        let res = self.inner.queue.send(request).await;
        match &res {
            Ok(_) => trace!(target: "provider", %method, "request succeeded"),
            Err(err) => debug!(target: "provider", %method, %err, "request failed"),
        }
        res
    }

    /// Sends an untyped page payload, e.g. `{"method": "getAccounts"}`.
    pub async fn request_raw(&self, payload: Value) -> Result<Value, BridgeError> {
        let request = RequestParams::from_value(payload).map_err(|_| BridgeError::InvalidRequest)?;
        self.request(request).await
    }

    /// Sends a request and deserializes its result.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        request: RequestParams,
    ) -> Result<T, BridgeError> {
        let value = self.request(request).await?;
        serde_json::from_value(value).map_err(|err| BridgeError::UnexpectedResponse(err.to_string()))
    }

    pub(crate) async fn call(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        self.request(RequestParams::with_params(method, params)).await
    }

    pub(crate) async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, BridgeError> {
        self.request_as(RequestParams::with_params(method, params)).await
    }

    /// Returns a snapshot of the provider state.
    pub fn state(&self) -> ProviderState {
        self.inner.state.snapshot()
    }

    pub fn state_reader(&self) -> StateReader {
        self.inner.state.clone()
    }

    /// Accounts visible to the page, empty while disconnected.
    pub fn accounts(&self) -> Vec<String> {
        self.state().accounts().to_vec()
    }

    pub fn selected_address(&self) -> Option<String> {
        self.state().selected_address
    }

    pub fn network(&self) -> Option<String> {
        self.state().network
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.state.is_initialized()
    }

    /// Resolves once the startup sequence completed.
    pub async fn initialized(&self) {
        self.inner.state.initialized().await
    }

    /// Subscribes to provider events.
    pub fn subscribe(&self) -> EventReceiver {
        let rx = EventReceiver::new(self.inner.dispatcher.subscribe());
        let listeners = self.inner.dispatcher.listener_count();
        if listeners > self.inner.config.max_listeners {
            warn!(
                target: "provider",
                listeners,
                max = self.inner.config.max_listeners,
                "possible event listener leak detected"
            );
        }
        rx
    }

    pub fn channel_name(&self) -> &str {
        self.inner.channel.name()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Returns true if both handles refer to the same provider.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Announces the page, fetches the initial state and then keeps the background alive.
    async fn run(self, page: PageInfo) {
        let cancel = self.inner.cancel.clone();

        match serde_json::to_value(&page) {
            Ok(params) => {
                if let Err(err) =
                    self.inner.channel.post(RequestParams::with_params("tabCheckin", params))
                {
                    debug!(target: "provider", %err, "failed to check in");
                }
            }
            Err(err) => debug!(target: "provider", %err, "failed to encode page info"),
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = self.startup() => {}
        }

        self.keep_alive(cancel).await;
    }

    async fn startup(&self) {
        match self.request_as::<InitialState>(RequestParams::new("getProviderState")).await {
            Ok(initial) => {
                trace!(target: "provider", ?initial, "received provider state");
                self.inner.dispatcher.apply_initial_state(initial);
            }
            Err(err) => debug!(target: "provider", %err, "failed to fetch provider state"),
        }
        self.inner.dispatcher.initialize();
    }

    /// Pings the background, then waits one interval after each settled ping.
    async fn keep_alive(&self, cancel: CancellationToken) {
        let period = self.inner.config.keep_alive_interval();
        loop {
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = self.call("keepAlive", json!({})) => res,
            };
            if let Err(err) = res {
                debug!(target: "provider", %err, "keep-alive failed");
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
        }
        trace!(target: "provider", "keep-alive stopped");
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("channel", &self.inner.channel)
            .field("state", &self.state())
            .field("ready", &self.inner.gate.is_ready())
            .finish_non_exhaustive()
    }
}

/// Configures and spawns a [`Provider`].
#[derive(Default)]
pub struct ProviderBuilder {
    config: BridgeConfig,
    page: PageInfo,
    chain: Option<Arc<dyn ChainContext>>,
    visibility: Visibility,
}

impl ProviderBuilder {
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn page(mut self, page: PageInfo) -> Self {
        self.page = page;
        self
    }

    /// Sets the consumer notified on `networkChanged`.
    pub fn chain_context(mut self, chain: Arc<dyn ChainContext>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Sets the initial page visibility.
    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Connects to the background over `port` and starts the provider tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self, port: impl MessagePort) -> ProviderHost {
        let Self { config, page, chain, visibility } = self;
        let cancel = CancellationToken::new();

        let channel = Arc::new(Channel::new(
            config.channel_name.clone(),
            port,
            config.request_timeout(),
            cancel.child_token(),
        ));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let dispatcher = Arc::new(PushEventDispatcher::new(events, chain));
        channel.on_event({
            let dispatcher = dispatcher.clone();
            move |msg| dispatcher.dispatch(PushEvent::from(msg.clone()))
        });
        channel.connect();

        let gate = Arc::new(ReadyGate::new(1));
        let (queue, worker) = RequestQueue::spawn(channel.clone(), gate.clone(), cancel.child_token());

        let inner = Arc::new(ProviderInner {
            state: dispatcher.reader(),
            config,
            channel,
            queue,
            gate,
            dispatcher,
            visibility: Mutex::new(visibility),
            cancel: cancel.clone(),
        });
        inner.refresh_gate();
        debug!(target: "provider", channel = %inner.config.channel_name, "spawning provider");

        let provider = Provider { inner };
        let mut tasks = vec![worker, tokio::spawn(provider.clone().run(page))];
        tasks.extend(provider.inner.channel.take_driver());

        ProviderHost { provider, tasks, cancel }
    }
}

/// Owns the background tasks of a provider; the host environment's side of the bridge.
///
/// Dropping the host stops all tasks.
pub struct ProviderHost {
    provider: Provider,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl ProviderHost {
    pub fn provider(&self) -> Provider {
        self.provider.clone()
    }

    /// Reports a page visibility change.
    ///
    /// Hiding the page pauses new requests; requests already dispatched are not interrupted.
    pub fn set_visibility(&self, visibility: Visibility) {
        trace!(target: "provider", ?visibility, "visibility changed");
        *self.provider.inner.visibility.lock() = visibility;
        self.provider.inner.refresh_gate();
    }

    pub fn visibility(&self) -> Visibility {
        *self.provider.inner.visibility.lock()
    }

    /// Returns a token cancelled on shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops the keep-alive loop, the request queue and the channel, and waits for them.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                debug!(target: "provider", %err, "provider task failed");
            }
        }
        debug!(target: "provider", "provider stopped");
    }
}

impl Drop for ProviderHost {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for ProviderHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHost")
            .field("provider", &self.provider)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}
