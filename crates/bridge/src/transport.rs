//! Named duplex channel between the page and the background.
//!
//! Requests, responses and push events share a single [`MessagePort`] and are told apart by
//! their shape, see [`ChannelMessage`].

use crate::{
    error::{BridgeError, TransportError},
    queue::Dispatch,
};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, channel::mpsc as port_mpsc};
use opwallet_rpc::{
    ChannelMessage, EventMessage, MessageId, RequestMessage, RequestParams, ResponseResult,
};
use parking_lot::Mutex;
use pin_project::pin_project;
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// A raw duplex text port, the transport primitive the channel is built on.
pub trait MessagePort:
    Stream<Item = Result<String, TransportError>> + Sink<String, Error = TransportError> + Send + 'static
{
}

impl<T> MessagePort for T where
    T: Stream<Item = Result<String, TransportError>>
        + Sink<String, Error = TransportError>
        + Send
        + 'static
{
}

type BoxPort = Pin<Box<dyn MessagePort>>;

/// Creates two connected in-process ports.
pub fn memory_channel() -> (MemoryPort, MemoryPort) {
    let (a_tx, a_rx) = port_mpsc::unbounded();
    let (b_tx, b_rx) = port_mpsc::unbounded();
    (MemoryPort { incoming: a_rx, outgoing: b_tx }, MemoryPort { incoming: b_rx, outgoing: a_tx })
}

/// One end of an in-process port pair, see [`memory_channel`].
///
/// Dropping one end ends the stream of the other.
#[pin_project]
#[derive(Debug)]
pub struct MemoryPort {
    #[pin]
    incoming: port_mpsc::UnboundedReceiver<String>,
    #[pin]
    outgoing: port_mpsc::UnboundedSender<String>,
}

fn port_error(err: port_mpsc::SendError) -> TransportError {
    if err.is_disconnected() { TransportError::Closed } else { TransportError::Port(err.to_string()) }
}

impl Stream for MemoryPort {
    type Item = Result<String, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().incoming.poll_next(cx).map(|msg| msg.map(Ok))
    }
}

impl Sink<String> for MemoryPort {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Sink::poll_ready(self.project().outgoing, cx).map_err(port_error)
    }

    fn start_send(self: Pin<&mut Self>, item: String) -> Result<(), Self::Error> {
        Sink::start_send(self.project().outgoing, item).map_err(port_error)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Sink::poll_flush(self.project().outgoing, cx).map_err(port_error)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Sink::poll_close(self.project().outgoing, cx).map_err(port_error)
    }
}

type EventHandler = Arc<dyn Fn(&EventMessage) + Send + Sync>;

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<MessageId, oneshot::Sender<ResponseResult>>>,
    handlers: Mutex<Vec<EventHandler>>,
    closed: AtomicBool,
}

impl Shared {
    fn on_message(&self, channel: &str, text: &str) {
        let msg = match serde_json::from_str::<ChannelMessage>(text) {
            Ok(msg) => msg,
            Err(err) => {
                debug!(target: "channel", channel, %err, "dropping undecodable message");
                return;
            }
        };
        match msg {
            ChannelMessage::Response(resp) => {
                let Some(tx) = self.pending.lock().remove(&resp.id) else {
                    trace!(target: "channel", channel, id = %resp.id, "discarding response without pending request");
                    return;
                };
                trace!(target: "channel", channel, id = %resp.id, "received response");
                let _ = tx.send(resp.result);
            }
            ChannelMessage::Event(event) => {
                trace!(target: "channel", channel, event = %event.event, "received event");
                let handlers = self.handlers.lock().clone();
                for handler in handlers {
                    handler(&event);
                }
            }
            ChannelMessage::Request(req) => {
                trace!(target: "channel", channel, id = %req.id, method = %req.params.method, "ignoring inbound request");
            }
        }
    }

    fn close(&self) {
        let mut pending = self.pending.lock();
        self.closed.store(true, Ordering::SeqCst);
        // dropping the senders fails every waiting request
        pending.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct Connection {
    port: BoxPort,
    outbound: mpsc::UnboundedReceiver<String>,
}

/// Correlates requests with responses over a [`MessagePort`] and fans out push events.
///
/// Outbound messages are buffered until [`Channel::connect`] is called.
pub struct Channel {
    name: String,
    timeout: Duration,
    outbound: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
    connection: Mutex<Option<Connection>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

// === impl Channel ===

impl Channel {
    /// Creates an unconnected channel over `port`.
    ///
    /// Requests fail with [`TransportError::Timeout`] after `timeout`.
    pub fn new(
        name: impl Into<String>,
        port: impl MessagePort,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            timeout,
            outbound,
            shared: Default::default(),
            connection: Mutex::new(Some(Connection { port: Box::pin(port), outbound: rx })),
            driver: Mutex::new(None),
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts the driver task. Calling this again is a no-op.
    pub fn connect(&self) -> &Self {
        if let Some(Connection { port, outbound }) = self.connection.lock().take() {
            debug!(target: "channel", channel = %self.name, "connecting");
            let driver = tokio::spawn(drive(
                self.name.clone(),
                port,
                outbound,
                self.shared.clone(),
                self.cancel.clone(),
            ));
            *self.driver.lock() = Some(driver);
        }
        self
    }

    /// Registers a handler for inbound push events.
    ///
    /// Handlers run on the driver task, in arrival order.
    pub fn on_event(&self, handler: impl Fn(&EventMessage) + Send + Sync + 'static) -> &Self {
        self.shared.handlers.lock().push(Arc::new(handler));
        self
    }

    /// Sends a request without waiting for its response.
    pub fn post(&self, request: RequestParams) -> Result<MessageId, TransportError> {
        let id = MessageId::random();
        trace!(target: "channel", channel = %self.name, %id, method = %request.method, "posting request");
        self.send_message(&RequestMessage { id, params: request }.into())?;
        Ok(id)
    }

    /// Sends a request and waits for the matching response.
    pub async fn request(&self, request: RequestParams) -> Result<Value, BridgeError> {
        self.request_with_timeout(request, self.timeout).await
    }

    pub async fn request_with_timeout(
        &self,
        request: RequestParams,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let id = MessageId::random();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock();
            if self.shared.is_closed() {
                return Err(TransportError::Closed.into());
            }
            pending.insert(id, tx);
        }
        let _guard = PendingGuard { shared: &self.shared, id };

        trace!(target: "channel", channel = %self.name, %id, method = %request.method, "sending request");
        self.send_message(&RequestMessage { id, params: request }.into())?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result.into_result().map_err(BridgeError::Rpc),
            Ok(Err(_)) => Err(TransportError::Closed.into()),
            Err(_) => Err(TransportError::Timeout(timeout).into()),
        }
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Stops the driver; pending requests fail with [`TransportError::Closed`].
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Takes the driver task handle, if connected.
    pub fn take_driver(&self) -> Option<JoinHandle<()>> {
        self.driver.lock().take()
    }

    fn send_message(&self, msg: &ChannelMessage) -> Result<(), TransportError> {
        let text = serde_json::to_string(msg).map_err(|err| TransportError::Encode(err.to_string()))?;
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("pending", &self.pending_requests())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Dispatch for Channel {
    async fn dispatch(&self, request: RequestParams) -> Result<Value, BridgeError> {
        self.request(request).await
    }
}

/// Removes a pending entry once its request future completes or is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: MessageId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.id);
    }
}

async fn drive(
    name: String,
    port: BoxPort,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let (mut sink, mut stream) = port.split();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = stream.next() => match msg {
                Some(Ok(text)) => shared.on_message(&name, &text),
                Some(Err(err)) => {
                    debug!(target: "channel", channel = %name, %err, "failed to receive message");
                }
                None => {
                    debug!(target: "channel", channel = %name, "port closed");
                    break
                }
            },
            Some(text) = outbound.recv() => {
                if let Err(err) = sink.send(text).await {
                    debug!(target: "channel", channel = %name, %err, "failed to send message");
                    break
                }
            }
        }
    }
    shared.close();
    let _ = sink.close().await;
    debug!(target: "channel", channel = %name, "channel closed");
}
