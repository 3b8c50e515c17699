//! Serialized request dispatch.
//!
//! Requests are admitted into a single FIFO queue per channel and dispatched one at a time:
//! request `k + 1` is not handed to the transport before request `k` settled.

use crate::{
    error::{BridgeError, TransportError},
    gate::ReadyGate,
};
use async_trait::async_trait;
use opwallet_rpc::RequestParams;
use pin_project::pin_project;
use serde_json::Value;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// Something that can carry a single request to the background.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    async fn dispatch(&self, request: RequestParams) -> Result<Value, BridgeError>;
}

#[async_trait]
impl<D: Dispatch + ?Sized> Dispatch for Arc<D> {
    async fn dispatch(&self, request: RequestParams) -> Result<Value, BridgeError> {
        (**self).dispatch(request).await
    }
}

type Reply = oneshot::Sender<Result<Value, BridgeError>>;

#[derive(Debug)]
struct Job {
    request: RequestParams,
    reply: Reply,
}

/// Handle to the queue worker.
#[derive(Clone, Debug)]
pub struct RequestQueue {
    jobs: mpsc::UnboundedSender<Job>,
}

impl RequestQueue {
    /// Spawns the worker that dispatches admitted requests through `dispatcher`, each one
    /// waiting on `gate` first.
    ///
    /// The worker stops when `cancel` fires; requests still queued then fail with
    /// [`TransportError::Closed`].
    pub fn spawn<D: Dispatch>(
        dispatcher: D,
        gate: Arc<ReadyGate>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (jobs, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(rx, dispatcher, gate, cancel));
        (Self { jobs }, worker)
    }

    /// Admits `request` into the queue.
    ///
    /// Admission happens when this is called, not when the returned future is first polled.
    /// Dropping the future does not cancel the request.
    pub fn send(&self, request: RequestParams) -> PendingRequest {
        let (reply, rx) = oneshot::channel();
        trace!(target: "queue", method = %request.method, "admitting request");
        let rx = match self.jobs.send(Job { request, reply }) {
            Ok(()) => Some(rx),
            Err(_) => None,
        };
        PendingRequest { rx }
    }

    /// Returns true if the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

/// The settled result of a queued request.
#[pin_project]
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct PendingRequest {
    #[pin]
    rx: Option<oneshot::Receiver<Result<Value, BridgeError>>>,
}

impl Future for PendingRequest {
    type Output = Result<Value, BridgeError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(rx) = self.project().rx.as_pin_mut() else {
            return Poll::Ready(Err(TransportError::Closed.into()));
        };
        match ready!(rx.poll(cx)) {
            Ok(res) => Poll::Ready(res),
            Err(_) => Poll::Ready(Err(TransportError::Closed.into())),
        }
    }
}

async fn run<D: Dispatch>(
    mut jobs: mpsc::UnboundedReceiver<Job>,
    dispatcher: D,
    gate: Arc<ReadyGate>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        let Job { request, reply } = job;
        let method = request.method.clone();

        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = reply.send(Err(TransportError::Closed.into()));
                break
            }
            res = async {
                gate.wait_ready().await;
                trace!(target: "queue", %method, "dispatching request");
                dispatcher.dispatch(request).await
            } => res,
        };

        if reply.send(res).is_err() {
            trace!(target: "queue", %method, "caller dropped before the request settled");
        }
    }

    jobs.close();
    while let Ok(Job { request, reply }) = jobs.try_recv() {
        trace!(target: "queue", method = %request.method, "rejecting queued request on shutdown");
        let _ = reply.send(Err(TransportError::Closed.into()));
    }
    debug!(target: "queue", "request queue stopped");
}
