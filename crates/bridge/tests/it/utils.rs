//! A scripted wallet background on the other end of a memory port.

use futures::{SinkExt, StreamExt};
use opwallet_bridge::{MemoryPort, Provider, ProviderHost, memory_channel};
use opwallet_config::BridgeConfig;
use opwallet_rpc::{
    ChannelMessage, EventMessage, MessageId, RequestMessage, RequestParams, ResponseMessage,
    ResponseResult,
};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};

pub const ACCOUNT: &str = "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4";

/// Decides the reply to a request; `None` leaves it unanswered.
pub type Responder = Box<dyn Fn(&RequestParams) -> Option<ResponseResult> + Send>;

/// Answers the startup and keep-alive requests and echoes everything else.
pub fn default_responder(request: &RequestParams) -> Option<ResponseResult> {
    let result = match request.method.as_str() {
        "getProviderState" => json!({
            "network": "livenet",
            "chain": "BITCOIN_MAINNET",
            "accounts": [ACCOUNT],
            "isUnlocked": true,
        }),
        "keepAlive" => json!(true),
        "tabCheckin" => return None,
        _ => json!({ "method": request.method, "params": request.params }),
    };
    Some(ResponseResult::success(result))
}

/// Config with keep-alive pushed far out so it does not interleave with the test.
pub fn quiet_config() -> BridgeConfig {
    BridgeConfig { keep_alive_interval_ms: 3_600_000, ..Default::default() }
}

pub struct Background {
    requests: mpsc::UnboundedReceiver<RequestMessage>,
    outbound: mpsc::UnboundedSender<String>,
    _task: JoinHandle<()>,
}

impl Background {
    pub fn spawn(
        port: MemoryPort,
        responder: impl Fn(&RequestParams) -> Option<ResponseResult> + Send + 'static,
    ) -> Self {
        let (requests_tx, requests) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let responder: Responder = Box::new(responder);
        let task = tokio::spawn(async move {
            let (mut sink, mut stream) = port.split();
            loop {
                tokio::select! {
                    msg = stream.next() => {
                        let Some(Ok(text)) = msg else { break };
                        let Ok(ChannelMessage::Request(req)) = serde_json::from_str(&text) else {
                            continue;
                        };
                        if let Some(result) = responder(&req.params) {
                            let resp = ChannelMessage::from(ResponseMessage::new(req.id, result));
                            let _ = sink.send(serde_json::to_string(&resp).unwrap()).await;
                        }
                        let _ = requests_tx.send(req);
                    }
                    Some(text) = outbound_rx.recv() => {
                        if sink.send(text).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self { requests, outbound, _task: task }
    }

    pub fn emit(&self, event: &str, data: Value) {
        self.send(EventMessage::new(event, data).into());
    }

    pub fn respond(&self, id: MessageId, result: impl Into<ResponseResult>) {
        self.send(ResponseMessage::new(id, result).into());
    }

    pub fn send(&self, msg: ChannelMessage) {
        self.send_raw(serde_json::to_string(&msg).unwrap());
    }

    pub fn send_raw(&self, text: impl Into<String>) {
        self.outbound.send(text.into()).unwrap();
    }

    /// Returns the next request the background received.
    pub async fn next_request(&mut self) -> RequestMessage {
        tokio::time::timeout(Duration::from_secs(30), self.requests.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("background stopped")
    }

    /// Returns the next request for `method`, skipping any other.
    pub async fn next_request_for(&mut self, method: &str) -> RequestMessage {
        loop {
            let req = self.next_request().await;
            if req.params.method == method {
                return req;
            }
        }
    }

    pub fn try_next_request(&mut self) -> Option<RequestMessage> {
        self.requests.try_recv().ok()
    }
}

/// Spawns a provider connected to a scripted background.
pub fn spawn_provider(
    config: BridgeConfig,
    responder: impl Fn(&RequestParams) -> Option<ResponseResult> + Send + 'static,
) -> (ProviderHost, Provider, Background) {
    let (page, background) = memory_channel();
    let background = Background::spawn(background, responder);
    let host = Provider::builder().config(config).spawn(page);
    let provider = host.provider();
    (host, provider, background)
}
