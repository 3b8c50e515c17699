use crate::{
    init_tracing,
    utils::{ACCOUNT, Background, default_responder, quiet_config, spawn_provider},
};
use opwallet_bridge::{
    BridgeError, ChainContext, EventReceiver, PageInfo, Provider, ProviderEvent, SendBitcoinOptions,
    TransportError, Visibility, memory_channel,
};
use opwallet_config::BridgeConfig;
use opwallet_rpc::{ErrorCode, MessageId, RequestParams, ResponseResult, RpcError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use similar_asserts::assert_eq;
use std::{sync::Arc, time::Duration};

const OTHER: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

async fn next_event(events: &mut EventReceiver) -> ProviderEvent {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("provider dropped")
}

/// Answers `slow` never and everything else like the default background.
fn holding_responder(request: &RequestParams) -> Option<ResponseResult> {
    if request.method == "slow" {
        return None;
    }
    default_responder(request)
}

#[tokio::test]
async fn startup_checks_in_and_loads_state() {
    init_tracing();
    let (page, background) = memory_channel();
    let mut bg = Background::spawn(background, default_responder);
    let host = Provider::builder()
        .config(quiet_config())
        .page(PageInfo {
            origin: Some("https://app.example".to_string()),
            name: Some("Example".to_string()),
            icon: None,
        })
        .spawn(page);
    let provider = host.provider();
    let mut events = provider.subscribe();

    provider.initialized().await;

    let checkin = bg.next_request().await;
    assert_eq!(checkin.params.method, "tabCheckin");
    assert_eq!(checkin.params.params, json!({ "origin": "https://app.example", "name": "Example" }));
    assert_eq!(bg.next_request().await.params.method, "getProviderState");

    let state = provider.state();
    assert!(state.initialized);
    assert!(state.is_connected);
    assert!(state.is_unlocked);
    assert_eq!(state.network.as_deref(), Some("livenet"));
    assert_eq!(state.selected_address.as_deref(), Some(ACCOUNT));
    assert_eq!(provider.accounts(), vec![ACCOUNT.to_string()]);

    assert_eq!(next_event(&mut events).await, ProviderEvent::Connect(json!({})));
    assert_eq!(next_event(&mut events).await, ProviderEvent::Initialized);
}

#[tokio::test]
async fn startup_failure_still_initializes() {
    let (_host, provider, _bg) = spawn_provider(quiet_config(), |request| {
        if request.method == "getProviderState" {
            return Some(RpcError::internal_error().into());
        }
        default_responder(request)
    });
    let mut events = provider.subscribe();

    provider.initialized().await;

    let state = provider.state();
    assert!(state.initialized);
    assert!(!state.is_connected);
    assert!(provider.accounts().is_empty());
    assert_eq!(next_event(&mut events).await, ProviderEvent::Initialized);
}

#[tokio::test(start_paused = true)]
async fn keep_alive_pings_after_each_interval() {
    let config = BridgeConfig { keep_alive_interval_ms: 1_000, ..Default::default() };
    let (_host, provider, mut bg) = spawn_provider(config, default_responder);
    provider.initialized().await;

    tokio::time::sleep(Duration::from_millis(3_500)).await;

    let mut pings = 0;
    while let Some(req) = bg.try_next_request() {
        if req.params.method == "keepAlive" {
            assert_eq!(req.params.params, json!({}));
            pings += 1;
        }
    }
    assert!((3..=4).contains(&pings), "unexpected keep-alive count {pings}");
}

#[tokio::test]
async fn keep_alive_failures_are_swallowed() {
    let config = BridgeConfig { keep_alive_interval_ms: 10, ..Default::default() };
    let (_host, provider, mut bg) = spawn_provider(config, |request| {
        if request.method == "keepAlive" {
            return Some(RpcError::internal_error().into());
        }
        default_responder(request)
    });
    provider.initialized().await;

    bg.next_request_for("keepAlive").await;
    bg.next_request_for("keepAlive").await;
    assert_eq!(
        provider.get_balance().await.unwrap(),
        json!({ "method": "getBalance", "params": null })
    );
}

#[tokio::test]
async fn dispatches_one_request_at_a_time() {
    let (_host, provider, mut bg) = spawn_provider(quiet_config(), holding_responder);
    provider.initialized().await;

    let slow = tokio::spawn({
        let provider = provider.clone();
        async move { provider.request(RequestParams::new("slow")).await }
    });
    let slow_req = bg.next_request_for("slow").await;

    let fast = tokio::spawn({
        let provider = provider.clone();
        async move { provider.request(RequestParams::with_params("fast", json!([1]))).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Some(req) = bg.try_next_request() {
        assert_ne!(req.params.method, "fast");
    }

    bg.respond(slow_req.id, ResponseResult::success("done"));
    assert_eq!(slow.await.unwrap().unwrap(), json!("done"));
    assert_eq!(
        fast.await.unwrap().unwrap(),
        json!({ "method": "fast", "params": [1] })
    );
}

#[tokio::test]
async fn hidden_page_holds_requests() {
    let (host, provider, mut bg) = spawn_provider(quiet_config(), default_responder);
    provider.initialized().await;

    host.set_visibility(Visibility::Hidden);
    let pending = tokio::spawn({
        let provider = provider.clone();
        async move { provider.get_chain().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Some(req) = bg.try_next_request() {
        assert_ne!(req.params.method, "getChain");
    }
    assert!(!pending.is_finished());

    host.set_visibility(Visibility::Visible);
    assert_eq!(
        pending.await.unwrap().unwrap(),
        json!({ "method": "getChain", "params": null })
    );
}

#[tokio::test]
async fn disconnect_resets_state_and_notifies() {
    let (_host, provider, bg) = spawn_provider(quiet_config(), default_responder);
    provider.initialized().await;
    let mut events = provider.subscribe();

    bg.emit("disconnect", Value::Null);

    assert_eq!(next_event(&mut events).await, ProviderEvent::AccountsChanged(Vec::new()));
    let ProviderEvent::Disconnect(err) = next_event(&mut events).await else {
        panic!("expected disconnect");
    };
    assert_eq!(err.code, ErrorCode::Disconnected);
    assert_eq!(next_event(&mut events).await, ProviderEvent::Close(err));

    let state = provider.state();
    assert!(!state.is_connected);
    assert_eq!(state.selected_address, None);
    // the network survives a disconnect
    assert_eq!(state.network.as_deref(), Some("livenet"));
}

#[tokio::test]
async fn accounts_changed_only_when_selected_address_changes() {
    let (_host, provider, bg) = spawn_provider(quiet_config(), default_responder);
    provider.initialized().await;
    let mut events = provider.subscribe();

    bg.emit("accountsChanged", json!([ACCOUNT, OTHER]));
    bg.emit("accountsChanged", json!([OTHER]));

    assert_eq!(
        next_event(&mut events).await,
        ProviderEvent::AccountsChanged(vec![OTHER.to_string()])
    );
    assert_eq!(provider.selected_address().as_deref(), Some(OTHER));
}

#[derive(Default)]
struct RecordingChain(Mutex<Vec<Value>>);

impl ChainContext for RecordingChain {
    fn set_chain(&self, chain: &Value) {
        self.0.lock().push(chain.clone());
    }
}

#[tokio::test]
async fn network_change_updates_chain_context() {
    let chain = Arc::new(RecordingChain::default());
    let (page, background) = memory_channel();
    let bg = Background::spawn(background, default_responder);
    let host = Provider::builder().config(quiet_config()).chain_context(chain.clone()).spawn(page);
    let provider = host.provider();
    provider.initialized().await;
    let mut events = provider.subscribe();

    bg.emit("networkChanged", json!({ "network": "testnet", "chain": "BITCOIN_TESTNET" }));

    assert_eq!(
        next_event(&mut events).await,
        ProviderEvent::NetworkChanged(Some("testnet".to_string()))
    );
    assert_eq!(provider.network().as_deref(), Some("testnet"));
    assert_eq!(*chain.0.lock(), vec![json!("BITCOIN_MAINNET"), json!("BITCOIN_TESTNET")]);
}

#[tokio::test]
async fn forwards_unknown_events() {
    let (_host, provider, bg) = spawn_provider(quiet_config(), default_responder);
    provider.initialized().await;
    let mut events = provider.subscribe();

    bg.emit("chainChanged", json!({ "enum": "FRACTAL_BITCOIN_MAINNET" }));
    bg.emit("lock", Value::Null);
    bg.emit("inscriptionsChanged", json!([]));

    let event = next_event(&mut events).await;
    assert_eq!(event.name(), "chainChanged");
    assert_eq!(
        event,
        ProviderEvent::Other {
            event: "chainChanged".to_string(),
            data: json!({ "enum": "FRACTAL_BITCOIN_MAINNET" })
        }
    );
    assert_eq!(next_event(&mut events).await.name(), "inscriptionsChanged");
    assert!(!provider.state().is_unlocked);
}

#[tokio::test]
async fn rejects_invalid_requests() {
    let (_host, provider, _bg) = spawn_provider(quiet_config(), default_responder);

    for payload in [Value::Null, json!([1, 2]), json!("getAccounts"), json!({ "method": "" })] {
        assert_eq!(provider.request_raw(payload).await, Err(BridgeError::InvalidRequest));
    }
    assert_eq!(
        provider.request(RequestParams::new("  ")).await,
        Err(BridgeError::InvalidRequest)
    );

    let echoed = provider
        .request_raw(json!({ "method": "getBalance", "params": { "x": 1 } }))
        .await
        .unwrap();
    assert_eq!(echoed, json!({ "method": "getBalance", "params": { "x": 1 } }));
}

#[tokio::test]
async fn relays_background_errors() {
    let (_host, provider, _bg) = spawn_provider(quiet_config(), |request| {
        if request.method == "signMessage" {
            return Some(RpcError::user_rejected("User rejected the request.").into());
        }
        default_responder(request)
    });

    let err = provider.sign_message("hello", "ecdsa").await.unwrap_err();
    assert!(err.is_user_rejection());
    assert_eq!(RpcError::from(err).code, ErrorCode::UserRejectedRequest);
}

#[tokio::test]
async fn ignores_stale_and_malformed_messages() {
    let (_host, provider, bg) = spawn_provider(quiet_config(), default_responder);
    provider.initialized().await;

    bg.respond(MessageId::random(), ResponseResult::success("stale"));
    bg.send_raw("not json");
    bg.send_raw(r#"{"id": 1}"#);

    assert!(matches!(
        provider.get_accounts().await,
        Err(BridgeError::UnexpectedResponse(_))
    ));
    assert_eq!(
        provider.get_balance().await.unwrap(),
        json!({ "method": "getBalance", "params": null })
    );
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out() {
    let config = BridgeConfig { request_timeout_ms: 100, ..quiet_config() };
    let (_host, provider, _bg) = spawn_provider(config, holding_responder);
    provider.initialized().await;

    assert_eq!(
        provider.request(RequestParams::new("slow")).await,
        Err(BridgeError::Transport(TransportError::Timeout(Duration::from_millis(100))))
    );
}

#[tokio::test]
async fn shutdown_rejects_pending_requests() {
    let (host, provider, mut bg) = spawn_provider(quiet_config(), holding_responder);
    provider.initialized().await;

    let pending = tokio::spawn({
        let provider = provider.clone();
        async move { provider.request(RequestParams::new("slow")).await }
    });
    bg.next_request_for("slow").await;

    host.shutdown().await;

    assert_eq!(pending.await.unwrap(), Err(BridgeError::Transport(TransportError::Closed)));
    assert_eq!(
        provider.get_version().await,
        Err(BridgeError::Transport(TransportError::Closed))
    );
}

#[tokio::test]
async fn page_api_request_shapes() {
    let (_host, provider, mut bg) = spawn_provider(quiet_config(), |request| {
        match request.method.as_str() {
            "sendBitcoin" | "signPsbt" => Some(ResponseResult::success("ok")),
            "multiSignPsbt" => Some(ResponseResult::success(["a", "b"])),
            _ => default_responder(request),
        }
    });
    provider.initialized().await;

    let options = SendBitcoinOptions { fee_rate: Some(2.5), memo: None, memos: None };
    assert_eq!(provider.send_bitcoin(OTHER, 1_000, options).await.unwrap(), "ok");
    let req = bg.next_request_for("sendBitcoin").await;
    assert_eq!(
        req.params.params,
        json!({
            "sendBitcoinParams": { "toAddress": OTHER, "satoshis": 1_000, "feeRate": 2.5 },
            "type": 1,
        })
    );

    let options = json!({ "autoFinalized": false, "toSignInputs": [{ "index": 0 }] });
    assert_eq!(provider.sign_psbt("70736274ff", Some(options.clone())).await.unwrap(), "ok");
    let req = bg.next_request_for("signPsbt").await;
    assert_eq!(
        req.params.params,
        json!({ "psbtHex": "70736274ff", "type": 0, "options": options })
    );

    let signed = provider.sign_psbts(&["00".to_string(), "11".to_string()], None).await.unwrap();
    assert_eq!(signed, vec!["a".to_string(), "b".to_string()]);
    let req = bg.next_request_for("multiSignPsbt").await;
    assert_eq!(req.params.params, json!({ "psbtHexs": ["00", "11"] }));

    provider.get_inscriptions(None, Some(5)).await.unwrap();
    let req = bg.next_request_for("getInscriptions").await;
    assert_eq!(req.params.params, json!({ "cursor": 0, "size": 5 }));

    provider.send_runes(OTHER, "840000:3", "10", None).await.unwrap();
    let req = bg.next_request_for("sendRunes").await;
    assert_eq!(
        req.params.params,
        json!({
            "sendRunesParams": { "toAddress": OTHER, "runeid": "840000:3", "amount": "10" },
            "type": 4,
        })
    );

    provider
        .sign_interaction(json!({ "to": OTHER, "calldata": "deadbeef" }), None)
        .await
        .unwrap();
    let req = bg.next_request_for("signInteraction").await;
    assert_eq!(
        req.params.params,
        json!({ "interactionParameters": { "to": OTHER, "calldata": "deadbeef" } })
    );
}

#[tokio::test]
async fn warns_but_allows_listeners_over_limit() {
    let config = BridgeConfig { max_listeners: 1, ..quiet_config() };
    let (_host, provider, bg) = spawn_provider(config, default_responder);
    provider.initialized().await;

    let mut first = provider.subscribe();
    let mut second = provider.subscribe();
    bg.emit("accountsChanged", json!([OTHER]));

    let expected = ProviderEvent::AccountsChanged(vec![OTHER.to_string()]);
    assert_eq!(next_event(&mut first).await, expected);
    assert_eq!(next_event(&mut second).await, expected);
}
