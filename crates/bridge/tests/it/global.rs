use crate::utils::{default_responder, quiet_config, spawn_provider};
use opwallet_bridge::{GlobalError, GlobalScope, inject};
use tokio::sync::broadcast::error::TryRecvError;

#[tokio::test(start_paused = true)]
async fn installs_primary_then_legacy_alias() {
    let config = quiet_config();
    let (host, provider, _bg) = spawn_provider(config.clone(), default_responder);
    let scope = GlobalScope::new();
    let mut events = scope.subscribe_events();

    let aliases = inject(&scope, provider.clone(), &config, host.shutdown_token()).unwrap();

    assert_eq!(events.try_recv().unwrap(), "opnet#initialized");
    assert!(scope.get("opnet").unwrap().ptr_eq(&provider));
    assert_eq!(scope.is_writable("opnet"), Some(false));
    assert!(!scope.contains("unisat"));

    // the primary global can be neither replaced nor removed
    assert!(!scope.assign("opnet", provider.clone()));
    assert_eq!(
        scope.define("opnet", provider.clone(), true),
        Err(GlobalError::ReadOnly("opnet".to_string()))
    );
    assert!(scope.delete("opnet"));
    assert!(scope.contains("opnet"));

    aliases.await.unwrap();

    assert_eq!(events.try_recv().unwrap(), "unisat#initialized");
    assert!(scope.get("unisat").unwrap().ptr_eq(&provider));
    assert_eq!(scope.is_writable("unisat"), Some(true));
}

#[tokio::test(start_paused = true)]
async fn keeps_alias_defined_by_the_page() {
    let config = quiet_config();
    let (host, provider, _bg) = spawn_provider(config.clone(), default_responder);
    let (_other_host, other, _other_bg) = spawn_provider(config.clone(), default_responder);
    let scope = GlobalScope::new();
    assert!(scope.assign("unisat", other.clone()));
    let mut events = scope.subscribe_events();

    inject(&scope, provider, &config, host.shutdown_token()).unwrap().await.unwrap();

    assert_eq!(events.try_recv().unwrap(), "opnet#initialized");
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    assert!(scope.get("unisat").unwrap().ptr_eq(&other));
}

#[tokio::test(start_paused = true)]
async fn shutdown_before_delay_skips_aliases() {
    let config = quiet_config();
    let (host, provider, _bg) = spawn_provider(config.clone(), default_responder);
    let scope = GlobalScope::new();

    let aliases = inject(&scope, provider, &config, host.shutdown_token()).unwrap();
    host.shutdown().await;
    aliases.await.unwrap();

    assert!(scope.contains("opnet"));
    assert!(!scope.contains("unisat"));
}
