//! Installation of the provider into the page's global scope.

use crate::provider::Provider;
use opwallet_config::BridgeConfig;
use parking_lot::RwLock;
use std::{collections::BTreeMap, fmt, sync::Arc};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Errors raised when installing a global.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GlobalError {
    #[error("cannot redefine read-only global `{0}`")]
    ReadOnly(String),
}

#[derive(Clone)]
struct Slot {
    provider: Provider,
    writable: bool,
}

struct ScopeInner {
    slots: RwLock<BTreeMap<String, Slot>>,
    events: broadcast::Sender<String>,
}

/// A model of the page's global object, holding named provider handles and relaying
/// window events such as `opnet#initialized`.
#[derive(Clone)]
pub struct GlobalScope {
    inner: Arc<ScopeInner>,
}

// === impl GlobalScope ===

impl GlobalScope {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self { inner: Arc::new(ScopeInner { slots: Default::default(), events }) }
    }

    /// Defines `name`, replacing any writable value.
    pub fn define(&self, name: &str, provider: Provider, writable: bool) -> Result<(), GlobalError> {
        let mut slots = self.inner.slots.write();
        if slots.get(name).is_some_and(|slot| !slot.writable) {
            return Err(GlobalError::ReadOnly(name.to_string()));
        }
        slots.insert(name.to_string(), Slot { provider, writable });
        Ok(())
    }

    /// Plain assignment. Returns false if `name` is read-only.
    pub fn assign(&self, name: &str, provider: Provider) -> bool {
        let mut slots = self.inner.slots.write();
        match slots.get_mut(name) {
            Some(slot) if !slot.writable => {
                trace!(target: "global", name, "ignoring assignment to read-only global");
                false
            }
            Some(slot) => {
                slot.provider = provider;
                true
            }
            None => {
                slots.insert(name.to_string(), Slot { provider, writable: true });
                true
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Provider> {
        self.inner.slots.read().get(name).map(|slot| slot.provider.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.slots.read().contains_key(name)
    }

    pub fn is_writable(&self, name: &str) -> Option<bool> {
        self.inner.slots.read().get(name).map(|slot| slot.writable)
    }

    /// Deleting an installed provider reports success but leaves it in place.
    pub fn delete(&self, name: &str) -> bool {
        trace!(target: "global", name, "ignoring delete");
        true
    }

    pub fn dispatch_event(&self, event: impl Into<String>) {
        let event = event.into();
        trace!(target: "global", %event, "dispatching window event");
        let _ = self.inner.events.send(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<String> {
        self.inner.events.subscribe()
    }
}

impl Default for GlobalScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GlobalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.inner.slots.read();
        f.debug_map().entries(slots.iter().map(|(name, slot)| (name, slot.writable))).finish()
    }
}

/// Installs `provider` under the configured global name and, after the configured delay,
/// under each legacy alias that the page has not defined itself.
///
/// The primary global is read-only. Each installation fires `<name>#initialized`.
pub fn inject(
    scope: &GlobalScope,
    provider: Provider,
    config: &BridgeConfig,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, GlobalError> {
    scope.define(&config.global_name, provider.clone(), false)?;
    debug!(target: "global", name = %config.global_name, "installed provider");
    scope.dispatch_event(format!("{}#initialized", config.global_name));

    let scope = scope.clone();
    let aliases = config.legacy_aliases.clone();
    let delay = config.legacy_alias_delay();
    Ok(tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        for alias in aliases {
            if scope.contains(&alias) {
                debug!(target: "global", %alias, "legacy alias already defined, skipping");
                continue;
            }
            if scope.define(&alias, provider.clone(), true).is_ok() {
                debug!(target: "global", %alias, "installed legacy alias");
                scope.dispatch_event(format!("{alias}#initialized"));
            }
        }
    }))
}
