use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Client visible provider state.
///
/// Only the [`PushEventDispatcher`](crate::PushEventDispatcher) writes it, everything else
/// reads snapshots through a [`StateReader`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderState {
    pub accounts: Option<Vec<String>>,
    pub selected_address: Option<String>,
    pub network: Option<String>,
    pub is_connected: bool,
    pub is_unlocked: bool,
    pub initialized: bool,
    pub is_permanently_disconnected: bool,
}

impl ProviderState {
    /// The accounts visible to the page; empty while disconnected.
    pub fn accounts(&self) -> &[String] {
        if !self.is_connected {
            return &[];
        }
        self.accounts.as_deref().unwrap_or_default()
    }
}

/// Read-only view of the provider state.
#[derive(Clone, Debug)]
pub struct StateReader {
    rx: watch::Receiver<ProviderState>,
}

impl StateReader {
    pub(crate) fn new(rx: watch::Receiver<ProviderState>) -> Self {
        Self { rx }
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> ProviderState {
        self.rx.borrow().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.rx.borrow().initialized
    }

    /// Resolves once the startup sequence completed.
    pub async fn initialized(&self) {
        let mut rx = self.rx.clone();
        // the dispatcher owning the sender outlives every provider handle
        let _ = rx.wait_for(|state| state.initialized).await;
    }

    /// Waits for the next state change and returns the new state.
    ///
    /// Returns `None` once the dispatcher is gone.
    pub async fn changed(&mut self) -> Option<ProviderState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}
