//! A multi-condition readiness latch.

use std::{collections::BTreeSet, future::Future};
use tokio::sync::watch;

/// Snapshot of a [`ReadyGate`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GateState {
    required: usize,
    satisfied: BTreeSet<u32>,
}

impl GateState {
    pub fn is_ready(&self) -> bool {
        self.satisfied.len() >= self.required
    }

    pub fn satisfied(&self) -> &BTreeSet<u32> {
        &self.satisfied
    }
}

/// Blocks work until `required` independent checks are satisfied.
///
/// Readiness can be revoked at any time with [`ReadyGate::uncheck`]. Work that already passed
/// the gate keeps running, only work admitted later waits.
#[derive(Debug)]
pub struct ReadyGate {
    state: watch::Sender<GateState>,
}

impl ReadyGate {
    pub fn new(required: usize) -> Self {
        let (state, _) = watch::channel(GateState { required, satisfied: BTreeSet::new() });
        Self { state }
    }

    /// Marks condition `id` as satisfied.
    pub fn check(&self, id: u32) {
        self.state.send_if_modified(|state| state.satisfied.insert(id));
    }

    /// Clears condition `id`.
    pub fn uncheck(&self, id: u32) {
        self.state.send_if_modified(|state| state.satisfied.remove(&id));
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    pub fn required(&self) -> usize {
        self.state.borrow().required
    }

    pub fn snapshot(&self) -> GateState {
        self.state.borrow().clone()
    }

    /// Resolves once the gate is ready.
    pub async fn wait_ready(&self) {
        let mut rx = self.state.subscribe();
        // the sender lives in `self`, so this can't fail
        let _ = rx.wait_for(GateState::is_ready).await;
    }

    /// Runs `task` once the gate is ready.
    pub async fn call<F: Future>(&self, task: F) -> F::Output {
        self.wait_ready().await;
        task.await
    }
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new(1)
    }
}
