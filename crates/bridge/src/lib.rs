//! # opwallet-bridge
//!
//! The in-page side of the wallet: a [`Provider`] that pages talk to, relaying requests to
//! the wallet background over a named [`Channel`] and tracking the connection state pushed
//! back by it.
//!
//! Requests are serialized through one FIFO [`RequestQueue`] and held back by a [`ReadyGate`]
//! while the page is hidden. Push events from the background are applied by a single
//! [`PushEventDispatcher`] and re-emitted as [`ProviderEvent`]s.
//!
//! ```no_run
//! use opwallet_bridge::{GlobalScope, Provider, inject, memory_channel};
//! use opwallet_config::BridgeConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (page, _background) = memory_channel();
//! let config = BridgeConfig::default();
//! let host = Provider::builder().config(config.clone()).spawn(page);
//!
//! let scope = GlobalScope::new();
//! inject(&scope, host.provider(), &config, host.shutdown_token())?;
//!
//! let accounts = host.provider().request_accounts().await?;
//! # drop(accounts);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

pub mod api;
pub use api::SendBitcoinOptions;

mod error;
pub use error::{BridgeError, TransportError};

pub mod gate;
pub use gate::{GateState, ReadyGate};

pub mod global;
pub use global::{GlobalError, GlobalScope, inject};

pub mod provider;
pub use provider::{PageInfo, Provider, ProviderBuilder, ProviderHost, VISIBILITY_CHECK, Visibility};

pub mod push;
pub use push::{ChainContext, EventReceiver, InitialState, ProviderEvent, PushEvent, PushEventDispatcher};

pub mod queue;
pub use queue::{Dispatch, PendingRequest, RequestQueue};

pub mod state;
pub use state::{ProviderState, StateReader};

pub mod transport;
pub use transport::{Channel, MemoryPort, MessagePort, memory_channel};
