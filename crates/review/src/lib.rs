//! # opwallet-review
//!
//! Turns a partially signed transaction into what the user approves: decoded inputs and
//! outputs, balance deltas for the active account, the exact set of inputs the local key has
//! to sign and the risk conditions that must block or warn before confirmation.
//!
//! The engine never signs. Keys live behind [`SigningService`].

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

#[macro_use]
extern crate tracing;

pub mod analyze;
pub use analyze::{BalanceSummary, FeeRateWarning, TxAnalyzer, TxReview, analyze};

pub mod approval;
pub use approval::{ApprovalPhase, ApprovalResult, ApprovalSession, ConfirmStep, Resolution, SignedPsbt};

pub mod decode;
pub use decode::PsbtDecoder;

mod error;
pub use error::{ApprovalError, ReviewError, ValidationError};

pub mod price;
pub use price::{PriceOracle, Valuation, value_review};

pub mod service;
pub use service::{PreparedReview, ReviewRequest, Reviewer, SigningService};

pub mod signers;

pub mod types;
pub use types::{
    AccountContext, DecodedPsbt, InputInfo, KeyringKind, OutputInfo, Risk, RiskAssessment,
    RiskKind, RiskLevel, SignPsbtOptions, ToSignInput, ToSignInputOption, TxFeatures,
};

pub use opwallet_rpc::TxType;
