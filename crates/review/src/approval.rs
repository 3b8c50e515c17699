//! The approval state machine of a single signing request.
//!
//! A session starts in [`ApprovalPhase::Loading`] and resolves exactly once, either by
//! delivering a [`SignedPsbt`] or a user-rejected [`RpcError`] to the originating request.

use crate::{
    error::{ApprovalError, ReviewError},
    service::PreparedReview,
};
use opwallet_rpc::{RpcError, TxType};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

const USER_REJECTED: &str = "User rejected the request.";

/// The payload a confirmed approval resolves with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPsbt {
    pub psbt_hex: String,
    /// Whether the PSBT is already signed; `false` asks the background to sign it before
    /// returning it to the page
    pub signed: bool,
}

pub type ApprovalResult = Result<SignedPsbt, RpcError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    Confirmed,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalPhase {
    /// The transaction is being decoded and analyzed.
    Loading,
    Ready {
        acknowledged: bool,
    },
    /// Confirmation was requested while risks are unacknowledged.
    RiskPending,
    /// Waiting for a hardware or air-gapped signer.
    ExternalSigning,
    /// Scam detected; rejecting is the only way out.
    Blocked,
    Resolved(Resolution),
}

impl ApprovalPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Ready { .. } => "ready",
            Self::RiskPending => "risks are pending acknowledgement",
            Self::ExternalSigning => "waiting for the external signer",
            Self::Blocked => "blocked",
            Self::Resolved(_) => "resolved",
        }
    }
}

/// Outcome of [`ApprovalSession::confirm`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmStep {
    /// The approval resolved with this payload.
    Resolved(SignedPsbt),
    /// The risk popover must be shown and acknowledged first.
    RiskPending,
    /// The PSBT has been handed to an external signer.
    ExternalSigning,
}

/// Drives one approval from loading to resolution.
///
/// Dropping an unresolved session rejects the originating request.
#[derive(Debug)]
pub struct ApprovalSession {
    phase: ApprovalPhase,
    prepared: Option<PreparedReview>,
    acknowledged: bool,
    responder: Option<oneshot::Sender<ApprovalResult>>,
}

// === impl ApprovalSession ===

impl ApprovalSession {
    /// Creates a loading session and the receiver its result is delivered to.
    pub fn new() -> (Self, oneshot::Receiver<ApprovalResult>) {
        let (tx, rx) = oneshot::channel();
        let session =
            Self { phase: ApprovalPhase::Loading, prepared: None, acknowledged: false, responder: Some(tx) };
        (session, rx)
    }

    pub fn phase(&self) -> ApprovalPhase {
        self.phase
    }

    pub fn prepared(&self) -> Option<&PreparedReview> {
        self.prepared.as_ref()
    }

    /// Completes the loading phase.
    ///
    /// A failed preparation rejects the request with the underlying error.
    pub fn on_loaded(
        &mut self,
        result: Result<PreparedReview, ReviewError>,
    ) -> Result<ApprovalPhase, ApprovalError> {
        if self.phase != ApprovalPhase::Loading {
            return Err(self.invalid("load"));
        }
        match result {
            Ok(prepared) => {
                self.phase = if prepared.review.is_scam_flagged {
                    warn!(target: "approval", "scam detected, blocking approval");
                    ApprovalPhase::Blocked
                } else {
                    ApprovalPhase::Ready { acknowledged: false }
                };
                self.prepared = Some(prepared);
            }
            Err(err) => {
                debug!(target: "approval", %err, "failed to prepare review");
                self.resolve(Resolution::Rejected, Err(err.into()));
            }
        }
        Ok(self.phase)
    }

    /// Handles the confirm button.
    pub fn confirm(&mut self) -> Result<ConfirmStep, ApprovalError> {
        match self.phase {
            ApprovalPhase::Ready { .. } => {}
            ApprovalPhase::Loading => return Err(ApprovalError::NotReady),
            ApprovalPhase::Blocked => return Err(ApprovalError::ScamDetected),
            ApprovalPhase::RiskPending => return Err(ApprovalError::RiskAcknowledgementRequired),
            ApprovalPhase::Resolved(_) => return Err(ApprovalError::AlreadyResolved),
            ApprovalPhase::ExternalSigning => return Err(self.invalid("confirm")),
        }
        let Some(prepared) = &self.prepared else { return Err(ApprovalError::NotReady) };
        prepared.review.ensure_valid()?;

        if prepared.review.requires_risk_acknowledgement() && !self.acknowledged {
            trace!(target: "approval", flags = ?prepared.review.risk_flags, "risks pending");
            self.phase = ApprovalPhase::RiskPending;
            return Ok(ConfirmStep::RiskPending);
        }

        if prepared.keyring.is_external() {
            trace!(target: "approval", "handing psbt to external signer");
            self.phase = ApprovalPhase::ExternalSigning;
            return Ok(ConfirmStep::ExternalSigning);
        }

        let signed =
            SignedPsbt { psbt_hex: prepared.psbt_hex.clone(), signed: prepared.review.kind != TxType::SignTx };
        self.resolve(Resolution::Confirmed, Ok(signed.clone()));
        Ok(ConfirmStep::Resolved(signed))
    }

    /// Accepts the risks shown in the popover; the next confirm proceeds.
    pub fn acknowledge_risks(&mut self) -> Result<(), ApprovalError> {
        if self.phase != ApprovalPhase::RiskPending {
            return Err(self.invalid("acknowledge"));
        }
        self.acknowledged = true;
        self.phase = ApprovalPhase::Ready { acknowledged: true };
        Ok(())
    }

    /// Closes the risk popover without acknowledging.
    pub fn dismiss_risks(&mut self) -> Result<(), ApprovalError> {
        if self.phase != ApprovalPhase::RiskPending {
            return Err(self.invalid("dismiss"));
        }
        self.phase = ApprovalPhase::Ready { acknowledged: false };
        Ok(())
    }

    /// Resolves with the PSBT returned by the external signer.
    pub fn on_external_signed(&mut self, psbt_hex: impl Into<String>) -> Result<SignedPsbt, ApprovalError> {
        if self.phase != ApprovalPhase::ExternalSigning {
            return Err(self.invalid("external signature"));
        }
        let signed = SignedPsbt { psbt_hex: psbt_hex.into(), signed: true };
        self.resolve(Resolution::Confirmed, Ok(signed.clone()));
        Ok(signed)
    }

    /// Leaves the external signing flow.
    pub fn back_from_external(&mut self) -> Result<(), ApprovalError> {
        if self.phase != ApprovalPhase::ExternalSigning {
            return Err(self.invalid("back"));
        }
        self.phase = ApprovalPhase::Ready { acknowledged: self.acknowledged };
        Ok(())
    }

    /// Rejects the request. Available from every non-terminal phase.
    pub fn reject(&mut self) -> Result<(), ApprovalError> {
        if self.phase.is_terminal() {
            return Err(ApprovalError::AlreadyResolved);
        }
        self.resolve(Resolution::Rejected, Err(RpcError::user_rejected(USER_REJECTED)));
        Ok(())
    }

    fn resolve(&mut self, resolution: Resolution, result: ApprovalResult) {
        self.phase = ApprovalPhase::Resolved(resolution);
        debug!(target: "approval", ?resolution, "approval resolved");
        if let Some(responder) = self.responder.take()
            && responder.send(result).is_err()
        {
            trace!(target: "approval", "requester went away before resolution");
        }
    }

    fn invalid(&self, action: &'static str) -> ApprovalError {
        ApprovalError::InvalidTransition { action, phase: self.phase.describe() }
    }
}

impl Drop for ApprovalSession {
    fn drop(&mut self) {
        if let Some(responder) = self.responder.take() {
            debug!(target: "approval", phase = ?self.phase, "dropping unresolved approval");
            let _ = responder.send(Err(RpcError::user_rejected(USER_REJECTED)));
        }
    }
}
