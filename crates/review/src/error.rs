use opwallet_rpc::RpcError;

/// A transaction or signing request that must not reach the approval screen.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed PSBT: {0}")]
    MalformedPsbt(String),
    #[error("input #{index} is missing its previous output")]
    MissingUtxo { index: usize },
    #[error("outputs ({outputs} sats) exceed inputs ({inputs} sats)")]
    NegativeFee { inputs: u64, outputs: u64 },
    #[error("reported fee of {reported} sats does not match the implied fee of {implied} sats")]
    FeeMismatch { reported: u64, implied: u64 },
    #[error("input index {index} is out of range for a transaction with {count} inputs")]
    InputOutOfRange { index: usize, count: usize },
    #[error("input #{0} is listed more than once")]
    DuplicateInput(usize),
    #[error("input #{index}: address {address} does not belong to the current account")]
    AddressMismatch { index: usize, address: String },
    #[error("input #{index}: public key {public_key} does not belong to the current account")]
    PublicKeyMismatch { index: usize, public_key: String },
    #[error("the transaction has no inputs to sign")]
    NothingToSign,
}

/// Errors produced while preparing a transaction for review.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReviewError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("signing service failed: {0}")]
    Service(String),
}

impl ReviewError {
    pub fn service(err: impl std::fmt::Display) -> Self {
        Self::Service(err.to_string())
    }
}

impl From<ReviewError> for RpcError {
    fn from(err: ReviewError) -> Self {
        match err {
            ReviewError::Validation(err) => Self::invalid_params(err.to_string()),
            ReviewError::Service(msg) => Self::internal_error_with(msg),
        }
    }
}

/// Illegal actions on an approval session.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("malicious behavior and suspicious activity have been detected")]
    ScamDetected,
    #[error("the risks of this transaction must be acknowledged first")]
    RiskAcknowledgementRequired,
    #[error("the user rejected the request")]
    SigningDeclined,
    #[error("the transaction is still being analyzed")]
    NotReady,
    #[error("the approval has already been resolved")]
    AlreadyResolved,
    #[error("{action} is not available while {phase}")]
    InvalidTransition { action: &'static str, phase: &'static str },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<ApprovalError> for RpcError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::SigningDeclined => Self::user_rejected("User rejected the request."),
            ApprovalError::Validation(err) => Self::invalid_params(err.to_string()),
            err => Self::internal_error_with(err.to_string()),
        }
    }
}
