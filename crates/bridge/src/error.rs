use opwallet_rpc::RpcError;
use std::time::Duration;

/// Failure of the channel between page and background.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to encode message: {0}")]
    Encode(String),
    #[error("failed to decode message: {0}")]
    Decode(String),
    #[error("port error: {0}")]
    Port(String),
}

/// Errors surfaced to callers of the provider.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The request carried no payload or no method.
    #[error("invalid request")]
    InvalidRequest,
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The background answered with an error.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl BridgeError {
    /// Returns true if the user declined the request.
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, Self::Rpc(err) if err.is_user_rejection())
    }
}

impl From<BridgeError> for RpcError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::InvalidRequest => Self::invalid_request(),
            BridgeError::Rpc(err) => err,
            BridgeError::Transport(TransportError::Closed) => Self::disconnected(),
            err => Self::internal_error_with(err.to_string()),
        }
    }
}
