use crate::error::RpcError;
use serde::{Deserialize, Serialize};

/// A method call issued by page code.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl RequestParams {
    /// Creates a request without parameters.
    pub fn new(method: impl Into<String>) -> Self {
        Self { method: method.into(), params: serde_json::Value::Null }
    }

    /// Creates a request with the given parameters.
    pub fn with_params(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self { method: method.into(), params }
    }

    /// Parses an untyped page payload.
    ///
    /// Anything that is not an object with a non-empty `method` is an invalid request.
    pub fn from_value(payload: serde_json::Value) -> Result<Self, RpcError> {
        if !payload.is_object() {
            return Err(RpcError::invalid_request());
        }
        let request: Self =
            serde_json::from_value(payload).map_err(|_| RpcError::invalid_request())?;
        request.validate()?;
        Ok(request)
    }

    /// Ensures the request names a method.
    pub fn validate(&self) -> Result<(), RpcError> {
        if self.method.trim().is_empty() {
            return Err(RpcError::invalid_request());
        }
        Ok(())
    }
}

/// The kind of transaction a page asks the wallet to approve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TxType {
    /// Sign an arbitrary PSBT supplied by the page.
    SignTx,
    /// Plain bitcoin transfer built by the wallet.
    SendBitcoin,
    SendOrdinalsInscription,
    SendAtomicalsInscription,
    SendRunes,
}

impl TxType {
    /// Returns true for the generic signing request, whose signable inputs are chosen by the
    /// caller rather than by the wallet.
    pub const fn is_generic_signing(&self) -> bool {
        matches!(self, Self::SignTx)
    }
}

impl From<TxType> for u8 {
    fn from(kind: TxType) -> Self {
        match kind {
            TxType::SignTx => 0,
            TxType::SendBitcoin => 1,
            TxType::SendOrdinalsInscription => 2,
            TxType::SendAtomicalsInscription => 3,
            TxType::SendRunes => 4,
        }
    }
}

impl TryFrom<u8> for TxType {
    type Error = UnknownTxType;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::SignTx,
            1 => Self::SendBitcoin,
            2 => Self::SendOrdinalsInscription,
            3 => Self::SendAtomicalsInscription,
            4 => Self::SendRunes,
            other => return Err(UnknownTxType(other)),
        })
    }
}

/// Error returned for an out of range [`TxType`] discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown transaction type {0}")]
pub struct UnknownTxType(pub u8);
