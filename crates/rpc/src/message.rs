//! Messages exchanged over a named page/background channel.

use crate::{error::RpcError, request::RequestParams};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier correlating a request with its response.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

// === impl MessageId ===

impl MessageId {
    /// Generates a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for MessageId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Direction of a [`ChannelMessage`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
    Event,
}

/// A request sent from the page to the background.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub id: MessageId,
    #[serde(flatten)]
    pub params: RequestParams,
}

/// A reply to a [`RequestMessage`], carrying the same id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub id: MessageId,
    #[serde(flatten)]
    pub result: ResponseResult,
}

impl ResponseMessage {
    pub fn new(id: MessageId, result: impl Into<ResponseResult>) -> Self {
        Self { id, result: result.into() }
    }
}

/// An unsolicited push event, not paired with any request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EventMessage {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self { event: event.into(), data }
    }
}

/// Any message travelling over the channel.
///
/// The variant is determined by the shape of the payload: requests carry an `id` and a
/// `method`, responses an `id` and either `result` or `error`, events an `event` name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelMessage {
    Request(RequestMessage),
    Response(ResponseMessage),
    Event(EventMessage),
}

impl ChannelMessage {
    /// Returns the direction of this message.
    pub fn direction(&self) -> Direction {
        match self {
            Self::Request(_) => Direction::Request,
            Self::Response(_) => Direction::Response,
            Self::Event(_) => Direction::Event,
        }
    }

    /// Returns the correlation id, events have none.
    pub fn id(&self) -> Option<MessageId> {
        match self {
            Self::Request(req) => Some(req.id),
            Self::Response(resp) => Some(resp.id),
            Self::Event(_) => None,
        }
    }
}

impl From<RequestMessage> for ChannelMessage {
    fn from(msg: RequestMessage) -> Self {
        Self::Request(msg)
    }
}

impl From<ResponseMessage> for ChannelMessage {
    fn from(msg: ResponseMessage) -> Self {
        Self::Response(msg)
    }
}

impl From<EventMessage> for ChannelMessage {
    fn from(msg: EventMessage) -> Self {
        Self::Event(msg)
    }
}

/// Represents the result of a call either success or error
#[derive(Debug, PartialEq, Clone, Deserialize, Serialize)]
pub enum ResponseResult {
    #[serde(rename = "result")]
    Success(serde_json::Value),
    #[serde(rename = "error")]
    Error(RpcError),
}

impl ResponseResult {
    pub fn success<S>(content: S) -> Self
    where
        S: Serialize,
    {
        match serde_json::to_value(&content) {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Error(RpcError::internal_error_with(err.to_string())),
        }
    }

    pub fn error(error: RpcError) -> Self {
        Self::Error(error)
    }

    /// Converts into a `Result`.
    pub fn into_result(self) -> Result<serde_json::Value, RpcError> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Error(err) => Err(err),
        }
    }
}

impl From<RpcError> for ResponseResult {
    fn from(err: RpcError) -> Self {
        Self::error(err)
    }
}

impl From<Result<serde_json::Value, RpcError>> for ResponseResult {
    fn from(res: Result<serde_json::Value, RpcError>) -> Self {
        match res {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Error(err),
        }
    }
}
