//! # opwallet-rpc
//!
//! Wire types shared by the in-page provider bridge and the wallet background: channel
//! messages, request parameters and structured provider errors.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod error;
pub mod message;
pub mod request;

pub use error::{ErrorCode, RpcError};
pub use message::{
    ChannelMessage, Direction, EventMessage, MessageId, RequestMessage, ResponseMessage,
    ResponseResult,
};
pub use request::{RequestParams, TxType};
