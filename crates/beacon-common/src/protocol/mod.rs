//! Protocol types for beacon-rpc.
//!
//! The wire protocol is a single framed form: a 4-byte big-endian length
//! prefix followed by the UTF-8 JSON serialization of a [`Message`] envelope.
//! The envelope carries numeric type/status codes plus a JSON body whose
//! concrete shape is selected by the message type:
//!
//! - REQUEST / RESPONSE carry [`RpcRequest`] / [`RpcResponse`]
//! - REG_REGISTER / REG_UNREGISTER carry a [`ServiceInfo`]
//! - REG_LOOKUP / REG_RESPONSE carry [`LookupRequest`] / [`LookupResponse`]
//!   (or a plain diagnostic string)
//! - heartbeats carry the strings `"PING"` / `"PONG"`

pub mod error;
pub mod message;
pub mod registry;
pub mod request;

#[cfg(test)]
mod tests;

pub use error::{Result, RpcError};
pub use message::{Message, MessageType, Status, COMPRESS_NONE, SERIALIZATION_JSON};
pub use registry::{service_key, LookupRequest, LookupResponse, ServiceInfo};
pub use request::{RpcRequest, RpcResponse, FAIL_CODE, SUCCESS_CODE};
