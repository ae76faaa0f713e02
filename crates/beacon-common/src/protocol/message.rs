use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{Result, RpcError};
use super::registry::{LookupRequest, LookupResponse, ServiceInfo};
use super::request::{RpcRequest, RpcResponse};

/// JSON is the only serialization the framed codec speaks.
pub const SERIALIZATION_JSON: u8 = 1;

/// No compression is applied to frame payloads.
pub const COMPRESS_NONE: u8 = 0;

/// Message kinds carried in the envelope's `messageType` field.
///
/// The numeric values are part of the wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Request = 1,
    Response = 2,
    HeartbeatRequest = 3,
    HeartbeatResponse = 4,
    RegistryRegister = 5,
    RegistryUnregister = 6,
    RegistryLookup = 7,
    RegistryResponse = 8,
}

impl MessageType {
    /// Maps a raw wire code back to a known message type.
    ///
    /// Returns `None` for unknown codes; callers log and discard such
    /// messages rather than closing the connection.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessageType::Request),
            2 => Some(MessageType::Response),
            3 => Some(MessageType::HeartbeatRequest),
            4 => Some(MessageType::HeartbeatResponse),
            5 => Some(MessageType::RegistryRegister),
            6 => Some(MessageType::RegistryUnregister),
            7 => Some(MessageType::RegistryLookup),
            8 => Some(MessageType::RegistryResponse),
            _ => None,
        }
    }
}

/// Envelope status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    Fail = 1,
}

/// The wire envelope.
///
/// Every frame carries exactly one `Message`. The `data` field holds the
/// type-dependent body as raw JSON; the typed accessors below deserialize it
/// once the `messageType` has been inspected. All fields default to
/// zero/empty so envelopes from older peers that omit fields still decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    pub message_type: u8,
    pub serialization_type: u8,
    pub compress_type: u8,
    pub request_id: u64,
    pub status: u8,
    pub data: Value,
}

impl Default for Message {
    fn default() -> Self {
        Message {
            message_type: 0,
            serialization_type: SERIALIZATION_JSON,
            compress_type: COMPRESS_NONE,
            request_id: 0,
            status: Status::Ok as u8,
            data: Value::Null,
        }
    }
}

impl Message {
    fn with_data(kind: MessageType, request_id: u64, data: Value) -> Self {
        Message {
            message_type: kind as u8,
            request_id,
            data,
            ..Message::default()
        }
    }

    /// Builds a REQUEST envelope around an [`RpcRequest`].
    pub fn request(request_id: u64, request: &RpcRequest) -> Result<Self> {
        Ok(Self::with_data(
            MessageType::Request,
            request_id,
            serde_json::to_value(request)?,
        ))
    }

    /// Builds a RESPONSE envelope; status derives from the response code
    /// (200 means OK, anything else FAIL).
    pub fn response(request_id: u64, response: &RpcResponse) -> Result<Self> {
        let mut msg = Self::with_data(
            MessageType::Response,
            request_id,
            serde_json::to_value(response)?,
        );
        msg.status = if response.is_success() {
            Status::Ok as u8
        } else {
            Status::Fail as u8
        };
        Ok(msg)
    }

    pub fn heartbeat_request(request_id: u64) -> Self {
        Self::with_data(
            MessageType::HeartbeatRequest,
            request_id,
            Value::String("PING".into()),
        )
    }

    pub fn heartbeat_response(request_id: u64) -> Self {
        Self::with_data(
            MessageType::HeartbeatResponse,
            request_id,
            Value::String("PONG".into()),
        )
    }

    pub fn register(request_id: u64, info: &ServiceInfo) -> Result<Self> {
        Ok(Self::with_data(
            MessageType::RegistryRegister,
            request_id,
            serde_json::to_value(info)?,
        ))
    }

    pub fn unregister(request_id: u64, info: &ServiceInfo) -> Result<Self> {
        Ok(Self::with_data(
            MessageType::RegistryUnregister,
            request_id,
            serde_json::to_value(info)?,
        ))
    }

    pub fn lookup(request_id: u64, request: &LookupRequest) -> Result<Self> {
        Ok(Self::with_data(
            MessageType::RegistryLookup,
            request_id,
            serde_json::to_value(request)?,
        ))
    }

    /// Builds a successful REG_RESPONSE with an arbitrary body.
    pub fn registry_ok(request_id: u64, data: Value) -> Self {
        Self::with_data(MessageType::RegistryResponse, request_id, data)
    }

    /// Builds a failed REG_RESPONSE carrying a diagnostic message.
    pub fn registry_fail(request_id: u64, message: impl Into<String>) -> Self {
        let mut msg = Self::with_data(
            MessageType::RegistryResponse,
            request_id,
            Value::String(message.into()),
        );
        msg.status = Status::Fail as u8;
        msg
    }

    /// The typed message kind, or `None` if the code is unknown.
    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u8(self.message_type)
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok as u8
    }

    fn decode_data<T: serde::de::DeserializeOwned>(&self, expected: &str) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            RpcError::Protocol(format!(
                "payload mismatch: expected {expected}, got {}: {e}",
                self.data
            ))
        })
    }

    pub fn as_request(&self) -> Result<RpcRequest> {
        self.decode_data("RpcRequest")
    }

    pub fn as_response(&self) -> Result<RpcResponse> {
        self.decode_data("RpcResponse")
    }

    pub fn as_service_info(&self) -> Result<ServiceInfo> {
        self.decode_data("ServiceInfo")
    }

    pub fn as_lookup_request(&self) -> Result<LookupRequest> {
        self.decode_data("RegistryLookupRequest")
    }

    pub fn as_lookup_response(&self) -> Result<LookupResponse> {
        self.decode_data("RegistryLookupResponse")
    }

    /// The diagnostic string carried by FAIL responses and heartbeats.
    pub fn data_as_text(&self) -> String {
        match &self.data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
