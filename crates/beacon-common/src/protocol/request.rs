use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::service_key;

/// Response code reported for successful calls.
pub const SUCCESS_CODE: i32 = 200;

/// Response code reported for failed calls.
pub const FAIL_CODE: i32 = 500;

/// A call to a named method of a named service.
///
/// `parameter_types` carries the canonical JSON type name of each positional
/// parameter ("string", "number", "boolean", "array", "object", "null") in
/// the same order as `parameters`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcRequest {
    pub service_name: String,
    pub method_name: String,
    pub parameter_types: Vec<String>,
    pub parameters: Vec<Value>,
    pub version: Option<String>,
    pub group: Option<String>,
}

impl RpcRequest {
    pub fn new(
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        parameters: Vec<Value>,
        version: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        let parameter_types = parameters.iter().map(|v| json_type_name(v).into()).collect();
        RpcRequest {
            service_name: service_name.into(),
            method_name: method_name.into(),
            parameter_types,
            parameters,
            version: Some(version.into()),
            group: Some(group.into()),
        }
    }

    /// The service key this request targets, derived with the same
    /// normalization the registry uses.
    pub fn service_key(&self) -> String {
        service_key(
            &self.service_name,
            self.version.as_deref(),
            self.group.as_deref(),
        )
    }
}

/// Canonical type name for a JSON value, used to fill `parameter_types`.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The application-level result of a call.
///
/// A missing code is tolerated on decode; the provider coerces it to
/// [`FAIL_CODE`] before the response leaves the process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcResponse {
    pub code: Option<i32>,
    pub message: Option<String>,
    pub data: Value,
}

impl RpcResponse {
    pub fn success(data: Value) -> Self {
        RpcResponse {
            code: Some(SUCCESS_CODE),
            message: Some("call succeeded".into()),
            data,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        RpcResponse {
            code: Some(FAIL_CODE),
            message: Some(message.into()),
            data: Value::Null,
        }
    }

    /// Code comparison is by value; only an explicit 200 counts as success.
    pub fn is_success(&self) -> bool {
        self.code == Some(SUCCESS_CODE)
    }

    pub fn message_or_default(&self) -> String {
        self.message.clone().unwrap_or_else(|| "unknown error".into())
    }
}
