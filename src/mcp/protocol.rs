// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! MCP Protocol Types
//!
//! JSON-RPC 2.0 envelopes exchanged with clients and backends, plus the
//! flattened envelope returned to plain HTTP clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

// =============================================================================
// Request Types
// =============================================================================

/// JSON-RPC request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Fresh identifier for requests synthesized by the gateway.
    pub fn generate() -> Self {
        RequestId::String(uuid::Uuid::new_v4().to_string())
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

/// Canonical request forwarded to backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,

    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    pub fn new(id: Option<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Validate an arbitrary JSON value against the canonical shape.
    ///
    /// Requires `jsonrpc == "2.0"`, a string `method` and, when present,
    /// a string or integer `id`.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "request must be a JSON object".to_string())?;

        match obj.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            _ => return Err("jsonrpc must be \"2.0\"".to_string()),
        }

        let method = obj
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| "method must be a string".to_string())?;

        let id = match obj.get("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<RequestId>(raw.clone())
                    .map_err(|_| "id must be a string or an integer".to_string())?,
            ),
        };

        Ok(Self::new(id, method, obj.get("params").cloned()))
    }
}

/// Convenience shape accepted on `POST /mcp`: `{action, resource, params}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacyRequest {
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl LegacyRequest {
    /// `"<resource>/<action>"` with a generated id.
    pub fn into_canonical(self) -> McpRequest {
        McpRequest::new(
            Some(RequestId::generate()),
            format!("{}/{}", self.resource, self.action),
            self.params,
        )
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Canonical response. Exactly one of `result` / `error` is serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,

    #[serde(default)]
    pub id: Option<RequestId>,

    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(RpcError),
}

impl McpResponse {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn failure(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Outcome::Error(error),
        }
    }

    pub fn error(&self) -> Option<&RpcError> {
        match &self.outcome {
            Outcome::Error(e) => Some(e),
            Outcome::Result(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error().is_some()
    }
}

// =============================================================================
// Error Types
// =============================================================================

/// JSON-RPC 2.0 reserved error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
        }
    }
}

/// Error object carried in a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, ErrorCode::ParseError.message()).with_data(detail.into())
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, ErrorCode::InvalidRequest.message())
            .with_data(detail.into())
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {}", method),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

// =============================================================================
// HTTP Envelope
// =============================================================================

/// Flattened response returned by `POST /mcp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpEnvelope {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

impl HttpEnvelope {
    /// Failure raised before a canonical response exists.
    pub fn failure(message: impl Into<String>, code: Option<i32>) -> Self {
        Self {
            success: false,
            data: None,
            id: None,
            error: Some(message.into()),
            code,
            session_token: None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_response_serialization() {
        let response = McpResponse::success(Some(1.into()), json!({"ok": true}));
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 1);
        assert_eq!(value["result"]["ok"], true);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_error_response_serialization() {
        let response = McpResponse::failure(None, RpcError::parse_error("eof"));
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], -32700);
        assert_eq!(value["error"]["message"], "Parse error");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_backend_response_deserialization() {
        let response: McpResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":"abc","error":{"code":-32602,"message":"bad"}}"#,
        )
        .unwrap();

        assert_eq!(response.id, Some(RequestId::from("abc")));
        assert_eq!(response.error().map(|e| e.code), Some(-32602));
    }

    #[test]
    fn test_canonical_from_value() {
        let request =
            McpRequest::from_value(&json!({"jsonrpc": "2.0", "id": 7, "method": "fs/read"}))
                .unwrap();
        assert_eq!(request.id, Some(RequestId::Number(7)));
        assert_eq!(request.method, "fs/read");
        assert!(request.params.is_none());
    }

    #[test]
    fn test_canonical_rejects_bad_shapes() {
        assert!(McpRequest::from_value(&json!({"jsonrpc": "1.0", "method": "x"})).is_err());
        assert!(McpRequest::from_value(&json!({"jsonrpc": "2.0", "method": 5})).is_err());
        assert!(
            McpRequest::from_value(&json!({"jsonrpc": "2.0", "method": "x", "id": {}})).is_err()
        );
        assert!(McpRequest::from_value(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_legacy_into_canonical() {
        let legacy = LegacyRequest {
            action: "create".to_string(),
            resource: "issues".to_string(),
            params: Some(json!({"title": "x"})),
        };
        let request = legacy.into_canonical();

        assert_eq!(request.jsonrpc, "2.0");
        assert_eq!(request.method, "issues/create");
        assert_eq!(request.params, Some(json!({"title": "x"})));
        assert!(matches!(request.id, Some(RequestId::String(_))));
    }

    #[test]
    fn test_envelope_skips_empty_fields() {
        let json = serde_json::to_string(&HttpEnvelope::failure("boom", None)).unwrap();
        assert_eq!(json, r#"{"success":false,"error":"boom"}"#);
    }
}
