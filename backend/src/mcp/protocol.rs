//! JSON-RPC 2.0 envelope types and validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::McpError;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol versions this server can speak, oldest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Newest supported protocol version.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Standard JSON-RPC error codes.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// JSON-RPC 2.0 Request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Parse and validate a raw request body.
    ///
    /// Malformed JSON is a parse error; JSON that is not a well-formed
    /// envelope is an invalid request. Whether an `id` is required depends on
    /// the method and is checked by the dispatcher.
    pub fn from_slice(body: &[u8]) -> Result<Self, McpError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| McpError::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    /// Validate an already parsed JSON value as a request envelope.
    pub fn from_value(value: Value) -> Result<Self, McpError> {
        let Value::Object(mut object) = value else {
            return Err(McpError::InvalidRequest(
                "request must be a JSON object".to_string(),
            ));
        };

        match object.get("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(_) => {
                return Err(McpError::InvalidRequest(
                    "jsonrpc must be \"2.0\"".to_string(),
                ))
            }
            None => return Err(McpError::InvalidRequest("missing jsonrpc".to_string())),
        }

        let method = match object.remove("method") {
            Some(Value::String(m)) if !m.is_empty() => m,
            Some(_) => {
                return Err(McpError::InvalidRequest(
                    "method must be a non-empty string".to_string(),
                ))
            }
            None => return Err(McpError::InvalidRequest("missing method".to_string())),
        };

        let id = match object.remove("id") {
            None => None,
            Some(id @ (Value::String(_) | Value::Number(_))) => Some(id),
            Some(_) => {
                return Err(McpError::InvalidRequest(
                    "id must be a string or a number".to_string(),
                ))
            }
        };

        Ok(Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method,
            params: object.remove("params"),
        })
    }

    /// Build a request, mostly useful for collaborators and tests.
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// Whether this message expects no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Name of the tool for a `tools/call` request.
    pub fn tool_name(&self) -> Option<&str> {
        self.params.as_ref()?.get("name")?.as_str()
    }
}

/// JSON-RPC 2.0 Response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC 2.0 Error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Pick the protocol version for a session.
///
/// The requested version wins when supported, otherwise the newest one.
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|v| SUPPORTED_PROTOCOL_VERSIONS.iter().find(|s| **s == v))
        .copied()
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_request() {
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        let request = JsonRpcRequest::from_slice(body).unwrap();
        assert_eq!(request.method, "ping");
        assert_eq!(request.id, Some(json!(1)));
        assert!(!request.is_notification());
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let err = JsonRpcRequest::from_slice(b"{not json").unwrap_err();
        assert_eq!(err.code(), codes::PARSE_ERROR);
    }

    #[test]
    fn test_envelope_validation() {
        let cases = [
            json!([1, 2]),
            json!({"id": 1, "method": "ping"}),
            json!({"jsonrpc": "1.0", "id": 1, "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": 1}),
            json!({"jsonrpc": "2.0", "id": 1, "method": 42}),
            json!({"jsonrpc": "2.0", "id": {"nested": true}, "method": "ping"}),
        ];
        for case in cases {
            let err = JsonRpcRequest::from_value(case.clone()).unwrap_err();
            assert_eq!(err.code(), codes::INVALID_REQUEST, "case: {case}");
        }
    }

    #[test]
    fn test_notification_without_id() {
        let request =
            JsonRpcRequest::from_value(json!({"jsonrpc": "2.0", "method": "initialized"}))
                .unwrap();
        assert!(request.is_notification());
    }

    #[test]
    fn test_tool_name() {
        let request = JsonRpcRequest::new(
            7,
            "tools/call",
            Some(json!({"name": "analyze_project", "arguments": {}})),
        );
        assert_eq!(request.tool_name(), Some("analyze_project"));
        assert_eq!(JsonRpcRequest::new(8, "ping", None).tool_name(), None);
    }

    #[test]
    fn test_negotiate_protocol_version() {
        assert_eq!(negotiate_protocol_version(Some("2024-11-05")), "2024-11-05");
        assert_eq!(
            negotiate_protocol_version(Some("1999-01-01")),
            LATEST_PROTOCOL_VERSION
        );
        assert_eq!(negotiate_protocol_version(None), LATEST_PROTOCOL_VERSION);
    }

    #[test]
    fn test_response_serialization_skips_empty_fields() {
        let response = JsonRpcResponse::success(Some(json!(1)), json!({}));
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("error").is_none());

        let response = JsonRpcResponse::error(None, codes::INTERNAL_ERROR, "boom");
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["id"], Value::Null);
        assert_eq!(json["error"]["code"], -32603);
    }
}
