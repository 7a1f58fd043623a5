//! Transport-level error taxonomy.

use axum::http::StatusCode;
use serde_json::Value;

use super::protocol::{codes, JsonRpcResponse};

/// Errors surfaced to clients as JSON-RPC error objects.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => codes::PARSE_ERROR,
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidSession(_) => codes::INVALID_PARAMS,
            Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// HTTP status the error is delivered with.
    ///
    /// Errors found before a request reaches a handler are client errors;
    /// the rest are JSON-RPC level errors carried in a successful response.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Parse(_) | Self::InvalidRequest(_) | Self::InvalidSession(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::MethodNotFound(_) | Self::Internal(_) => StatusCode::OK,
        }
    }

    /// Convert into a JSON-RPC error response for the given request id.
    pub fn to_response(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::error(id, self.code(), self.to_string())
    }
}

impl From<super::session::SessionError> for McpError {
    fn from(err: super::session::SessionError) -> Self {
        match err {
            super::session::SessionError::AlreadyExists(_) => {
                Self::InvalidRequest(err.to_string())
            }
            _ => Self::InvalidSession(err.to_string()),
        }
    }
}
