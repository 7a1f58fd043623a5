//! MCP Streamable HTTP endpoint handlers.
//!
//! ## Endpoints
//!
//! - `POST /mcp` - Send JSON-RPC requests (returns JSON or SSE)
//! - `OPTIONS /mcp` - CORS preflight
//!
//! Any other method is answered with `405 Method Not Allowed`.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::any::Any;
use tracing::{debug, error, warn};

use crate::mcp::{
    protocol::codes, JsonRpcRequest, JsonRpcResponse, McpError, McpHandler, McpOutcome, McpReply,
    RequestContext,
};
use crate::state::AppState;

/// Header name for MCP session ID.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header a reconnecting client uses to name the last event it saw.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn insert_session_header(resp: &mut Response, session_id: &str) {
    match HeaderValue::from_str(session_id) {
        Ok(hv) => {
            resp.headers_mut()
                .insert(HeaderName::from_static(MCP_SESSION_ID_HEADER), hv);
        }
        Err(_) => warn!("MCP: Session id {:?} is not a valid header value", session_id),
    }
}

fn json_response(status: StatusCode, response: &JsonRpcResponse) -> Response {
    let body = serde_json::to_string(response).unwrap_or_default();
    let mut resp = (status, body).into_response();
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}

fn error_response(id: Option<Value>, err: &McpError) -> Response {
    json_response(err.status(), &err.to_response(id))
}

/// POST /mcp - Handle JSON-RPC requests.
///
/// The `Mcp-Session-Id` header is assigned on initialize and required for
/// subsequent requests. A `Last-Event-ID` header on a non-initialize request
/// turns it into a reconnection.
pub async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request = match JsonRpcRequest::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!("MCP POST: rejected body: {}", e);
            return error_response(None, &e);
        }
    };

    let ctx = RequestContext {
        session_id: header_string(&headers, MCP_SESSION_ID_HEADER),
        last_event_id: header_string(&headers, LAST_EVENT_ID_HEADER),
    };
    debug!(
        "MCP POST: method={}, session={:?}, last_event_id={:?}",
        request.method, ctx.session_id, ctx.last_event_id
    );

    let id = request.id.clone();
    match McpHandler::handle_request(&state, ctx, request).await {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => {
            debug!("MCP POST: {}", e);
            error_response(id, &e)
        }
    }
}

fn outcome_response(outcome: McpOutcome) -> Response {
    let McpOutcome { reply, session_id } = outcome;
    let mut resp = match reply {
        McpReply::Json(response) => json_response(StatusCode::OK, &response),
        McpReply::Accepted => StatusCode::ACCEPTED.into_response(),
        McpReply::Stream(stream) => stream.into_response(),
    };
    if let Some(sid) = session_id {
        insert_session_header(&mut resp, &sid);
    }
    resp
}

/// OPTIONS /mcp - Preflight without CORS headers of its own.
pub async fn mcp_options() -> StatusCode {
    StatusCode::OK
}

/// Fallback for every other HTTP method on /mcp.
pub async fn mcp_method_not_allowed() -> Response {
    let mut resp = (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({"error": "Method not allowed; use POST"})),
    )
        .into_response();
    resp.headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("POST, OPTIONS"));
    resp
}

/// Response for a panic inside a request handler.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("MCP: Request handler panicked: {}", detail);

    let body = JsonRpcResponse::error(None, codes::INTERNAL_ERROR, "Internal error");
    json_response(StatusCode::INTERNAL_SERVER_ERROR, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_string_trims_and_skips_empty() {
        let mut headers = HeaderMap::new();
        headers.insert(MCP_SESSION_ID_HEADER, HeaderValue::from_static(" abc "));
        headers.insert(LAST_EVENT_ID_HEADER, HeaderValue::from_static(""));
        assert_eq!(
            header_string(&headers, MCP_SESSION_ID_HEADER).as_deref(),
            Some("abc")
        );
        assert_eq!(header_string(&headers, LAST_EVENT_ID_HEADER), None);
    }

    #[test]
    fn test_panic_response_is_internal_error() {
        let resp = handle_panic(Box::new("boom"));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
