//! MCP request dispatch.
//!
//! Takes a validated JSON-RPC envelope plus the transport headers and
//! decides how it is answered: a JSON response, a bare `202 Accepted` for
//! notifications, or an SSE stream for long-running tool calls.
//!
//! Checks run in a fixed order and every transport error is raised before
//! any session state changes: `initialize` is handled on its own, a
//! `Last-Event-ID` turns the request into a reconnection, then the session
//! is validated, then the method is looked up.

use serde_json::{json, Value};
use tether_types::ClientInfo;
use tracing::{debug, info, warn};

use super::error::McpError;
use super::executor::ProgressReporter;
use super::protocol::{codes, negotiate_protocol_version, JsonRpcRequest, JsonRpcResponse};
use super::reconnect;
use super::session::{InitParams, SessionError, SessionStore};
use super::streaming::{self, EventStream};
use crate::state::AppState;

/// Longest client-chosen session id accepted on `initialize`.
const MAX_SESSION_ID_LEN: usize = 128;

/// Methods understood by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpMethod {
    Initialize,
    Initialized,
    Cancelled,
    Ping,
    ToolsList,
    ToolsCall,
    ResourcesList,
    ResourcesRead,
    ElicitationRequest,
}

const METHODS: &[(&str, McpMethod)] = &[
    ("initialize", McpMethod::Initialize),
    ("initialized", McpMethod::Initialized),
    ("notifications/initialized", McpMethod::Initialized),
    ("notifications/cancelled", McpMethod::Cancelled),
    ("ping", McpMethod::Ping),
    ("tools/list", McpMethod::ToolsList),
    ("tools/call", McpMethod::ToolsCall),
    ("resources/list", McpMethod::ResourcesList),
    ("resources/read", McpMethod::ResourcesRead),
    ("elicitation/request", McpMethod::ElicitationRequest),
];

impl McpMethod {
    pub fn lookup(name: &str) -> Option<Self> {
        METHODS
            .iter()
            .find(|(method, _)| *method == name)
            .map(|(_, m)| *m)
    }

    /// Methods that may be sent without an `id`.
    pub fn is_notification(self) -> bool {
        matches!(self, Self::Initialized | Self::Cancelled)
    }
}

/// Transport headers relevant to dispatch.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// `Mcp-Session-Id`
    pub session_id: Option<String>,
    /// `Last-Event-ID`
    pub last_event_id: Option<String>,
}

/// How a request is answered.
pub enum McpReply {
    Json(JsonRpcResponse),
    /// Notification acknowledged with no body
    Accepted,
    Stream(EventStream),
}

/// Reply plus the session id to echo in the `Mcp-Session-Id` header.
pub struct McpOutcome {
    pub reply: McpReply,
    pub session_id: Option<String>,
}

impl McpOutcome {
    fn new(reply: McpReply, session_id: impl Into<Option<String>>) -> Self {
        Self {
            reply,
            session_id: session_id.into(),
        }
    }
}

/// MCP request handler.
pub struct McpHandler;

impl McpHandler {
    /// Handle one JSON-RPC request.
    pub async fn handle_request(
        state: &AppState,
        ctx: RequestContext,
        request: JsonRpcRequest,
    ) -> Result<McpOutcome, McpError> {
        let method = McpMethod::lookup(&request.method);

        if request.is_notification() && !method.is_some_and(McpMethod::is_notification) {
            return Err(McpError::InvalidRequest(format!(
                "id is required for {}",
                request.method
            )));
        }

        if method == Some(McpMethod::Initialize) {
            return Self::handle_initialize(state, ctx.session_id, request).await;
        }

        let session_id = ctx.session_id.ok_or_else(|| {
            McpError::InvalidSession("missing Mcp-Session-Id header".to_string())
        })?;

        if let Some(last_event_id) = ctx.last_event_id {
            return Self::handle_reconnect(state.sessions(), session_id, &last_event_id, request)
                .await;
        }

        let Some(method) = method else {
            // Session problems take precedence over unknown methods
            state.sessions().lock_initialized(&session_id).await?;
            return Err(McpError::MethodNotFound(request.method));
        };

        match method {
            McpMethod::Initialize => {
                Self::handle_initialize(state, Some(session_id), request).await
            }
            McpMethod::Initialized => {
                {
                    let mut session = state.sessions().lock(&session_id).await?;
                    session.mark_initialized();
                    session.touch();
                }
                info!("MCP: Session {} initialized", session_id);
                Ok(Self::acknowledge(request, session_id))
            }
            McpMethod::Cancelled => {
                state.sessions().lock_initialized(&session_id).await?.touch();
                debug!(
                    "MCP: Cancellation noted for session {}: {:?}",
                    session_id, request.params
                );
                Ok(Self::acknowledge(request, session_id))
            }
            McpMethod::Ping => {
                state.sessions().lock_initialized(&session_id).await?.touch();
                let response = JsonRpcResponse::success(request.id, json!({}));
                Ok(McpOutcome::new(McpReply::Json(response), session_id))
            }
            McpMethod::ToolsCall => {
                let session = state
                    .sessions()
                    .get(&session_id)
                    .await
                    .ok_or_else(|| SessionError::NotFound(session_id.clone()))?;
                {
                    let mut guard = session.lock().await;
                    if !guard.is_initialized() {
                        return Err(SessionError::NotInitialized(session_id).into());
                    }
                    guard.touch();
                }

                match request.tool_name().map(str::to_string) {
                    Some(tool) if state.streaming().is_streaming_tool(&tool) => {
                        let stream = streaming::open_stream(state, session, request, tool).await;
                        Ok(McpOutcome::new(McpReply::Stream(stream), session_id))
                    }
                    _ => Ok(Self::delegate(state, request, session_id).await),
                }
            }
            McpMethod::ToolsList
            | McpMethod::ResourcesList
            | McpMethod::ResourcesRead
            | McpMethod::ElicitationRequest => {
                state.sessions().lock_initialized(&session_id).await?.touch();
                Ok(Self::delegate(state, request, session_id).await)
            }
        }
    }

    /// Create a session and answer with the negotiated parameters.
    async fn handle_initialize(
        state: &AppState,
        requested_id: Option<String>,
        request: JsonRpcRequest,
    ) -> Result<McpOutcome, McpError> {
        if let Some(id) = &requested_id {
            validate_session_id(id)?;
        }
        let params = request.params.clone().unwrap_or(json!({}));

        let protocol_version =
            negotiate_protocol_version(params.get("protocolVersion").and_then(Value::as_str));
        let client_info = match params.get("clientInfo") {
            Some(value) => serde_json::from_value::<ClientInfo>(value.clone()).unwrap_or_else(|e| {
                warn!("MCP: Ignoring malformed clientInfo: {}", e);
                ClientInfo::default()
            }),
            None => ClientInfo::default(),
        };
        let capabilities = params.get("capabilities").cloned().unwrap_or(json!({}));

        let session_id = requested_id.unwrap_or_else(SessionStore::generate_id);
        state
            .sessions()
            .create(
                session_id.clone(),
                InitParams {
                    protocol_version: protocol_version.to_string(),
                    client_info: client_info.clone(),
                    capabilities,
                },
            )
            .await?;

        info!(
            "MCP: Session {} created for {} {} (protocol {})",
            session_id, client_info.name, client_info.version, protocol_version
        );

        let result = json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "subscribe": false, "listChanged": false },
                "experimental": {
                    "streaming": {
                        "tools": state.streaming().tools,
                        "resumable": true
                    }
                }
            },
            "serverInfo": {
                "name": "tether",
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        let response = JsonRpcResponse::success(request.id, result);
        Ok(McpOutcome::new(McpReply::Json(response), session_id))
    }

    /// Answer a request carrying `Last-Event-ID` with what the client missed.
    async fn handle_reconnect(
        sessions: &SessionStore,
        session_id: String,
        last_event_id: &str,
        request: JsonRpcRequest,
    ) -> Result<McpOutcome, McpError> {
        let result = {
            let mut session = sessions.lock_initialized(&session_id).await?;
            reconnect::resolve(&mut session, last_event_id)
        };
        let value = serde_json::to_value(&result)
            .map_err(|e| McpError::Internal(format!("serializing reconnection: {e}")))?;
        let response = JsonRpcResponse::success(request.id, value);
        Ok(McpOutcome::new(McpReply::Json(response), session_id))
    }

    /// Hand a request to the executor and answer with a single response.
    async fn delegate(state: &AppState, request: JsonRpcRequest, session_id: String) -> McpOutcome {
        let reporter = ProgressReporter::detached();
        let response = match state.executor().execute(&request, &reporter).await {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => {
                warn!("MCP: {} failed: {:#}", request.method, e);
                JsonRpcResponse::error(request.id, codes::INTERNAL_ERROR, format!("{e:#}"))
            }
        };
        McpOutcome::new(McpReply::Json(response), session_id)
    }

    /// Notifications get `202 Accepted`; the same method sent with an id
    /// gets an empty result.
    fn acknowledge(request: JsonRpcRequest, session_id: String) -> McpOutcome {
        let reply = if request.is_notification() {
            McpReply::Accepted
        } else {
            McpReply::Json(JsonRpcResponse::success(request.id, json!({})))
        };
        McpOutcome::new(reply, session_id)
    }
}

/// Client-chosen ids end up in a response header.
fn validate_session_id(id: &str) -> Result<(), McpError> {
    if id.is_empty() || id.len() > MAX_SESSION_ID_LEN {
        return Err(McpError::InvalidRequest(format!(
            "session id must be 1-{MAX_SESSION_ID_LEN} characters"
        )));
    }
    if !id.bytes().all(|b| (0x21..=0x7e).contains(&b)) {
        return Err(McpError::InvalidRequest(
            "session id must be visible ASCII".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_types::ConnectionStatus;

    fn ctx(session_id: Option<&str>) -> RequestContext {
        RequestContext {
            session_id: session_id.map(str::to_string),
            last_event_id: None,
        }
    }

    fn json_reply(outcome: McpOutcome) -> JsonRpcResponse {
        match outcome.reply {
            McpReply::Json(response) => response,
            McpReply::Accepted => panic!("expected JSON reply, got Accepted"),
            McpReply::Stream(_) => panic!("expected JSON reply, got Stream"),
        }
    }

    async fn initialized_session(state: &AppState, id: &str) {
        McpHandler::handle_request(
            state,
            ctx(Some(id)),
            JsonRpcRequest::new(0, "initialize", Some(json!({}))),
        )
        .await
        .unwrap();
        state.sessions().mark_initialized(id).await.unwrap();
    }

    #[test]
    fn test_method_table() {
        assert_eq!(McpMethod::lookup("tools/call"), Some(McpMethod::ToolsCall));
        assert_eq!(
            McpMethod::lookup("notifications/initialized"),
            Some(McpMethod::Initialized)
        );
        assert_eq!(McpMethod::lookup("tools/destroy"), None);
        assert!(McpMethod::Cancelled.is_notification());
        assert!(!McpMethod::Ping.is_notification());
    }

    #[tokio::test]
    async fn test_initialize_negotiates_and_creates_session() {
        let state = AppState::default();
        let request = JsonRpcRequest::new(
            1,
            "initialize",
            Some(json!({
                "protocolVersion": "2024-11-05",
                "clientInfo": { "name": "inspector", "version": "0.9" }
            })),
        );

        let outcome = McpHandler::handle_request(&state, ctx(None), request)
            .await
            .unwrap();
        let session_id = outcome.session_id.clone().unwrap();
        let response = json_reply(outcome);
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "tether");

        let info = state.sessions().info(&session_id).await.unwrap();
        assert_eq!(info.client_info.name, "inspector");
        assert!(!info.initialized);
    }

    #[tokio::test]
    async fn test_unsupported_version_falls_back_to_latest() {
        let state = AppState::default();
        let request = JsonRpcRequest::new(
            1,
            "initialize",
            Some(json!({ "protocolVersion": "1999-01-01" })),
        );
        let response = json_reply(
            McpHandler::handle_request(&state, ctx(None), request)
                .await
                .unwrap(),
        );
        assert_eq!(
            response.result.unwrap()["protocolVersion"],
            super::super::protocol::LATEST_PROTOCOL_VERSION
        );
    }

    #[tokio::test]
    async fn test_duplicate_session_id_is_rejected() {
        let state = AppState::default();
        initialized_session(&state, "fixed").await;
        let err = McpHandler::handle_request(
            &state,
            ctx(Some("fixed")),
            JsonRpcRequest::new(2, "initialize", None),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, McpError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_bad_client_session_id_is_rejected() {
        let state = AppState::default();
        let err = McpHandler::handle_request(
            &state,
            ctx(Some("has space")),
            JsonRpcRequest::new(1, "initialize", None),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, McpError::InvalidRequest(_)));
        assert!(state.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn test_requests_before_initialized_are_rejected() {
        let state = AppState::default();
        McpHandler::handle_request(
            &state,
            ctx(Some("s1")),
            JsonRpcRequest::new(1, "initialize", None),
        )
        .await
        .unwrap();

        let err = McpHandler::handle_request(
            &state,
            ctx(Some("s1")),
            JsonRpcRequest::new(2, "tools/list", None),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, McpError::InvalidSession(_)));

        let notification = JsonRpcRequest {
            id: None,
            ..JsonRpcRequest::new(0, "notifications/initialized", None)
        };
        let outcome = McpHandler::handle_request(&state, ctx(Some("s1")), notification)
            .await
            .unwrap();
        assert!(matches!(outcome.reply, McpReply::Accepted));
        assert!(state.sessions().is_valid("s1").await);
    }

    #[tokio::test]
    async fn test_unknown_method_checks_session_first() {
        let state = AppState::default();
        let err = McpHandler::handle_request(
            &state,
            ctx(Some("ghost")),
            JsonRpcRequest::new(1, "tools/destroy", None),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, McpError::InvalidSession(_)));

        initialized_session(&state, "s1").await;
        let err = McpHandler::handle_request(
            &state,
            ctx(Some("s1")),
            JsonRpcRequest::new(1, "tools/destroy", None),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, McpError::MethodNotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_id_on_request_method() {
        let state = AppState::default();
        initialized_session(&state, "s1").await;
        let request = JsonRpcRequest {
            id: None,
            ..JsonRpcRequest::new(0, "tools/list", None)
        };
        let err = McpHandler::handle_request(&state, ctx(Some("s1")), request)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_non_streaming_call_is_delegated() {
        let state = AppState::default();
        initialized_session(&state, "s1").await;
        let request = JsonRpcRequest::new(
            7,
            "tools/call",
            Some(json!({ "name": "list_templates" })),
        );
        let response = json_reply(
            McpHandler::handle_request(&state, ctx(Some("s1")), request)
                .await
                .unwrap(),
        );
        assert_eq!(response.id, Some(json!(7)));
        assert!(response.result.unwrap()["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("templates"));
    }

    #[tokio::test]
    async fn test_executor_error_becomes_internal_error() {
        let state = AppState::default();
        initialized_session(&state, "s1").await;
        let request = JsonRpcRequest::new(
            3,
            "resources/read",
            Some(json!({ "uri": "tether://nowhere" })),
        );
        let response = json_reply(
            McpHandler::handle_request(&state, ctx(Some("s1")), request)
                .await
                .unwrap(),
        );
        assert_eq!(response.error.unwrap().code, codes::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn test_reconnect_with_unknown_event_id() {
        let state = AppState::default();
        initialized_session(&state, "s1").await;
        let response = json_reply(
            McpHandler::handle_request(
                &state,
                RequestContext {
                    session_id: Some("s1".to_string()),
                    last_event_id: Some("evt-999".to_string()),
                },
                JsonRpcRequest::new(4, "ping", None),
            )
            .await
            .unwrap(),
        );
        let result = response.result.unwrap();
        assert_eq!(result["type"], "reconnection");
        assert_eq!(result["replayMode"], "fallback");
        assert_eq!(result["missedEvents"], json!([]));

        let info = state.sessions().info("s1").await.unwrap();
        assert_eq!(info.connection_status, ConnectionStatus::Active);
    }
}
