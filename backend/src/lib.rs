//! Tether backend library.
//!
//! This module exposes the application builder for use in tests.

use axum::http::{header, HeaderName, Method};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod mcp;
pub mod state;

use api::mcp::{LAST_EVENT_ID_HEADER, MCP_SESSION_ID_HEADER};
use state::AppState;

/// Create the Axum application router.
///
/// This function is used both by the main server binary and by integration tests.
pub async fn create_app() -> Router {
    create_app_with_state(AppState::default()).await
}

/// Create the Axum application router with a given state.
pub async fn create_app_with_state(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(MCP_SESSION_ID_HEADER),
            HeaderName::from_static(LAST_EVENT_ID_HEADER),
        ])
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID_HEADER)]);

    Router::new()
        .route("/health", get(health))
        // MCP Streamable HTTP endpoint (has its own session management)
        .route(
            "/mcp",
            post(api::mcp::mcp_post)
                .options(api::mcp::mcp_options)
                .fallback(api::mcp::mcp_method_not_allowed),
        )
        .layer(CatchPanicLayer::custom(api::mcp::handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "OK"
}
