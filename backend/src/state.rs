//! Application state management.

use std::sync::Arc;

use crate::config::{Config, SessionSettings, StreamingSettings};
use crate::mcp::executor::{CatalogExecutor, RequestExecutor};
use crate::mcp::session::SessionStore;
use crate::mcp::sweeper::CleanupSweeper;

/// Shared application state.
///
/// Constructed once by the server's main routine and handed to request
/// handlers; clones share the same sessions and executor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Live MCP sessions
    sessions: SessionStore,
    /// Business logic behind tool, resource and elicitation requests
    executor: Arc<dyn RequestExecutor>,
    session_settings: SessionSettings,
    streaming: StreamingSettings,
}

impl AppState {
    /// Create application state with the given executor.
    pub fn new(
        executor: Arc<dyn RequestExecutor>,
        session_settings: SessionSettings,
        streaming: StreamingSettings,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                sessions: SessionStore::new(session_settings.limits),
                executor,
                session_settings,
                streaming,
            }),
        }
    }

    /// Create application state from loaded configuration.
    pub fn from_config(config: &Config, executor: Arc<dyn RequestExecutor>) -> Self {
        Self::new(executor, config.sessions, config.streaming.clone())
    }

    /// Get the session store.
    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    /// Get the request executor.
    pub fn executor(&self) -> &Arc<dyn RequestExecutor> {
        &self.inner.executor
    }

    pub fn streaming(&self) -> &StreamingSettings {
        &self.inner.streaming
    }

    /// Build a sweeper for this state's sessions. The caller owns its lifecycle.
    pub fn cleanup_sweeper(&self) -> CleanupSweeper {
        CleanupSweeper::new(
            self.inner.sessions.clone(),
            self.inner.session_settings.cleanup_interval,
            self.inner.session_settings.timeout,
        )
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(
            Arc::new(CatalogExecutor::default()),
            SessionSettings::default(),
            StreamingSettings::default(),
        )
    }
}
