//! MCP session management.
//!
//! Manages session lifecycle for MCP Streamable HTTP connections. Each
//! session owns its event log and task tracker behind its own mutex, so
//! requests for the same session are serialized while different sessions
//! proceed in parallel. The map itself is only locked long enough to look
//! up, insert or remove a handle; no code path takes the map lock while
//! holding a session lock.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tether_types::{ClientInfo, ConnectionStatus, SessionInfo};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use super::event_log::{EventLog, DEFAULT_MAX_EVENTS, DEFAULT_REPLAY_FALLBACK};
use super::tasks::{TaskTracker, DEFAULT_MAX_CHECKPOINTS};

/// Error type for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session not initialized: {0}")]
    NotInitialized(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Per-session retention limits.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub max_events: usize,
    pub replay_fallback: usize,
    pub max_checkpoints: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            replay_fallback: DEFAULT_REPLAY_FALLBACK,
            max_checkpoints: DEFAULT_MAX_CHECKPOINTS,
        }
    }
}

/// Parameters negotiated by `initialize`.
#[derive(Debug, Clone, Default)]
pub struct InitParams {
    pub protocol_version: String,
    pub client_info: ClientInfo,
    pub capabilities: Value,
}

/// An MCP session.
#[derive(Debug)]
pub struct Session {
    id: String,
    protocol_version: String,
    client_info: ClientInfo,
    capabilities: Value,
    created_at: DateTime<Utc>,
    /// Monotonic clock used for expiry
    last_seen: Instant,
    /// Wall-clock mirror of `last_seen` for reporting
    last_activity: DateTime<Utc>,
    initialized: bool,
    connection_status: ConnectionStatus,
    /// Journal of delivered stream events
    pub events: EventLog,
    /// Streamed tool invocations
    pub tasks: TaskTracker,
}

impl Session {
    fn new(id: String, params: InitParams, limits: SessionLimits) -> Self {
        let now = Utc::now();
        Self {
            events: EventLog::new(id.clone(), limits.max_events, limits.replay_fallback),
            tasks: TaskTracker::new(limits.max_checkpoints),
            id,
            protocol_version: params.protocol_version,
            client_info: params.client_info,
            capabilities: params.capabilities,
            created_at: now,
            last_seen: Instant::now(),
            last_activity: now,
            initialized: false,
            connection_status: ConnectionStatus::Active,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    /// Record activity. Never moves `last_activity` backwards.
    pub fn touch(&mut self) {
        let now = Instant::now();
        if now > self.last_seen {
            self.last_seen = now;
        }
        let wall = Utc::now();
        if wall > self.last_activity {
            self.last_activity = wall;
        }
        self.connection_status = ConnectionStatus::Active;
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        if self.connection_status != status {
            debug!(
                "Session {} connection {} -> {}",
                self.id, self.connection_status, status
            );
            self.connection_status = status;
        }
    }

    /// Time since the last accepted request.
    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_seen)
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.idle_for() >= timeout
    }

    /// Snapshot for reporting.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            protocol_version: self.protocol_version.clone(),
            client_info: self.client_info.clone(),
            capabilities: self.capabilities.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            initialized: self.initialized,
            connection_status: self.connection_status,
            event_count: self.events.len(),
            task_count: self.tasks.len(),
        }
    }
}

/// Shared ownership of one session. Lock it to read or mutate the session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Manager for MCP sessions.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
    limits: SessionLimits,
}

impl SessionStore {
    /// Create a new session store.
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            limits,
        }
    }

    /// Generate a fresh session id.
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Create a session under `id`. Fails if the id is already in use.
    pub async fn create(&self, id: impl Into<String>, params: InitParams) -> Result<SessionInfo> {
        let id = id.into();
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(SessionError::AlreadyExists(id));
        }
        let session = Session::new(id.clone(), params, self.limits);
        let info = session.info();
        sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        info!(
            "Created MCP session: {} (protocol {})",
            id, info.protocol_version
        );
        Ok(info)
    }

    /// Get a session handle by ID.
    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions.get(id).cloned()
    }

    /// Lock a session for exclusive use.
    pub async fn lock(&self, id: &str) -> Result<OwnedMutexGuard<Session>> {
        let handle = self
            .get(id)
            .await
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        Ok(handle.lock_owned().await)
    }

    /// Lock a session that must have completed the handshake.
    pub async fn lock_initialized(&self, id: &str) -> Result<OwnedMutexGuard<Session>> {
        let session = self.lock(id).await?;
        if !session.is_initialized() {
            return Err(SessionError::NotInitialized(id.to_string()));
        }
        Ok(session)
    }

    /// Get a snapshot of a session.
    pub async fn info(&self, id: &str) -> Option<SessionInfo> {
        let handle = self.get(id).await?;
        let session = handle.lock().await;
        Some(session.info())
    }

    /// Update `last_activity` and mark the connection active.
    pub async fn touch(&self, id: &str) -> Result<()> {
        self.lock(id).await?.touch();
        Ok(())
    }

    /// Mark a session as initialized.
    pub async fn mark_initialized(&self, id: &str) -> Result<()> {
        let mut session = self.lock(id).await?;
        session.mark_initialized();
        debug!("MCP session {} marked as initialized", id);
        Ok(())
    }

    /// Whether a session exists and completed the handshake.
    pub async fn is_valid(&self, id: &str) -> bool {
        self.lock_initialized(id).await.is_ok()
    }

    /// Check if a session exists.
    pub async fn contains(&self, id: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions.contains_key(id)
    }

    /// Terminate a session.
    pub async fn terminate(&self, id: &str) -> bool {
        let Some(handle) = self.get(id).await else {
            return false;
        };
        // Wait for in-flight work on the session before dropping it.
        let _guard = handle.lock().await;
        let mut sessions = self.sessions.write().await;
        if sessions.remove(id).is_some() {
            info!("Terminated MCP session: {}", id);
            true
        } else {
            false
        }
    }

    /// Terminate every session.
    pub async fn terminate_all(&self) -> usize {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        let mut count = 0;
        for id in ids {
            if self.terminate(&id).await {
                count += 1;
            }
        }
        count
    }

    /// Get the number of live sessions.
    pub async fn len(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove sessions idle for at least `timeout`.
    ///
    /// Each candidate is locked before removal so a request that is
    /// currently working on it finishes first; the expiry check is repeated
    /// under the lock since that request may have touched it.
    pub async fn cleanup_expired(&self, timeout: Duration) -> usize {
        let handles: Vec<(String, SessionHandle)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect()
        };

        let mut removed = 0;
        for (id, handle) in handles {
            let session = handle.lock().await;
            if !session.is_expired(timeout) {
                continue;
            }
            let idle = session.idle_for();
            let mut sessions = self.sessions.write().await;
            let same_session = sessions
                .get(&id)
                .is_some_and(|current| Arc::ptr_eq(current, &handle));
            if same_session {
                sessions.remove(&id);
                removed += 1;
                info!(
                    "Cleaning up stale MCP session: {} (idle: {}s)",
                    id,
                    idle.as_secs()
                );
            }
            drop(sessions);
            drop(session);
        }
        removed
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionLimits::default())
    }
}
