//! Periodic eviction of inactive sessions.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::SessionStore;

/// Default inactivity timeout (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default sweep interval (5 minutes).
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Background task that removes sessions past their inactivity timeout.
///
/// Owned by the server's main routine: `start()` spawns the periodic sweep,
/// `stop()` cancels it and waits for it to finish.
#[derive(Clone)]
pub struct CleanupSweeper {
    inner: Arc<SweeperInner>,
}

struct SweeperInner {
    sessions: SessionStore,
    interval: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupSweeper {
    pub fn new(sessions: SessionStore, interval: Duration, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(SweeperInner {
                sessions,
                interval,
                timeout,
                shutdown: CancellationToken::new(),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Run one sweep immediately and return the number of evicted sessions.
    pub async fn sweep_once(&self) -> usize {
        let removed = self.inner.sessions.cleanup_expired(self.inner.timeout).await;
        if removed > 0 {
            info!("Session sweep evicted {} session(s)", removed);
        } else {
            debug!("Session sweep found nothing to evict");
        }
        removed
    }

    /// Spawn the periodic sweep. Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut handle = self.inner.handle.lock();
        if handle.is_some() {
            warn!("Session sweeper already running");
            return;
        }

        let sweeper = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let period = self.inner.interval;
        info!(
            "Starting session sweeper (interval {}s, timeout {}s)",
            period.as_secs(),
            self.inner.timeout.as_secs()
        );

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        sweeper.sweep_once().await;
                    }
                }
            }
            debug!("Session sweeper stopped");
        }));
    }

    /// Stop the periodic sweep and wait for it to exit.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Session sweeper ended abnormally: {}", e);
            }
            info!("Session sweeper stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}
