//! Graceful shutdown of open WebSocket connections
//!
//! Axum runs each upgraded socket in its own task, outside of what
//! `with_graceful_shutdown` waits for. Sockets are tracked here instead and
//! told to leave their read loop on shutdown, so they run the normal
//! disconnect path before the audit log is flushed.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TrackedFuture;
use tokio_util::task::TaskTracker;

/// Shutdown signal plus the set of live socket tasks
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sockets: TaskTracker,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that resolves once shutdown has started
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start shutting down. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wrap a socket future so `wait_for_sockets` waits for it
    pub fn track<F: Future>(&self, socket: F) -> TrackedFuture<F> {
        self.sockets.track_future(socket)
    }

    /// Number of socket tasks still running
    pub fn open_sockets(&self) -> usize {
        self.sockets.len()
    }

    /// Stop accepting new sockets and wait up to `timeout` for the tracked
    /// ones to finish. Returns false on timeout.
    pub async fn wait_for_sockets(&self, timeout: Duration) -> bool {
        self.sockets.close();
        tracing::info!(
            open_sockets = self.open_sockets(),
            timeout_secs = timeout.as_secs(),
            "Waiting for WebSocket connections to close"
        );

        if tokio::time::timeout(timeout, self.sockets.wait()).await.is_err() {
            tracing::warn!(
                open_sockets = self.open_sockets(),
                "Timed out waiting for WebSocket connections to close"
            );
            return false;
        }
        true
    }
}
