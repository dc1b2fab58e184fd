//! Graceful shutdown coordinator

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::info;

/// Coordinates shutdown across the accept loop, the heartbeat sweep and any
/// other long-running task. Tasks subscribe once at startup and exit when
/// the signal arrives.
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            triggered: AtomicBool::new(false),
        }
    }

    /// Subscribe to the shutdown signal
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast the shutdown signal. Idempotent.
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutdown signal broadcast");
        // send only fails when no task is subscribed, which is fine
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
