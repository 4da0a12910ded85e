//! Graceful shutdown handling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Shutdown notification for async tasks and a flag for worker threads.
///
/// Async tasks subscribe to the broadcast; plain worker threads, which own
/// pool slots and never await, poll [`ShutdownSignal::is_triggered`].
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal manager.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Trigger shutdown. Later calls are no-ops.
    pub fn shutdown(&self) {
        if !self.triggered.swap(true, Ordering::AcqRel) {
            let _ = self.sender.send(());
        }
    }

    /// Whether shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_are_notified() {
        let signal = ShutdownSignal::new();
        let mut rx = signal.subscribe();
        assert!(!signal.is_triggered());

        signal.clone().shutdown();

        assert!(rx.recv().await.is_ok());
        assert!(signal.is_triggered());
    }

    #[test]
    fn test_shutdown_without_subscribers() {
        let signal = ShutdownSignal::default();
        signal.shutdown();
        signal.shutdown();
        assert!(signal.is_triggered());
    }
}
