//! Run-wide cancellation signal.

use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable, level-triggered cancellation flag.
///
/// Every clone observes the same flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    /// Creates a signal that is not cancelled.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Cancels every holder of this signal.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once [`Cancellation::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the signal is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender is shared with every clone, so this only happens at teardown.
                std::future::pending::<()>().await;
            }
        }
    }
}
