//! Cancellation signal shared by calls and subscriptions

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// One-shot cancellation signal.
///
/// A signal starts unset; [`CancellationSignal::cancel`] trips it exactly
/// once and wakes every waiter. Unary calls race their transport
/// invocation against the signal; subscriptions drive their shutdown path
/// from it. An optional reason string is carried to the resulting
/// `CANCELLED` error.
///
/// # Example
/// ```rust,ignore
/// let signal = Arc::new(CancellationSignal::new());
/// let opts = CallOptions::new().with_signal(signal.clone());
/// // elsewhere:
/// signal.cancel_with_reason("user navigated away");
/// ```
#[derive(Debug)]
pub struct CancellationSignal {
    cancelled: AtomicBool,
    reason: std::sync::Mutex<Option<String>>,
    notify: Notify,
}

impl CancellationSignal {
    /// Create a new, untripped signal.
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            reason: std::sync::Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Convenience constructor returning the signal ready for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Trip the signal.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Trip the signal with a reason that surfaces in the error.
    pub fn cancel_with_reason(&self, reason: impl Into<String>) {
        if let Ok(mut slot) = self.reason.lock() {
            slot.get_or_insert(reason.into());
        }
        self.cancel();
    }

    /// Check whether the signal has been tripped.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The reason the signal was tripped with, if any.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().ok().and_then(|slot| slot.clone())
    }

    /// Wait until the signal trips. Resolves immediately if it already has.
    pub async fn cancelled(&self) {
        let mut notified = std::pin::pin!(self.notify.notified());
        // Register before the flag check so a concurrent cancel() cannot
        // slip between the check and the await.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let signal = CancellationSignal::shared();
        let waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_after_trip() {
        let signal = CancellationSignal::new();
        signal.cancel();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_first_reason_wins() {
        let signal = CancellationSignal::new();
        signal.cancel_with_reason("first");
        signal.cancel_with_reason("second");
        assert_eq!(signal.reason().as_deref(), Some("first"));
    }
}
