//! Event queue feeding the subscription iterator
//!
//! Unbounded FIFO with exactly one producer (the event-bus listener) and
//! any number of consumers (blocked `next()` calls). Items are either wire
//! events or one of two distinguished terminators: the shutdown sentinel
//! and the synthetic failure used for error broadcast.
//!
//! Wakeups are counted with a semaphore rather than a notifier: shutdown
//! fills the queue with `max(1, pending + 1)` sentinels, and each one must
//! unblock exactly one consumer. A permit per item makes that accounting
//! exact; a single-permit notifier could lose a wakeup when two consumers
//! race between the empty-check and the await.

use crate::error::RpcError;
use crate::subscription::event::SubscriptionEvent;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Semaphore;

/// An entry in the subscription queue.
#[derive(Debug, Clone)]
pub(crate) enum QueueItem {
    /// A wire event delivered by the host.
    Event(SubscriptionEvent),
    /// Synthetic failure broadcast to pending consumers.
    Failure(RpcError),
    /// Shutdown sentinel; consumers observing it terminate cleanly.
    Shutdown,
}

/// Unbounded FIFO with permit-counted blocking takes.
#[derive(Debug)]
pub(crate) struct EventQueue {
    items: Mutex<VecDeque<QueueItem>>,
    ready: Semaphore,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            ready: Semaphore::new(0),
        }
    }

    /// Append an item and release one waiting consumer.
    pub(crate) fn push(&self, item: QueueItem) {
        match self.items.lock() {
            Ok(mut items) => items.push_back(item),
            // A poisoned queue means a consumer panicked mid-pop; the
            // subscription is already broken, drop the item.
            Err(_) => return,
        }
        self.ready.add_permits(1);
    }

    /// Block until an item is available and take it.
    pub(crate) async fn take(&self) -> QueueItem {
        // The semaphore is never closed, and a permit is only ever added
        // together with an item, so both failure arms are unreachable in
        // practice; degrade to a shutdown sentinel rather than panic.
        let Ok(permit) = self.ready.acquire().await else {
            return QueueItem::Shutdown;
        };
        permit.forget();
        self.pop().unwrap_or(QueueItem::Shutdown)
    }

    /// Take an item if one is immediately available.
    pub(crate) fn try_take(&self) -> Option<QueueItem> {
        let permit = self.ready.try_acquire().ok()?;
        permit.forget();
        self.pop()
    }

    fn pop(&self) -> Option<QueueItem> {
        self.items.lock().ok().and_then(|mut items| items.pop_front())
    }

    /// Number of queued items.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }
}

// =============================================================================
// Tests
// =============================================================================
