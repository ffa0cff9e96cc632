//! Callback-style consumer for event iterators
//!
//! [`consume_event_iterator`] drives an iterator to completion in a
//! background task, reporting through callbacks instead of an async loop.
//! The finish callback fires exactly once with the way the consumption
//! ended: success, error, or cancellation.

use crate::error::{RpcError, RpcResult};
use crate::signal::CancellationSignal;
use crate::subscription::iterator::EventIterator;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::trace;

/// How a consumed iterator finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The stream completed normally.
    Success,
    /// The stream ended with an error.
    Error,
    /// The consumer was cancelled.
    Cancelled,
}

/// Callbacks fired while consuming an iterator.
///
/// All callbacks are optional; unset ones are skipped.
///
/// # Example
/// ```rust,ignore
/// let handle = consume_event_iterator(
///     client.subscribe("stream.ticks", json!(null), None),
///     ConsumeCallbacks::new()
///         .on_event(|tick| println!("tick: {}", tick))
///         .on_finish(|reason| println!("done: {:?}", reason)),
/// );
/// // later:
/// handle.cancel();
/// ```
#[derive(Default)]
pub struct ConsumeCallbacks {
    on_event: Option<Box<dyn FnMut(Value) + Send>>,
    on_error: Option<Box<dyn FnOnce(RpcError) + Send>>,
    on_complete: Option<Box<dyn FnOnce() + Send>>,
    on_finish: Option<Box<dyn FnOnce(FinishReason) + Send>>,
}

impl ConsumeCallbacks {
    /// Create an empty callback set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked once per data element.
    #[must_use = "This method returns a new ConsumeCallbacks and does not modify self"]
    pub fn on_event<F: FnMut(Value) + Send + 'static>(mut self, f: F) -> Self {
        self.on_event = Some(Box::new(f));
        self
    }

    /// Invoked when the iterator (or its opening future) fails.
    #[must_use = "This method returns a new ConsumeCallbacks and does not modify self"]
    pub fn on_error<F: FnOnce(RpcError) + Send + 'static>(mut self, f: F) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Invoked when the stream completes normally.
    #[must_use = "This method returns a new ConsumeCallbacks and does not modify self"]
    pub fn on_complete<F: FnOnce() + Send + 'static>(mut self, f: F) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Invoked exactly once when consumption ends, whatever the reason.
    #[must_use = "This method returns a new ConsumeCallbacks and does not modify self"]
    pub fn on_finish<F: FnOnce(FinishReason) + Send + 'static>(mut self, f: F) -> Self {
        self.on_finish = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for ConsumeCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumeCallbacks")
            .field("on_event", &self.on_event.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_finish", &self.on_finish.is_some())
            .finish()
    }
}

/// Handle over a running consumer task.
#[derive(Debug)]
pub struct ConsumerHandle {
    cancel: Arc<CancellationSignal>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Stop consuming. The iterator's shutdown is awaited by the consumer
    /// task, which then finishes with [`FinishReason::Cancelled`]. No
    /// further event callbacks fire after this call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the consumer task to finish.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Consume an iterator with callbacks; returns a cancel handle.
///
/// Accepts the pending subscribe future so callers can hand the whole
/// `client.subscribe(..)` expression over without awaiting it first. If
/// that future fails, `on_error` then `on_finish(Error)` fire and no
/// events are delivered.
pub fn consume_event_iterator<F>(iterator: F, callbacks: ConsumeCallbacks) -> ConsumerHandle
where
    F: Future<Output = RpcResult<EventIterator>> + Send + 'static,
{
    let cancel = CancellationSignal::shared();
    let signal = cancel.clone();

    let task = tokio::spawn(async move {
        let ConsumeCallbacks {
            mut on_event,
            on_error,
            on_complete,
            mut on_finish,
        } = callbacks;
        let mut finish = move |reason: FinishReason| {
            if let Some(f) = on_finish.take() {
                f(reason);
            }
        };

        let iterator = tokio::select! {
            _ = signal.cancelled() => {
                finish(FinishReason::Cancelled);
                return;
            }
            opened = iterator => match opened {
                Ok(iterator) => iterator,
                Err(err) => {
                    if let Some(f) = on_error {
                        f(err);
                    }
                    finish(FinishReason::Error);
                    return;
                }
            },
        };

        loop {
            tokio::select! {
                biased;
                _ = signal.cancelled() => {
                    trace!("Consumer cancelled, closing iterator");
                    iterator.close().await;
                    finish(FinishReason::Cancelled);
                    return;
                }
                item = iterator.next() => match item {
                    Some(Ok(value)) => {
                        if signal.is_cancelled() {
                            iterator.close().await;
                            finish(FinishReason::Cancelled);
                            return;
                        }
                        if let Some(f) = on_event.as_mut() {
                            f(value);
                        }
                    }
                    Some(Err(err)) => {
                        if let Some(f) = on_error {
                            f(err);
                        }
                        finish(FinishReason::Error);
                        return;
                    }
                    None => {
                        if let Some(f) = on_complete {
                            f();
                        }
                        finish(FinishReason::Success);
                        return;
                    }
                },
            }
        }
    });

    ConsumerHandle { cancel, task }
}
