//! The subscription event iterator
//!
//! [`EventIterator`] is a reconnecting, resumable async stream over the
//! host's push channel. One producer (the event-bus listener) feeds a
//! FIFO queue; any number of consumers await [`EventIterator::next`], and
//! each queued element is delivered to exactly one of them in enqueue
//! order.
//!
//! Lifecycle: `Connecting → Open → (Reconnecting ↔ Open)* → Closed`.
//! An `error` event ends the current connection; with auto-reconnect
//! enabled and budget remaining the iterator re-subscribes with the last
//! observed event id and consumers resume transparently. Exhausting the
//! budget broadcasts `MAX_RECONNECTS_EXCEEDED` to every pending consumer.
//!
//! Shutdown, whether by explicit [`EventIterator::close`], an abort signal, or a
//! terminal event, always runs the same sequence: release the listener,
//! mark the iterator completed, fill the queue with enough sentinels to
//! unblock every waiting consumer, then fire a best-effort
//! `rpc_unsubscribe` whose failure never propagates.

use crate::config::{MAX_RECONNECT_DELAY, SubscribeOptions};
use crate::error::{ClientError, RpcError, RpcResult, normalize_transport_error};
use crate::retry::calculate_backoff;
use crate::subscription::event::SubscriptionEvent;
use crate::subscription::id::SubscriptionId;
use crate::subscription::queue::{EventQueue, QueueItem};
use crate::subscription::state::ConnectionState;
use crate::transport::{EventHandler, ListenerHandle, Transport, methods};
use serde::Serialize;
use serde_json::{Value, json};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Wire shape of the `rpc_subscribe` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest<'a> {
    id: String,
    path: &'a str,
    input: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_event_id: Option<&'a str>,
}

/// Mutable per-iterator state, guarded by one lock with short critical
/// sections; nothing is awaited while it is held.
#[derive(Debug)]
struct IteratorState {
    id: SubscriptionId,
    last_event_id: Option<String>,
    reconnect_attempts: u32,
    completed: bool,
    connection: ConnectionState,
    unlisten: Option<ListenerHandle>,
}

struct SubscriptionShared {
    transport: Arc<dyn Transport>,
    path: String,
    input: Value,
    options: SubscribeOptions,
    queue: Arc<EventQueue>,
    pending_consumers: AtomicUsize,
    closed: AtomicBool,
    state: Mutex<IteratorState>,
}

impl Drop for SubscriptionShared {
    fn drop(&mut self) {
        // Last-resort cleanup when the iterator is dropped without close():
        // release the listener synchronously and detach from the host in a
        // background task if a runtime is still around.
        let id = match self.state.get_mut() {
            Ok(state) => {
                if let Some(handle) = state.unlisten.take() {
                    handle.unlisten();
                }
                state.id
            }
            Err(_) => return,
        };
        if !self.closed.swap(true, Ordering::SeqCst)
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            let transport = self.transport.clone();
            runtime.spawn(async move {
                let _ = transport
                    .invoke(methods::UNSUBSCRIBE, json!({ "id": id.to_string() }))
                    .await;
            });
        }
    }
}

/// Decrements the pending-consumer count even if the awaiting future is
/// dropped mid-take.
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn register(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum ErrorOutcome {
    /// Reconnected; the consumer loop continues transparently.
    Resumed,
    /// Terminal; the consumer observes this error.
    Failed(RpcError),
}

/// A reconnecting, resumable async iterator over a subscription stream.
///
/// Cloning the iterator produces another handle onto the same stream; the
/// clones share one queue and each element is delivered to exactly one of
/// them.
///
/// # Example
/// ```rust,ignore
/// let iterator = client.subscribe("stream.chat", json!({"room": 7}), None).await?;
/// while let Some(message) = iterator.next().await {
///     println!("{}", message?);
/// }
/// ```
#[derive(Clone)]
pub struct EventIterator {
    shared: Arc<SubscriptionShared>,
}

impl EventIterator {
    /// Connect a new subscription and return its iterator.
    pub(crate) async fn open(
        transport: Arc<dyn Transport>,
        path: String,
        input: Value,
        options: SubscribeOptions,
    ) -> Result<Self, ClientError> {
        options.validate().map_err(ClientError::Call)?;

        let id = SubscriptionId::new();
        let shared = Arc::new(SubscriptionShared {
            transport,
            path,
            input,
            queue: Arc::new(EventQueue::new()),
            pending_consumers: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            state: Mutex::new(IteratorState {
                id,
                last_event_id: options.last_event_id.clone(),
                reconnect_attempts: 0,
                completed: false,
                connection: ConnectionState::Connecting,
                unlisten: None,
            }),
            options,
        });

        let resume_from = shared.options.last_event_id.clone();
        if let Err(err) = connect(&shared, id, resume_from).await {
            // Nothing was subscribed; keep Drop from issuing a spurious
            // unsubscribe for it.
            shared.closed.store(true, Ordering::SeqCst);
            return Err(err);
        }

        if let Some(signal) = shared.options.signal.clone() {
            let weak = Arc::downgrade(&shared);
            tokio::spawn(async move {
                signal.cancelled().await;
                if let Some(shared) = weak.upgrade() {
                    EventIterator { shared }.close().await;
                }
            });
        }

        Ok(Self { shared })
    }

    /// The id of the current connection.
    pub fn id(&self) -> SubscriptionId {
        self.shared
            .state
            .lock()
            .map(|state| state.id)
            .unwrap_or_default()
    }

    /// The most recently observed event id, used for resumption.
    pub fn last_event_id(&self) -> Option<String> {
        self.shared
            .state
            .lock()
            .ok()
            .and_then(|state| state.last_event_id.clone())
    }

    /// The current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared
            .state
            .lock()
            .map(|state| state.connection)
            .unwrap_or(ConnectionState::Closed)
    }

    /// Await the next element.
    ///
    /// Returns `Some(Ok(data))` per data event, `Some(Err(_))` once for a
    /// terminal error, and `None` after the stream has ended. Concurrent
    /// callers share the queue; each element goes to exactly one of them.
    pub async fn next(&self) -> Option<RpcResult<Value>> {
        loop {
            let (completed, reconnecting) = match self.shared.state.lock() {
                Ok(state) => (
                    state.completed,
                    state.connection == ConnectionState::Reconnecting,
                ),
                Err(_) => return None,
            };

            if completed && !reconnecting {
                // Terminated. Drain terminator items so a broadcast error
                // still reaches consumers that were not yet awaiting;
                // buffered data events are never surfaced past completion.
                loop {
                    match self.shared.queue.try_take() {
                        None | Some(QueueItem::Shutdown) => return None,
                        Some(QueueItem::Failure(err)) => return Some(Err(err)),
                        Some(QueueItem::Event(_)) => continue,
                    }
                }
            }

            let item = {
                let _guard = PendingGuard::register(&self.shared.pending_consumers);
                self.shared.queue.take().await
            };

            match item {
                QueueItem::Shutdown => return None,
                QueueItem::Failure(err) => return Some(Err(err)),
                QueueItem::Event(SubscriptionEvent::Data { payload }) => {
                    if let Ok(mut state) = self.shared.state.lock() {
                        if let Some(event_id) = payload.id {
                            state.last_event_id = Some(event_id);
                        }
                        // Data flowing proves the connection is healthy;
                        // only now does the reconnect budget refill.
                        state.reconnect_attempts = 0;
                    }
                    return Some(Ok(payload.data));
                }
                QueueItem::Event(SubscriptionEvent::Error { payload }) => {
                    match self.handle_error_event(payload).await {
                        ErrorOutcome::Resumed => continue,
                        ErrorOutcome::Failed(err) => return Some(Err(err)),
                    }
                }
                QueueItem::Event(SubscriptionEvent::Completed) => {
                    trace!(path = %self.shared.path, "Subscription completed by host");
                    self.close().await;
                    return None;
                }
            }
        }
    }

    /// Handle a host `error` event: end the current connection, then
    /// either reconnect transparently or fail terminally.
    async fn handle_error_event(&self, payload: RpcError) -> ErrorOutcome {
        let will_reconnect = match self.shared.state.lock() {
            Ok(mut state) => {
                // The errored connection is dead; release its listener
                // before anything else so no stray payload can be queued.
                if let Some(handle) = state.unlisten.take() {
                    handle.unlisten();
                }
                state.completed = true;
                let reconnect =
                    self.shared.options.auto_reconnect && !self.shared.closed.load(Ordering::SeqCst);
                state.connection = if reconnect {
                    ConnectionState::Reconnecting
                } else {
                    ConnectionState::Closed
                };
                if !reconnect {
                    // Broadcast while the state lock is held so no consumer
                    // can observe "completed" before the failure items are
                    // in the queue.
                    self.broadcast_failure(payload.clone());
                }
                reconnect
            }
            Err(_) => false,
        };

        debug!(
            path = %self.shared.path,
            code = %payload.code,
            reconnect = will_reconnect,
            "Subscription error event"
        );

        if !will_reconnect {
            self.finalize_after_failure().await;
            return ErrorOutcome::Failed(payload);
        }

        match self.reconnect().await {
            Ok(()) => ErrorOutcome::Resumed,
            Err(err) => ErrorOutcome::Failed(err),
        }
    }

    /// Reconnect until success or the budget is exhausted.
    async fn reconnect(&self) -> Result<(), RpcError> {
        loop {
            let attempts = self
                .shared
                .state
                .lock()
                .map(|state| state.reconnect_attempts)
                .unwrap_or(u32::MAX);
            let max_reconnects = self.shared.options.max_reconnects;

            if attempts >= max_reconnects {
                let err =
                    RpcError::max_reconnects_exceeded(&self.shared.path, attempts, max_reconnects);
                warn!(
                    path = %self.shared.path,
                    attempts = attempts,
                    "Reconnect budget exhausted"
                );
                if let Ok(mut state) = self.shared.state.lock() {
                    state.completed = true;
                    state.connection = ConnectionState::Closed;
                    // Same-lock broadcast: no consumer can slip between the
                    // completed flag and the queued failures.
                    self.broadcast_failure(err.clone());
                } else {
                    self.broadcast_failure(err.clone());
                }
                self.finalize_after_failure().await;
                return Err(err);
            }

            let attempt = match self.shared.state.lock() {
                Ok(mut state) => {
                    state.reconnect_attempts += 1;
                    state.reconnect_attempts
                }
                Err(_) => return Err(RpcError::cancelled(&self.shared.path)),
            };
            let delay = calculate_backoff(
                attempt - 1,
                self.shared.options.reconnect_delay,
                MAX_RECONNECT_DELAY,
                true,
            );
            debug!(
                path = %self.shared.path,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting subscription"
            );
            tokio::time::sleep(delay).await;

            // A close() or abort during the backoff abandons the reconnect.
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(RpcError::cancelled(&self.shared.path));
            }

            let new_id = SubscriptionId::new();
            let resume_from = match self.shared.state.lock() {
                Ok(mut state) => {
                    state.id = new_id;
                    state.completed = false;
                    state.last_event_id.clone()
                }
                Err(_) => return Err(RpcError::cancelled(&self.shared.path)),
            };

            match connect(&self.shared, new_id, resume_from).await {
                Ok(()) => {
                    if self.shared.closed.load(Ordering::SeqCst) {
                        // close() raced the re-subscribe; tear the fresh
                        // connection down again.
                        if let Ok(mut state) = self.shared.state.lock() {
                            if let Some(handle) = state.unlisten.take() {
                                handle.unlisten();
                            }
                            state.completed = true;
                            state.connection = ConnectionState::Closed;
                        }
                        let _ = self
                            .shared
                            .transport
                            .invoke(methods::UNSUBSCRIBE, json!({ "id": new_id.to_string() }))
                            .await;
                        return Err(RpcError::cancelled(&self.shared.path));
                    }
                    if let Ok(mut state) = self.shared.state.lock() {
                        state.connection = ConnectionState::Open;
                    }
                    debug!(path = %self.shared.path, id = %new_id, "Subscription resumed");
                    return Ok(());
                }
                Err(err) => {
                    debug!(
                        path = %self.shared.path,
                        attempt = attempt,
                        error = %err,
                        "Reconnect attempt failed"
                    );
                    if let Ok(mut state) = self.shared.state.lock() {
                        state.completed = true;
                        state.connection = ConnectionState::Reconnecting;
                    }
                }
            }
        }
    }

    /// Queue `max(1, pending + 1)` copies of a terminal error so every
    /// blocked consumer and the next late arrival observe it.
    fn broadcast_failure(&self, err: RpcError) {
        let pending = self.shared.pending_consumers.load(Ordering::SeqCst);
        let copies = pending.saturating_add(1).max(1);
        trace!(
            path = %self.shared.path,
            copies = copies,
            code = %err.code,
            "Broadcasting subscription failure"
        );
        for _ in 0..copies {
            self.shared.queue.push(QueueItem::Failure(err.clone()));
        }
    }

    /// Mark the iterator closed after a terminal failure and detach from
    /// the host. The listener is already released and failure items are
    /// already queued; no sentinels are needed.
    async fn finalize_after_failure(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let id = self
            .shared
            .state
            .lock()
            .map(|state| state.id)
            .unwrap_or_default();
        if let Err(err) = self
            .shared
            .transport
            .invoke(methods::UNSUBSCRIBE, json!({ "id": id.to_string() }))
            .await
        {
            debug!(error = %err, "Unsubscribe after failure was rejected");
        }
    }

    /// Shut the subscription down.
    ///
    /// Idempotent, and shared with abort signals and terminal events. The
    /// order is fixed: release the listener first so nothing more enters
    /// the queue, mark the iterator completed, unblock every waiting
    /// consumer with sentinels, then tell the host best-effort; its
    /// failure never propagates.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (unlisten, id) = match self.shared.state.lock() {
            Ok(mut state) => {
                let handle = state.unlisten.take();
                state.completed = true;
                state.connection = ConnectionState::Closed;
                (handle, state.id)
            }
            Err(_) => (None, SubscriptionId::default()),
        };
        if let Some(handle) = unlisten {
            handle.unlisten();
        }

        let pending = self.shared.pending_consumers.load(Ordering::SeqCst);
        let sentinels = pending.saturating_add(1).max(1);
        for _ in 0..sentinels {
            self.shared.queue.push(QueueItem::Shutdown);
        }
        debug!(
            path = %self.shared.path,
            id = %id,
            unblocked = sentinels,
            "Subscription closed"
        );

        if let Err(err) = self
            .shared
            .transport
            .invoke(methods::UNSUBSCRIBE, json!({ "id": id.to_string() }))
            .await
        {
            debug!(error = %err, "Unsubscribe during shutdown was rejected");
        }
    }

    /// Adapt the iterator into a [`futures::Stream`].
    pub fn into_stream(self) -> impl futures::Stream<Item = RpcResult<Value>> {
        futures::stream::unfold(self, |iterator| async move {
            let item = iterator.next().await;
            item.map(|item| (item, iterator))
        })
    }

    /// Wrap the iterator so each element deserializes into `T`.
    pub fn typed<T>(self) -> TypedEventIterator<T> {
        TypedEventIterator {
            inner: self,
            _marker: PhantomData,
        }
    }
}

impl std::fmt::Debug for EventIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventIterator")
            .field("path", &self.shared.path)
            .field("connection", &self.connection_state())
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Attach a listener and issue `rpc_subscribe` for one connection.
///
/// On rejection the listener is detached before the error surfaces, so a
/// failed subscribe leaves no registration behind.
async fn connect(
    shared: &Arc<SubscriptionShared>,
    id: SubscriptionId,
    last_event_id: Option<String>,
) -> Result<(), ClientError> {
    let channel = id.channel();
    let queue = shared.queue.clone();
    let handler: EventHandler = Box::new(move |payload| {
        match serde_json::from_value::<SubscriptionEvent>(payload) {
            Ok(event) => queue.push(QueueItem::Event(event)),
            Err(err) => trace!(error = %err, "Discarding malformed subscription payload"),
        }
    });
    let handle = shared.transport.listen(&channel, handler);

    let request = SubscribeRequest {
        id: id.to_string(),
        path: &shared.path,
        input: &shared.input,
        last_event_id: last_event_id.as_deref(),
    };
    trace!(path = %shared.path, id = %id, resuming = request.last_event_id.is_some(), "Subscribing");

    match shared
        .transport
        .invoke(methods::SUBSCRIBE, json!({ "request": request }))
        .await
    {
        Ok(_) => {
            match shared.state.lock() {
                Ok(mut state) => {
                    state.unlisten = Some(handle);
                    state.connection = ConnectionState::Open;
                }
                Err(_) => handle.unlisten(),
            }
            Ok(())
        }
        Err(err) => {
            handle.unlisten();
            Err(normalize_transport_error(&shared.path, err))
        }
    }
}

// =============================================================================
// Typed Wrapper
// =============================================================================

/// [`EventIterator`] whose elements deserialize into `T`.
pub struct TypedEventIterator<T> {
    inner: EventIterator,
    _marker: PhantomData<fn() -> T>,
}

impl<T: serde::de::DeserializeOwned> TypedEventIterator<T> {
    /// Await the next element, deserialized into `T`.
    pub async fn next(&self) -> Option<RpcResult<T>> {
        match self.inner.next().await {
            Some(Ok(value)) => Some(serde_json::from_value(value).map_err(|err| {
                RpcError::internal("Subscription payload did not match the expected type")
                    .with_cause(err.to_string())
            })),
            Some(Err(err)) => Some(Err(err)),
            None => None,
        }
    }

    /// Shut the underlying subscription down.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Borrow the untyped iterator.
    pub fn as_untyped(&self) -> &EventIterator {
        &self.inner
    }
}

impl<T> std::fmt::Debug for TypedEventIterator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedEventIterator")
            .field("inner", &self.inner)
            .finish()
    }
}
