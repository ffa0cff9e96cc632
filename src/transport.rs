//! Transport abstraction
//!
//! The client speaks to the host through exactly two capabilities: a unary
//! request/response `invoke` and a named event bus `listen` that hands back
//! a release handle. Everything else (batching, subscriptions,
//! introspection) is expressed over these two, so the whole engine can be
//! tested against an in-memory transport.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// Host method names understood by the RPC bridge.
pub mod methods {
    /// Unary procedure call: `{path, input}`.
    pub const CALL: &str = "rpc_call";
    /// Batched procedure call: `{batch: {requests}}`.
    pub const CALL_BATCH: &str = "rpc_call_batch";
    /// Open a subscription: `{request: {id, path, input, lastEventId?}}`.
    pub const SUBSCRIBE: &str = "rpc_subscribe";
    /// Close a subscription: `{id}`. Best-effort and idempotent.
    pub const UNSUBSCRIBE: &str = "rpc_unsubscribe";
    /// List registered procedure paths.
    pub const PROCEDURES: &str = "rpc_procedures";
    /// Count of live subscriptions on the host.
    pub const SUBSCRIPTION_COUNT: &str = "rpc_subscription_count";
}

/// Event channel prefix; the full channel is `rpc:subscription:sub_<uuid>`.
pub const SUBSCRIPTION_CHANNEL_PREFIX: &str = "rpc:subscription:";

/// Failure surfaced by the transport layer.
///
/// Hosts reject calls in two shapes: a structured JSON value (which may
/// match the public error shape and pass through normalization untouched)
/// or an opaque string.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The host rejected the call with a structured payload.
    Rejected(Value),
    /// The transport failed with an opaque message.
    Message(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(value) => write!(f, "call rejected: {}", value),
            Self::Message(message) => write!(f, "transport error: {}", message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Handler invoked for every payload delivered on a listened channel.
pub type EventHandler = Box<dyn Fn(Value) + Send + Sync>;

/// Release handle for an event-bus listener registration.
///
/// Dropping the handle without calling [`ListenerHandle::unlisten`] leaks
/// the registration on purpose: release is owned by the subscription
/// shutdown path and must happen at a controlled point in its sequence.
pub struct ListenerHandle {
    unlisten: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    /// Wrap an unlisten closure provided by the transport.
    pub fn new(unlisten: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unlisten: Some(Box::new(unlisten)),
        }
    }

    /// A handle that releases nothing. Useful for tests and adapters whose
    /// bus deregisters automatically.
    pub fn noop() -> Self {
        Self { unlisten: None }
    }

    /// Release the registration. Safe to call once; the handle is consumed.
    pub fn unlisten(mut self) {
        if let Some(release) = self.unlisten.take() {
            release();
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("released", &self.unlisten.is_none())
            .finish()
    }
}

/// The two host capabilities the client is built on.
///
/// Implementations wrap whatever IPC bridge the embedding application
/// uses; the engine only ever sees this trait. An in-memory implementation
/// backs the test suite.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform one request/response invocation of a host method.
    async fn invoke(&self, method: &str, args: Value) -> Result<Value, TransportError>;

    /// Register `handler` for payloads on `channel`, returning the release
    /// handle. Registration itself is synchronous and infallible; a broken
    /// bus surfaces through the subsequent `invoke` instead.
    fn listen(&self, channel: &str, handler: EventHandler) -> ListenerHandle;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_listener_handle_releases_once() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let handle = ListenerHandle::new(move || flag.store(true, Ordering::SeqCst));
        handle.unlisten();
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_noop_handle() {
        ListenerHandle::noop().unlisten();
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Message("pipe closed".into());
        assert!(err.to_string().contains("pipe closed"));
    }
}
