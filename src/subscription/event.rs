//! Wire event types for subscription streaming

use crate::error::RpcError;
use serde::{Deserialize, Serialize};

/// Event with optional metadata for streaming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event<T> {
    /// The event data
    pub data: T,
    /// Optional event ID for resumption
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Optional retry interval in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
}

impl<T> Event<T> {
    /// Create a new event with just data
    pub fn new(data: T) -> Self {
        Self {
            data,
            id: None,
            retry: None,
        }
    }

    /// Create an event with an ID
    pub fn with_id(data: T, id: impl Into<String>) -> Self {
        Self {
            data,
            id: Some(id.into()),
            retry: None,
        }
    }
}

/// Event delivered by the host on a subscription channel.
///
/// Exactly one of three shapes crosses the wire:
///
/// ```json
/// {"type": "data", "payload": {"data": ..., "id": "...", "retry": 1000}}
/// {"type": "error", "payload": {"code": "...", "message": "..."}}
/// {"type": "completed"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
#[non_exhaustive]
pub enum SubscriptionEvent {
    /// Data event
    Data {
        /// Event payload
        payload: Event<serde_json::Value>,
    },
    /// Error event; terminal for the current connection
    Error {
        /// Error details
        payload: RpcError,
    },
    /// Completion event; terminal for the subscription
    Completed,
}

impl SubscriptionEvent {
    /// Create a data event
    pub fn data(payload: Event<serde_json::Value>) -> Self {
        Self::Data { payload }
    }

    /// Create an error event
    pub fn error(err: RpcError) -> Self {
        Self::Error { payload: err }
    }

    /// Create a completion event
    pub fn completed() -> Self {
        Self::Completed
    }
}

// =============================================================================
// Tests
// =============================================================================
