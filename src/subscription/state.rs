//! Subscription connection state machine
//!
//! ```text
//! Connecting → Open → (Reconnecting ↔ Open)* → Closed
//! ```
//!
//! `Closed` is terminal. An `error` event moves an open connection to
//! `Reconnecting` when auto-reconnect is enabled and budget remains;
//! `completed`, explicit close and abort all go straight to `Closed` from
//! any state.

use serde::{Deserialize, Serialize};

/// Connection state of a subscription iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// `rpc_subscribe` is in flight for the first connection
    Connecting,
    /// The subscription is live and events flow
    Open,
    /// The previous connection failed; a re-subscribe is pending
    Reconnecting,
    /// The subscription has ended; no further events are surfaced
    Closed,
}

impl ConnectionState {
    /// Check if this is the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Connecting, ConnectionState::Open)
                | (ConnectionState::Connecting, ConnectionState::Closed)
                | (ConnectionState::Open, ConnectionState::Reconnecting)
                | (ConnectionState::Open, ConnectionState::Closed)
                | (ConnectionState::Reconnecting, ConnectionState::Open)
                | (ConnectionState::Reconnecting, ConnectionState::Closed)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
