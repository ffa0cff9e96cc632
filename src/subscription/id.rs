//! Subscription ID type and channel naming

use crate::transport::SUBSCRIPTION_CHANNEL_PREFIX;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error parsing a subscription ID
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
    /// Subscription ID must start with 'sub_' prefix
    #[error("Subscription ID must start with 'sub_' prefix")]
    MissingPrefix,

    /// Invalid UUID format
    #[error("Invalid UUID format: {0}")]
    InvalidUuid(#[from] uuid::Error),
}

/// A unique, time-ordered subscription identifier based on UUID v7.
///
/// Every connection of an iterator gets a fresh one; a reconnect never
/// reuses the previous id. Rendered as `sub_<uuid>` on the wire.
///
/// # Example
/// ```rust,ignore
/// let id = SubscriptionId::new();
/// println!("{}", id); // sub_01234567-89ab-7cde-8f01-234567890abc
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new subscription ID using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse a subscription ID from its wire form, requiring the `sub_`
    /// prefix.
    ///
    /// Use [`SubscriptionId::parse_lenient`] to accept bare UUIDs as well.
    pub fn parse(s: &str) -> Result<Self, ParseIdError> {
        match s.strip_prefix("sub_") {
            Some(uuid_str) => Uuid::parse_str(uuid_str)
                .map(Self)
                .map_err(ParseIdError::InvalidUuid),
            None => Err(ParseIdError::MissingPrefix),
        }
    }

    /// Parse a subscription ID, accepting both wire forms.
    ///
    /// Accepts `sub_<uuid>` as well as a bare `<uuid>`, and ignores
    /// surrounding whitespace. Useful for hosts and logs that hand ids
    /// around without the prefix.
    ///
    /// # Example
    /// ```rust,ignore
    /// let id1 = SubscriptionId::parse_lenient("sub_01234567-89ab-7cde-8f01-234567890abc")?;
    /// let id2 = SubscriptionId::parse_lenient("01234567-89ab-7cde-8f01-234567890abc")?;
    /// ```
    pub fn parse_lenient(s: &str) -> Result<Self, ParseIdError> {
        let s = s.trim();
        let uuid_str = s.strip_prefix("sub_").unwrap_or(s);
        Uuid::parse_str(uuid_str)
            .map(Self)
            .map_err(ParseIdError::InvalidUuid)
    }

    /// The event-bus channel the host emits this subscription's events on.
    pub fn channel(&self) -> String {
        format!("{}{}", SUBSCRIPTION_CHANNEL_PREFIX, self)
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

impl From<SubscriptionId> for String {
    fn from(id: SubscriptionId) -> Self {
        id.to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
