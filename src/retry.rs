//! Retry and deduplication utilities
//!
//! Generic wrappers for idempotent request shaping: capped exponential
//! backoff with optional jitter, a retry combinator gated on error codes,
//! a deterministic key for structurally equal inputs, and an in-flight
//! deduplication table that lets concurrent identical calls share one
//! transport round-trip.

use crate::error::{RpcResult, codes};
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use rand::Rng;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

// =============================================================================
// Backoff
// =============================================================================

/// Compute the delay before retry attempt `attempt + 1`.
///
/// The raw delay is `base × 2^attempt` capped at `max`; with `jitter` it is
/// additionally multiplied by a uniform factor in `[0.5, 1.0]`. The result
/// always lies in `(0, max]` (a sub-millisecond product is floored at 1ms),
/// and without jitter it is monotonically non-decreasing in `attempt`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration, jitter: bool) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    let raw = base.checked_mul(factor).unwrap_or(max).min(max);
    let delay = if jitter {
        raw.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    } else {
        raw
    };
    let floor = Duration::from_millis(1).min(max);
    delay.clamp(floor, max)
}

// =============================================================================
// Retry
// =============================================================================

/// Configuration for [`with_retry`].
#[derive(Clone)]
pub struct RetryConfig {
    /// Retry attempts after the initial call.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap applied to the exponential delay.
    pub max_delay: Duration,
    /// Multiply each delay by a uniform factor in `[0.5, 1.0]`.
    pub jitter: bool,
    /// Error codes worth retrying; everything else fails immediately.
    pub retryable_codes: HashSet<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: true,
            retryable_codes: [codes::INTERNAL_ERROR, codes::TIMEOUT, "UNAVAILABLE"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl RetryConfig {
    /// Create a configuration with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry budget.
    #[must_use = "This method returns a new RetryConfig and does not modify self"]
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the base delay.
    #[must_use = "This method returns a new RetryConfig and does not modify self"]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the delay cap.
    #[must_use = "This method returns a new RetryConfig and does not modify self"]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    #[must_use = "This method returns a new RetryConfig and does not modify self"]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the retryable code set.
    #[must_use = "This method returns a new RetryConfig and does not modify self"]
    pub fn with_retryable_codes<I, S>(mut self, retryable_codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_codes = retryable_codes.into_iter().map(Into::into).collect();
        self
    }

    /// Check whether an error code is worth retrying.
    pub fn is_retryable(&self, code: &str) -> bool {
        self.retryable_codes.contains(code)
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("retryable_codes", &self.retryable_codes)
            .finish()
    }
}

/// Run `f`, retrying on retryable error codes up to the configured budget.
///
/// `f` is called once per attempt. The delay between attempt `n` and
/// `n + 1` is [`calculate_backoff`]`(n, base, max, jitter)`.
///
/// # Example
/// ```rust,ignore
/// let config = RetryConfig::new().with_max_retries(2);
/// let user = with_retry(&config, || client.query::<User>("user.get", input.clone(), None)).await?;
/// ```
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut f: F) -> RpcResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RpcResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_retries && config.is_retryable(&err.code) => {
                let delay = calculate_backoff(
                    attempt,
                    config.base_delay,
                    config.max_delay,
                    config.jitter,
                );
                debug!(
                    code = %err.code,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after retryable error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// =============================================================================
// Stable Stringify and Deduplication Keys
// =============================================================================

/// Serialize a JSON value deterministically.
///
/// Primitives render as JSON, arrays recurse, and object keys are sorted
/// lexicographically, so two values that are deep-equal up to key order
/// produce identical strings.
pub fn stable_stringify(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(stable_stringify).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(key, _)| *key);
            let parts: Vec<String> = entries
                .into_iter()
                .map(|(key, value)| {
                    let rendered_key = serde_json::to_string(key)
                        .unwrap_or_else(|_| format!("\"{}\"", key));
                    format!("{}:{}", rendered_key, stable_stringify(value))
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        primitive => serde_json::to_string(primitive).unwrap_or_else(|_| "null".to_string()),
    }
}

/// Deduplication key for a call: `"{path}:{stable_stringify(input)}"`.
pub fn deduplication_key(path: &str, input: &Value) -> String {
    format!("{}:{}", path, stable_stringify(input))
}

// =============================================================================
// In-Flight Deduplication
// =============================================================================

type SharedCall = Shared<BoxFuture<'static, RpcResult<Value>>>;

/// Table of in-flight calls keyed by [`deduplication_key`].
///
/// While a call for a key is pending, further callers with the same key
/// await the same future and receive a clone of its outcome; the entry is
/// removed when the call settles (success or failure), so a later call
/// runs fresh.
#[derive(Clone, Default)]
pub struct DedupMap {
    pending: Arc<DashMap<String, SharedCall>>,
}

impl DedupMap {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of in-flight entries.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no calls are in flight.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Run `f` under deduplication for `key`.
    ///
    /// If a call for `key` is already pending its outcome is shared;
    /// otherwise `f` is invoked exactly once and registered. The entry is
    /// removed in a finalization step on the shared future itself, so the
    /// table cannot leak even when the call fails.
    pub async fn with_dedup<F, Fut>(&self, key: impl Into<String>, f: F) -> RpcResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RpcResult<Value>> + Send + 'static,
    {
        let key = key.into();
        let shared = match self.pending.entry(key.clone()) {
            dashmap::Entry::Occupied(entry) => {
                trace!(key = %key, "Joining in-flight call");
                entry.get().clone()
            }
            dashmap::Entry::Vacant(entry) => {
                let pending = self.pending.clone();
                let cleanup_key = key.clone();
                let call = f();
                let fut: BoxFuture<'static, RpcResult<Value>> = Box::pin(async move {
                    let result = call.await;
                    pending.remove(&cleanup_key);
                    result
                });
                let shared = fut.shared();
                entry.insert(shared.clone());
                shared
            }
        };
        shared.await
    }
}

impl fmt::Debug for DedupMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupMap")
            .field("pending", &self.pending.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
