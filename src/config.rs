//! Client configuration surface
//!
//! Configuration lives on the client handle, not in process globals. The
//! client snapshots its [`ClientConfig`] as an `Arc` at the start of every
//! call, so updates through `RpcClient::configure` are visible to
//! subsequent calls only; in-flight calls keep the configuration they
//! entered with.
//!
//! # Example
//! ```rust,ignore
//! use std::time::Duration;
//! use nexus_rpc_client::{ClientConfig, CallOptions};
//!
//! let config = ClientConfig::new()
//!     .with_timeout(Duration::from_secs(30))
//!     .with_subscription_path("stream.chat")
//!     .with_middleware(auth_middleware)
//!     .on_error(|ctx, err| tracing::warn!(path = %ctx.path, code = %err.code, "call failed"));
//!
//! let opts = CallOptions::new().with_timeout(Duration::from_millis(50));
//! ```

use crate::error::{RpcError, RpcResult};
use crate::middleware::{Middleware, MiddlewareFn, RequestContext};
use crate::path::PathRules;
use crate::signal::CancellationSignal;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Minimum accepted reconnect delay.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(1);
/// Maximum accepted reconnect delay.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(3600);

// =============================================================================
// Lifecycle Hooks
// =============================================================================

/// Hook invoked before a call enters the middleware chain.
pub type OnRequest = Arc<dyn Fn(&RequestContext) + Send + Sync>;
/// Hook invoked with the successful result of a call.
pub type OnResponse = Arc<dyn Fn(&RequestContext, &Value) + Send + Sync>;
/// Hook invoked with the public error of a failed call.
pub type OnError = Arc<dyn Fn(&RequestContext, &RpcError) + Send + Sync>;

/// Lifecycle hooks fired by the call engine.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    /// Fired after path validation, before the middleware chain.
    pub on_request: Option<OnRequest>,
    /// Fired on success, after the middleware chain unwinds.
    pub on_response: Option<OnResponse>,
    /// Fired with the normalized public error on failure.
    pub on_error: Option<OnError>,
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("on_request", &self.on_request.is_some())
            .field("on_response", &self.on_response.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Client-wide configuration.
#[derive(Clone, Default)]
pub struct ClientConfig {
    /// Ordered middleware; first entry enters first.
    pub middleware: Vec<MiddlewareFn>,
    /// Paths dispatched to the subscription engine by `dispatch`.
    pub subscription_paths: HashSet<String>,
    /// Default unary timeout; per-call options override it.
    pub timeout: Option<Duration>,
    /// Extra path validation rules applied to every call.
    pub path_rules: PathRules,
    /// Lifecycle hooks fired by the call engine.
    pub hooks: LifecycleHooks,
}

impl ClientConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware layer; layers run in the order added.
    pub fn with_middleware<M: Middleware + 'static>(self, middleware: M) -> Self {
        let middleware = Arc::new(middleware);
        self.with_middleware_fn(Arc::new(move |ctx, next| middleware.handle(ctx, next)))
    }

    /// Append an already-boxed middleware function (e.g. from
    /// [`crate::middleware::from_fn`]).
    #[must_use = "This method returns a new ClientConfig and does not modify self"]
    pub fn with_middleware_fn(mut self, middleware: MiddlewareFn) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Register a path as a subscription for call-time dispatch.
    #[must_use = "This method returns a new ClientConfig and does not modify self"]
    pub fn with_subscription_path(mut self, path: impl Into<String>) -> Self {
        self.subscription_paths.insert(path.into());
        self
    }

    /// Set the default unary timeout.
    #[must_use = "This method returns a new ClientConfig and does not modify self"]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set extra path validation rules.
    #[must_use = "This method returns a new ClientConfig and does not modify self"]
    pub fn with_path_rules(mut self, rules: PathRules) -> Self {
        self.path_rules = rules;
        self
    }

    /// Set the request hook.
    #[must_use = "This method returns a new ClientConfig and does not modify self"]
    pub fn on_request<F: Fn(&RequestContext) + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.hooks.on_request = Some(Arc::new(hook));
        self
    }

    /// Set the response hook.
    #[must_use = "This method returns a new ClientConfig and does not modify self"]
    pub fn on_response<F: Fn(&RequestContext, &Value) + Send + Sync + 'static>(
        mut self,
        hook: F,
    ) -> Self {
        self.hooks.on_response = Some(Arc::new(hook));
        self
    }

    /// Set the error hook.
    #[must_use = "This method returns a new ClientConfig and does not modify self"]
    pub fn on_error<F: Fn(&RequestContext, &RpcError) + Send + Sync + 'static>(
        mut self,
        hook: F,
    ) -> Self {
        self.hooks.on_error = Some(Arc::new(hook));
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> RpcResult<()> {
        if let Some(timeout) = self.timeout
            && timeout.is_zero()
        {
            return Err(RpcError::validation("timeout must be greater than zero"));
        }
        trace!(
            middleware = self.middleware.len(),
            subscription_paths = self.subscription_paths.len(),
            "ClientConfig validated"
        );
        Ok(())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("middleware", &self.middleware.len())
            .field("subscription_paths", &self.subscription_paths)
            .field("timeout", &self.timeout)
            .field("path_rules", &self.path_rules)
            .field("hooks", &self.hooks)
            .finish()
    }
}

// =============================================================================
// Per-Call Options
// =============================================================================

/// Options for a single unary call.
#[derive(Clone, Default)]
pub struct CallOptions {
    /// Timeout override; takes precedence over the configured default.
    pub timeout: Option<Duration>,
    /// Initial `meta` entries for the request context.
    pub meta: HashMap<String, Value>,
    /// External abort signal.
    pub signal: Option<Arc<CancellationSignal>>,
}

impl CallOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the timeout for this call.
    #[must_use = "This method returns a new CallOptions and does not modify self"]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Seed a `meta` entry visible to the middleware chain.
    #[must_use = "This method returns a new CallOptions and does not modify self"]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Attach an external abort signal.
    #[must_use = "This method returns a new CallOptions and does not modify self"]
    pub fn with_signal(mut self, signal: Arc<CancellationSignal>) -> Self {
        self.signal = Some(signal);
        self
    }
}

impl fmt::Debug for CallOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallOptions")
            .field("timeout", &self.timeout)
            .field("meta_keys", &self.meta.keys().collect::<Vec<_>>())
            .field("signal", &self.signal.is_some())
            .finish()
    }
}

// =============================================================================
// Subscription Options
// =============================================================================

/// Options for opening a subscription.
#[derive(Clone)]
pub struct SubscribeOptions {
    /// Resume token sent with the initial subscribe.
    pub last_event_id: Option<String>,
    /// Reconnect automatically after an `error` event.
    pub auto_reconnect: bool,
    /// Base reconnect delay; doubled per attempt with jitter.
    pub reconnect_delay: Duration,
    /// Reconnect budget before the subscription fails terminally.
    pub max_reconnects: u32,
    /// External abort signal driving the shutdown path.
    pub signal: Option<Arc<CancellationSignal>>,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            last_event_id: None,
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(1),
            max_reconnects: 5,
            signal: None,
        }
    }
}

impl SubscribeOptions {
    /// Create options with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a previously observed event id.
    #[must_use = "This method returns a new SubscribeOptions and does not modify self"]
    pub fn with_last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = Some(id.into());
        self
    }

    /// Enable or disable automatic reconnection.
    #[must_use = "This method returns a new SubscribeOptions and does not modify self"]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the base reconnect delay.
    #[must_use = "This method returns a new SubscribeOptions and does not modify self"]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the reconnect budget.
    #[must_use = "This method returns a new SubscribeOptions and does not modify self"]
    pub fn with_max_reconnects(mut self, max: u32) -> Self {
        self.max_reconnects = max;
        self
    }

    /// Attach an external abort signal.
    #[must_use = "This method returns a new SubscribeOptions and does not modify self"]
    pub fn with_signal(mut self, signal: Arc<CancellationSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Validate the options.
    ///
    /// The reconnect delay must lie in `[1ms, 1h]` to keep a
    /// misconfigured backoff from busy-looping or stalling forever.
    pub fn validate(&self) -> RpcResult<()> {
        if self.reconnect_delay < MIN_RECONNECT_DELAY || self.reconnect_delay > MAX_RECONNECT_DELAY
        {
            return Err(RpcError::validation(format!(
                "reconnect_delay must be between {}ms and {}ms, got {}ms",
                MIN_RECONNECT_DELAY.as_millis(),
                MAX_RECONNECT_DELAY.as_millis(),
                self.reconnect_delay.as_millis()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("last_event_id", &self.last_event_id)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("max_reconnects", &self.max_reconnects)
            .field("signal", &self.signal.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
