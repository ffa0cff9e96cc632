//! Middleware support for request/response processing
//!
//! Middleware wraps calls in an onion model: given layers `[m0, m1, m2]`
//! and a final handler `h`, execution enters `m0` first and unwinds in
//! reverse (`m0 → m1 → m2 → h → m2 → m1 → m0`). Each layer receives the
//! request context and a `next` continuation; it may mutate `ctx.meta` and
//! `ctx.input`, observe or transform the result, or recover from an error
//! by returning a value.
//!
//! A layer that panics does not tear the call down: the chain contains the
//! panic and surfaces it as a `MIDDLEWARE_ERROR` carrying the layer index.

use crate::error::{RpcError, RpcResult};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Type of procedure being called
#[derive(Clone, Debug, PartialEq, Eq, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ProcedureType {
    /// Read-only operation
    Query,
    /// Write operation
    Mutation,
    /// Streaming subscription
    Subscription,
}

impl std::fmt::Display for ProcedureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// Well-known keys of the per-request `meta` bag.
///
/// `meta` is free-form scratch space shared by the middleware chain; these
/// names are conventions, not an exhaustive list.
pub mod meta_keys {
    /// Bearer token or similar credential attached by an auth layer.
    pub const AUTHORIZATION: &str = "authorization";
    /// Opaque application context forwarded to the host.
    pub const CLIENT_CONTEXT: &str = "clientContext";
    /// Timing marker set by instrumentation layers (ms since epoch).
    pub const STARTED_AT: &str = "startedAt";
}

/// Request information passed through the middleware chain.
#[derive(Clone, Debug)]
pub struct RequestContext {
    /// Full path of the procedure (e.g. "user.get")
    pub path: String,
    /// Type of procedure
    pub procedure_type: ProcedureType,
    /// Input data as JSON
    pub input: serde_json::Value,
    /// Free-form per-request scratch space for middleware
    pub meta: HashMap<String, serde_json::Value>,
    /// Effective timeout for the call, if any
    pub timeout: Option<Duration>,
}

impl RequestContext {
    /// Create a context for a call with empty meta.
    pub fn new(path: impl Into<String>, procedure_type: ProcedureType, input: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            procedure_type,
            input,
            meta: HashMap::new(),
            timeout: None,
        }
    }

    /// Get the namespace (first part of path)
    pub fn namespace(&self) -> Option<&str> {
        self.path.split('.').next()
    }

    /// Get the procedure name (last part of path)
    pub fn procedure(&self) -> &str {
        self.path.split('.').next_back().unwrap_or(&self.path)
    }
}

/// Next function in the middleware chain
pub type Next = Arc<
    dyn Fn(RequestContext) -> Pin<Box<dyn Future<Output = RpcResult<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Middleware function type
pub type MiddlewareFn = Arc<
    dyn Fn(
            RequestContext,
            Next,
        ) -> Pin<Box<dyn Future<Output = RpcResult<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Trait for implementing custom middleware
pub trait Middleware: Send + Sync {
    /// Process the request, optionally calling next
    fn handle(
        &self,
        ctx: RequestContext,
        next: Next,
    ) -> Pin<Box<dyn Future<Output = RpcResult<serde_json::Value>> + Send>>;
}

/// Implement Middleware for function types to enable conversion.
///
/// This allows both regular async functions and closures to be used as
/// middleware.
///
/// # Example
/// ```rust,ignore
/// async fn logging(ctx: RequestContext, next: Next) -> RpcResult<serde_json::Value> {
///     println!("[{}] {}", ctx.procedure_type, ctx.path);
///     next(ctx).await
/// }
///
/// let config = ClientConfig::new().with_middleware(logging);
/// ```
impl<F, Fut> Middleware for F
where
    F: Fn(RequestContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<serde_json::Value>> + Send + 'static,
{
    fn handle(
        &self,
        ctx: RequestContext,
        next: Next,
    ) -> Pin<Box<dyn Future<Output = RpcResult<serde_json::Value>> + Send>> {
        Box::pin(self(ctx, next))
    }
}

/// Create a [`MiddlewareFn`] from an async function or closure.
pub fn from_fn<F, Fut>(f: F) -> MiddlewareFn
where
    F: Fn(RequestContext, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<serde_json::Value>> + Send + 'static,
{
    Arc::new(move |ctx, next| Box::pin(f(ctx, next)))
}

/// Render a panic payload as a message string.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "middleware panicked".to_string()
    }
}

/// Build a middleware chain from a list of middleware functions and a final
/// handler.
///
/// Middleware is folded in reverse so the first layer in the list wraps all
/// subsequent layers: declared order is entry order. Every layer runs under
/// a panic guard; a panic becomes `MIDDLEWARE_ERROR` with
/// `{middlewareIndex}` in details instead of unwinding through the caller.
///
/// # Example
/// ```rust,ignore
/// // Given middleware [M1, M2, M3] and handler H:
/// // Execution order: M1 → M2 → M3 → H → M3 → M2 → M1
/// let chain = build_middleware_chain(vec![m1, m2, m3], handler);
/// ```
pub fn build_middleware_chain(middleware: Vec<MiddlewareFn>, final_handler: Next) -> Next {
    middleware
        .into_iter()
        .enumerate()
        .rev()
        .fold(final_handler, |next, (index, mw)| {
            Arc::new(move |ctx| {
                let mw = mw.clone();
                let next = next.clone();
                Box::pin(async move {
                    match AssertUnwindSafe((mw)(ctx, next)).catch_unwind().await {
                        Ok(result) => result,
                        Err(panic) => Err(RpcError::middleware(
                            format!("Middleware failed: {}", panic_message(panic.as_ref())),
                            index,
                        )),
                    }
                })
            })
        })
}

// =============================================================================
// Tests
// =============================================================================
