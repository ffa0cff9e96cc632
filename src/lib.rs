#![warn(missing_docs)]
//! # nexus-rpc-client
//!
//! An ORPC-style, type-safe RPC client for applications that talk to a
//! native host over a request/response IPC bridge. Queries, mutations and
//! streaming subscriptions are driven from a declarative contract, wrapped
//! in composable middleware, and carried over a pluggable transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Application                           │
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │ RpcClient  │  │ BatchBuilder │  │ EventIterator        │  │
//! │  └─────┬──────┘  └──────┬───────┘  └──────────┬───────────┘  │
//! │        │                │                     │              │
//! │        ▼                ▼                     ▼              │
//! │  ┌──────────────────────────────┐  ┌──────────────────────┐  │
//! │  │ Call Engine                  │  │ Subscription Engine  │  │
//! │  │  validate → hooks →          │  │  connect → queue →   │  │
//! │  │  middleware → invoke         │  │  consume → reconnect │  │
//! │  └──────────────┬───────────────┘  └──────────┬───────────┘  │
//! └─────────────────┼─────────────────────────────┼──────────────┘
//!                   │                             │
//!                   ▼                             ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Transport (trait)                        │
//! │  ┌─────────────────────┐  ┌──────────────────────────────┐   │
//! │  │ invoke(method,args) │  │ listen(channel) → unlisten   │   │
//! │  └─────────────────────┘  └──────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nexus_rpc_client::prelude::*;
//! use serde_json::json;
//!
//! let client = RpcClient::new(my_transport);
//! client.install_contract(
//!     Contract::builder()
//!         .query("health")
//!         .namespace("user", |ns| ns.query("get").mutation("create"))
//!         .subscription("stream.chat")
//!         .build()?,
//! )?;
//!
//! // Typed unary call
//! let user: User = client.query("user.get", json!({"id": 1}), None).await?;
//!
//! // Streaming subscription with resumption and auto-reconnect
//! let chat = client.subscribe("stream.chat", json!({"room": 7}), None).await?;
//! while let Some(message) = chat.next().await {
//!     println!("{}", message?);
//! }
//!
//! // Batched calls
//! let response = client
//!     .batch()
//!     .add("health", "health")
//!     .add_with_input("me", "user.get", json!({"id": 1}))
//!     .send(CallOptions::default())
//!     .await?;
//! assert!(response.is_success("health"));
//! ```
//!
//! ## Middleware
//!
//! Middleware wraps every unary call in an onion model and may mutate the
//! request's `meta` bag and input, observe results, or recover from
//! errors:
//!
//! ```rust,ignore
//! let config = ClientConfig::new().with_middleware(
//!     |mut ctx: RequestContext, next: Next| async move {
//!         ctx.meta.insert("authorization".into(), json!(token()));
//!         next(ctx).await
//!     },
//! );
//! ```
//!
//! ## Errors
//!
//! All public APIs fail with [`RpcError`], an open code string plus
//! message, details and optional cause. Normalization of transport
//! failures is total: whatever the host throws, the caller sees this one
//! shape.

pub mod batch;
mod call;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod middleware;
pub mod path;
pub mod retry;
pub mod signal;
pub mod subscription;
pub mod transport;

pub use batch::{BatchBuilder, BatchRequest, BatchResponse, BatchResponseHandle, BatchResult, SingleRequest};
pub use client::{CallOutcome, RpcClient};
pub use config::{CallOptions, ClientConfig, LifecycleHooks, SubscribeOptions};
pub use contract::{Contract, ContractBuilder, ProcedureDef};
pub use error::{ClientError, RpcError, RpcResult, codes};
pub use middleware::{Middleware, MiddlewareFn, Next, ProcedureType, RequestContext, from_fn};
pub use path::{PathIssue, PathRules, validate_path, validate_path_with};
pub use retry::{DedupMap, RetryConfig, calculate_backoff, deduplication_key, stable_stringify, with_retry};
pub use signal::CancellationSignal;
pub use subscription::{
    ConsumeCallbacks, ConsumerHandle, EventIterator, FinishReason, SubscriptionEvent,
    SubscriptionId, TypedEventIterator, consume_event_iterator,
};
pub use transport::{EventHandler, ListenerHandle, Transport, TransportError};

/// Convenience re-exports for the common surface.
pub mod prelude {
    pub use crate::batch::BatchBuilder;
    pub use crate::client::{CallOutcome, RpcClient};
    pub use crate::config::{CallOptions, ClientConfig, SubscribeOptions};
    pub use crate::contract::{Contract, ProcedureDef};
    pub use crate::error::{RpcError, RpcResult};
    pub use crate::middleware::{Next, ProcedureType, RequestContext, from_fn};
    pub use crate::retry::{RetryConfig, with_retry};
    pub use crate::signal::CancellationSignal;
    pub use crate::subscription::{
        ConsumeCallbacks, EventIterator, FinishReason, consume_event_iterator,
    };
    pub use crate::transport::{Transport, TransportError};
}

#[cfg(test)]
mod tests;
