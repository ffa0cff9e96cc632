//! Single-call execution engine
//!
//! One unary call runs through: path validation → request context → the
//! `on_request` hook → the middleware chain → the transport invocation,
//! raced against the effective timeout (per-call override, then configured
//! default, then none) and the external abort signal. Every failure leaves
//! through error normalization and the `on_error` hook; the public API
//! only ever throws the normalized [`RpcError`] shape.

use crate::config::{CallOptions, ClientConfig};
use crate::contract::ProcedureDef;
use crate::error::{ClientError, RpcError, RpcResult, normalize_transport_error};
use crate::middleware::{Next, ProcedureType, RequestContext, build_middleware_chain};
use crate::path::validate_path_with;
use crate::signal::CancellationSignal;
use crate::transport::{Transport, TransportError, methods};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Race a transport invocation against a deadline and an abort signal.
///
/// The abort signal wins over a simultaneously elapsed deadline, and a
/// signal that is already tripped cancels the call before the transport is
/// polled at all. Cancellation after the response has been observed is a
/// no-op by construction: the race has already resolved.
pub(crate) async fn race_transport(
    invoke: impl Future<Output = Result<Value, TransportError>>,
    path: &str,
    timeout: Option<Duration>,
    signal: Option<&CancellationSignal>,
) -> Result<Value, ClientError> {
    let deadline = async {
        match timeout {
            Some(duration) => tokio::time::sleep(duration).await,
            None => futures::future::pending().await,
        }
    };
    let aborted = async {
        match signal {
            Some(signal) => signal.cancelled().await,
            None => futures::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        _ = aborted => Err(ClientError::Cancelled {
            path: path.to_string(),
            reason: signal.and_then(CancellationSignal::reason),
        }),
        _ = deadline => Err(ClientError::Timeout {
            path: path.to_string(),
            timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
        }),
        result = invoke => result.map_err(|err| normalize_transport_error(path, err)),
    }
}

/// Execute one unary call through the full pipeline.
pub(crate) async fn execute_call(
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
    procedure: Option<Arc<ProcedureDef>>,
    path: &str,
    procedure_type: ProcedureType,
    input: Value,
    opts: CallOptions,
) -> RpcResult<Value> {
    let mut ctx = RequestContext::new(path, procedure_type, input);
    ctx.meta = opts.meta;
    ctx.timeout = opts.timeout.or(config.timeout);

    if let Err(err) = validate_path_with(path, &config.path_rules) {
        return fail(&config, &ctx, err.into_public());
    }

    if let Some(def) = procedure.as_deref()
        && !def.check_input(&ctx.input)
    {
        return fail(
            &config,
            &ctx,
            RpcError::validation(format!("Input rejected by contract for '{}'", path)),
        );
    }

    if let Some(on_request) = &config.hooks.on_request {
        on_request(&ctx);
    }
    trace!(path = %path, kind = %procedure_type, "Dispatching call");

    let signal = opts.signal.clone();
    let base: Next = {
        let transport = transport.clone();
        Arc::new(move |ctx: RequestContext| {
            let transport = transport.clone();
            let signal = signal.clone();
            Box::pin(async move {
                let args = json!({ "path": ctx.path, "input": ctx.input });
                race_transport(
                    transport.invoke(methods::CALL, args),
                    &ctx.path,
                    ctx.timeout,
                    signal.as_deref(),
                )
                .await
                .map_err(ClientError::into_public)
            })
        })
    };

    let chain = build_middleware_chain(config.middleware.clone(), base);
    match chain(ctx.clone()).await {
        Ok(value) => {
            if let Some(def) = procedure.as_deref()
                && !def.check_output(&value)
            {
                return fail(
                    &config,
                    &ctx,
                    RpcError::validation(format!("Output rejected by contract for '{}'", path)),
                );
            }
            if let Some(on_response) = &config.hooks.on_response {
                on_response(&ctx, &value);
            }
            Ok(value)
        }
        Err(err) => fail(&config, &ctx, err),
    }
}

/// Fire the error hook and surface the public error.
fn fail(config: &ClientConfig, ctx: &RequestContext, err: RpcError) -> RpcResult<Value> {
    debug!(path = %ctx.path, code = %err.code, "Call failed");
    if let Some(on_error) = &config.hooks.on_error {
        on_error(ctx, &err);
    }
    Err(err)
}

// =============================================================================
// Tests
// =============================================================================
