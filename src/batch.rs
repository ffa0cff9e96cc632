//! Batch request processing
//!
//! A batch sends several unary requests in one `rpc_call_batch` round
//! trip. Per-entry success and failure are independent: the engine never
//! fails the whole batch because one entry errored, and result order
//! matches request order. Paths are validated before anything is sent.
//!
//! # Example
//! ```rust,ignore
//! let response = client
//!     .batch()
//!     .add("health", "health")
//!     .add_with_input("user", "user.get", json!({"id": 1}))
//!     .send(CallOptions::default())
//!     .await?;
//!
//! assert!(response.is_success("health"));
//! let user = response.get_result("user");
//! ```

use crate::config::{CallOptions, ClientConfig};
use crate::error::{ClientError, RpcError, RpcResult};
use crate::path::validate_path_with;
use crate::transport::{Transport, methods};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

// =============================================================================
// Wire Types
// =============================================================================

/// A single request within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleRequest {
    /// Unique identifier correlating this request with its result.
    pub id: String,
    /// The procedure path to call (e.g. "user.get").
    pub path: String,
    /// Input data; absent inputs are normalized to null.
    #[serde(default)]
    pub input: Value,
}

/// The batch payload sent to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Requests in submission order.
    pub requests: Vec<SingleRequest>,
}

/// Result of one request within a batch: exactly one of `data`/`error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// The id of the originating request.
    pub id: String,
    /// Successful result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Failure payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl BatchResult {
    /// Whether this entry succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The batch response: one result per request, in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Results in request order.
    pub results: Vec<BatchResult>,
}

// =============================================================================
// Batch Engine
// =============================================================================

/// Execute a batch in a single transport round trip.
///
/// Every path is validated against the configured rules before anything is
/// sent; any violation rejects the whole batch with a `VALIDATION_ERROR`
/// listing the offending ids. Partial failure of entries does not fail the
/// call.
pub async fn execute_batch(
    transport: &Arc<dyn Transport>,
    config: &ClientConfig,
    batch: BatchRequest,
    opts: &CallOptions,
) -> RpcResult<BatchResponse> {
    let mut invalid = Vec::new();
    for request in &batch.requests {
        if let Err(ClientError::Validation { issues, .. }) =
            validate_path_with(&request.path, &config.path_rules)
        {
            invalid.push(json!({
                "id": request.id,
                "path": request.path,
                "issues": issues,
            }));
        }
    }
    if !invalid.is_empty() {
        return Err(RpcError::validation(format!(
            "Batch contains {} invalid path(s)",
            invalid.len()
        ))
        .with_details(json!({ "invalid": invalid })));
    }

    let request_count = batch.requests.len();
    let args = json!({ "batch": batch });
    let started = Instant::now();

    let invoke = transport.invoke(methods::CALL_BATCH, args);
    let effective_timeout = opts.timeout.or(config.timeout);
    let raw = crate::call::race_transport(
        invoke,
        methods::CALL_BATCH,
        effective_timeout,
        opts.signal.as_deref(),
    )
    .await
    .map_err(ClientError::into_public)?;

    let response: BatchResponse = serde_json::from_value(raw).map_err(|err| {
        RpcError::internal("Malformed batch response").with_cause(err.to_string())
    })?;

    let error_count = response.results.iter().filter(|r| !r.is_success()).count();
    debug!(
        requests = request_count,
        results = response.results.len(),
        errors = error_count,
        duration_ms = started.elapsed().as_millis() as u64,
        "Batch executed"
    );
    Ok(response)
}

// =============================================================================
// Typed Builder
// =============================================================================

/// Accumulates batch entries keyed by caller-chosen ids.
///
/// Created by `RpcClient::batch()`. Ids must be unique within the batch;
/// duplicates are rejected when the batch is sent.
pub struct BatchBuilder {
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
    requests: Vec<SingleRequest>,
}

impl BatchBuilder {
    pub(crate) fn new(transport: Arc<dyn Transport>, config: Arc<ClientConfig>) -> Self {
        Self {
            transport,
            config,
            requests: Vec::new(),
        }
    }

    /// Add a request with no input (normalized to null).
    #[must_use = "This method returns a new BatchBuilder and does not modify self"]
    pub fn add(self, id: impl Into<String>, path: impl Into<String>) -> Self {
        self.add_with_input(id, path, Value::Null)
    }

    /// Add a request with an input payload.
    #[must_use = "This method returns a new BatchBuilder and does not modify self"]
    pub fn add_with_input(
        mut self,
        id: impl Into<String>,
        path: impl Into<String>,
        input: Value,
    ) -> Self {
        let request = SingleRequest {
            id: id.into(),
            path: path.into(),
            input,
        };
        trace!(id = %request.id, path = %request.path, "Batch entry added");
        self.requests.push(request);
        self
    }

    /// Number of accumulated entries.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the builder is empty.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Send the batch and wrap the response for id-keyed access.
    pub async fn send(self, opts: CallOptions) -> RpcResult<BatchResponseHandle> {
        let mut seen = std::collections::HashSet::new();
        for request in &self.requests {
            if !seen.insert(request.id.clone()) {
                return Err(RpcError::validation(format!(
                    "Duplicate batch id '{}'",
                    request.id
                )));
            }
        }

        let response = execute_batch(
            &self.transport,
            &self.config,
            BatchRequest {
                requests: self.requests,
            },
            &opts,
        )
        .await?;
        Ok(BatchResponseHandle::new(response))
    }
}

/// Id-keyed view over a [`BatchResponse`].
#[derive(Debug, Clone)]
pub struct BatchResponseHandle {
    results: Vec<BatchResult>,
    index: HashMap<String, usize>,
}

impl BatchResponseHandle {
    fn new(response: BatchResponse) -> Self {
        let index = response
            .results
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        Self {
            results: response.results,
            index,
        }
    }

    /// The result for `id`. An id absent from the response resolves to a
    /// synthetic `NOT_FOUND` error entry.
    pub fn get_result(&self, id: &str) -> BatchResult {
        match self.index.get(id).and_then(|&i| self.results.get(i)) {
            Some(result) => result.clone(),
            None => BatchResult {
                id: id.to_string(),
                data: None,
                error: Some(RpcError::not_found(format!(
                    "No batch result for id '{}'",
                    id
                ))),
            },
        }
    }

    /// Whether the entry for `id` succeeded.
    pub fn is_success(&self, id: &str) -> bool {
        self.index
            .get(id)
            .and_then(|&i| self.results.get(i))
            .is_some_and(BatchResult::is_success)
    }

    /// All successful entries, in request order.
    pub fn get_successful(&self) -> Vec<&BatchResult> {
        self.results.iter().filter(|r| r.is_success()).collect()
    }

    /// All failed entries, in request order.
    pub fn get_failed(&self) -> Vec<&BatchResult> {
        self.results.iter().filter(|r| !r.is_success()).collect()
    }

    /// Number of successful entries.
    pub fn success_count(&self) -> usize {
        self.get_successful().len()
    }

    /// Number of failed entries.
    pub fn error_count(&self) -> usize {
        self.get_failed().len()
    }

    /// All results in request order.
    pub fn results(&self) -> &[BatchResult] {
        &self.results
    }
}

// =============================================================================
// Tests
// =============================================================================
