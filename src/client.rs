//! The RPC client facade
//!
//! [`RpcClient`] is a cheap-to-clone handle carrying the transport, the
//! configuration and an optional installed contract. Rust has no property
//! proxies, so the contract-driven callable tree becomes an explicit
//! facade: `query`/`mutation` for typed unary calls, `subscribe` for
//! streams, and `dispatch` for kind-agnostic callers that want the
//! subscription-path check performed at call time.
//!
//! # Example
//! ```rust,ignore
//! let client = RpcClient::new(transport);
//! client.install_contract(
//!     Contract::builder()
//!         .query("health")
//!         .namespace("user", |ns| ns.query("get"))
//!         .subscription("stream.chat")
//!         .build()?,
//! )?;
//!
//! let health: Health = client.query("health", (), None).await?;
//! let chat = client.subscribe("stream.chat", json!({"room": 1}), None).await?;
//! ```

use crate::batch::BatchBuilder;
use crate::call::execute_call;
use crate::config::{CallOptions, ClientConfig, SubscribeOptions};
use crate::contract::{Contract, ProcedureDef};
use crate::error::{ClientError, RpcError, RpcResult, normalize_transport_error};
use crate::middleware::ProcedureType;
use crate::path::validate_path_with;
use crate::retry::{DedupMap, deduplication_key};
use crate::subscription::EventIterator;
use crate::transport::{Transport, methods};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::trace;

/// Result of a kind-agnostic dispatch.
#[derive(Debug)]
pub enum CallOutcome {
    /// The path was a unary procedure; this is its result.
    Response(Value),
    /// The path was registered as a subscription; this is its stream.
    Stream(EventIterator),
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    config: RwLock<Arc<ClientConfig>>,
    contract: RwLock<Option<Arc<Contract>>>,
    dedup: DedupMap,
}

/// Type-safe RPC client over an IPC transport.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Create a client with the default configuration.
    pub fn new(transport: impl Transport) -> Self {
        Self::from_arc(Arc::new(transport), ClientConfig::default())
    }

    /// Create a client with a configuration.
    pub fn with_config(transport: impl Transport, config: ClientConfig) -> RpcResult<Self> {
        config.validate()?;
        Ok(Self::from_arc(Arc::new(transport), config))
    }

    /// Create a client from an already-shared transport.
    pub fn from_arc(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                config: RwLock::new(Arc::new(config)),
                contract: RwLock::new(None),
                dedup: DedupMap::new(),
            }),
        }
    }

    /// The configuration snapshot a call starting now would use.
    pub fn config_snapshot(&self) -> Arc<ClientConfig> {
        self.inner
            .config
            .read()
            .map(|config| config.clone())
            .unwrap_or_default()
    }

    /// Update the configuration.
    ///
    /// Visible to subsequent calls only; calls already in flight keep the
    /// snapshot they captured at entry.
    pub fn configure(
        &self,
        f: impl FnOnce(ClientConfig) -> ClientConfig,
    ) -> RpcResult<()> {
        let updated = f((*self.config_snapshot()).clone());
        updated.validate()?;
        match self.inner.config.write() {
            Ok(mut slot) => {
                *slot = Arc::new(updated);
                Ok(())
            }
            Err(_) => Err(RpcError::internal("Client configuration lock poisoned")),
        }
    }

    /// Install a contract: registers its subscription paths for dispatch
    /// and its input/output predicates for unary calls.
    pub fn install_contract(&self, contract: Contract) -> RpcResult<()> {
        let subscription_paths = contract.subscription_paths();
        self.configure(|mut config| {
            config.subscription_paths.extend(subscription_paths);
            config
        })?;
        match self.inner.contract.write() {
            Ok(mut slot) => {
                *slot = Some(Arc::new(contract));
                Ok(())
            }
            Err(_) => Err(RpcError::internal("Client contract lock poisoned")),
        }
    }

    fn procedure_def(&self, path: &str) -> Option<Arc<ProcedureDef>> {
        self.inner
            .contract
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(|contract| contract.get(path)))
    }

    fn kind_of(&self, path: &str, fallback: ProcedureType) -> ProcedureType {
        self.procedure_def(path)
            .map(|def| def.procedure_type)
            .unwrap_or(fallback)
    }

    /// Perform a raw unary call, returning the JSON result.
    pub async fn call(
        &self,
        path: &str,
        input: Value,
        opts: Option<CallOptions>,
    ) -> RpcResult<Value> {
        let kind = self.kind_of(path, ProcedureType::Query);
        execute_call(
            self.inner.transport.clone(),
            self.config_snapshot(),
            self.procedure_def(path),
            path,
            kind,
            input,
            opts.unwrap_or_default(),
        )
        .await
    }

    /// Perform a typed query.
    pub async fn query<T: DeserializeOwned>(
        &self,
        path: &str,
        input: impl Serialize,
        opts: Option<CallOptions>,
    ) -> RpcResult<T> {
        self.typed_call(path, ProcedureType::Query, input, opts).await
    }

    /// Perform a typed mutation.
    pub async fn mutation<T: DeserializeOwned>(
        &self,
        path: &str,
        input: impl Serialize,
        opts: Option<CallOptions>,
    ) -> RpcResult<T> {
        self.typed_call(path, ProcedureType::Mutation, input, opts)
            .await
    }

    async fn typed_call<T: DeserializeOwned>(
        &self,
        path: &str,
        kind: ProcedureType,
        input: impl Serialize,
        opts: Option<CallOptions>,
    ) -> RpcResult<T> {
        let input = serde_json::to_value(input)?;
        let value = execute_call(
            self.inner.transport.clone(),
            self.config_snapshot(),
            self.procedure_def(path),
            path,
            kind,
            input,
            opts.unwrap_or_default(),
        )
        .await?;
        serde_json::from_value(value).map_err(|err| {
            RpcError::internal(format!("Response for '{}' did not match the expected type", path))
                .with_cause(err.to_string())
        })
    }

    /// Perform a unary call deduplicated against identical in-flight calls.
    ///
    /// Two calls with the same path and structurally equal input that
    /// overlap in time share one transport round trip and receive the same
    /// outcome.
    pub async fn call_deduped(
        &self,
        path: &str,
        input: Value,
        opts: Option<CallOptions>,
    ) -> RpcResult<Value> {
        let key = deduplication_key(path, &input);
        let client = self.clone();
        let path = path.to_string();
        self.inner
            .dedup
            .with_dedup(key, move || async move {
                client.call(&path, input, opts).await
            })
            .await
    }

    /// Open a subscription stream.
    pub async fn subscribe(
        &self,
        path: &str,
        input: Value,
        opts: Option<SubscribeOptions>,
    ) -> RpcResult<EventIterator> {
        let config = self.config_snapshot();
        validate_path_with(path, &config.path_rules).map_err(ClientError::into_public)?;
        trace!(path = %path, "Opening subscription");
        EventIterator::open(
            self.inner.transport.clone(),
            path.to_string(),
            input,
            opts.unwrap_or_default(),
        )
        .await
        .map_err(ClientError::into_public)
    }

    /// Dispatch a path according to the current configuration.
    ///
    /// Subscription-path membership is checked at call time against the
    /// configuration snapshot, so paths registered after the client was
    /// created dispatch correctly.
    pub async fn dispatch(&self, path: &str, input: Value) -> RpcResult<CallOutcome> {
        let config = self.config_snapshot();
        if config.subscription_paths.contains(path) {
            let stream = self.subscribe(path, input, None).await?;
            Ok(CallOutcome::Stream(stream))
        } else {
            let value = self.call(path, input, None).await?;
            Ok(CallOutcome::Response(value))
        }
    }

    /// Start a batch against the current configuration snapshot.
    pub fn batch(&self) -> BatchBuilder {
        BatchBuilder::new(self.inner.transport.clone(), self.config_snapshot())
    }

    /// List the procedure paths registered on the host.
    pub async fn procedures(&self) -> RpcResult<Vec<String>> {
        let value = self
            .inner
            .transport
            .invoke(methods::PROCEDURES, Value::Null)
            .await
            .map_err(|err| {
                normalize_transport_error(methods::PROCEDURES, err).into_public()
            })?;
        serde_json::from_value(value).map_err(|err| {
            RpcError::internal("Malformed procedure list").with_cause(err.to_string())
        })
    }

    /// Number of live subscriptions on the host.
    pub async fn subscription_count(&self) -> RpcResult<u64> {
        let value = self
            .inner
            .transport
            .invoke(methods::SUBSCRIPTION_COUNT, Value::Null)
            .await
            .map_err(|err| {
                normalize_transport_error(methods::SUBSCRIPTION_COUNT, err).into_public()
            })?;
        serde_json::from_value(value).map_err(|err| {
            RpcError::internal("Malformed subscription count").with_cause(err.to_string())
        })
    }

    /// The in-flight deduplication table backing [`RpcClient::call_deduped`].
    pub fn dedup(&self) -> &DedupMap {
        &self.inner.dedup
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("config", &self.config_snapshot())
            .field("dedup_pending", &self.inner.dedup.len())
            .finish()
    }
}
