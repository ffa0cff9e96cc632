//! In-memory transport backing the test suite
//!
//! Records every invocation, lets tests script unary responses, and
//! exposes an `emit` to push subscription payloads at registered
//! listeners. A shared operation log captures the relative order of
//! listen/unlisten/invoke so cleanup-order tests can assert on it.

use crate::transport::{EventHandler, ListenerHandle, Transport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type InvokeHandler = dyn Fn(&str, &Value) -> Result<Value, TransportError> + Send + Sync;

/// Cloneable in-memory transport; clones share all state.
#[derive(Clone)]
pub struct MockTransport {
    handler: Arc<InvokeHandler>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    invocations: Arc<Mutex<Vec<(String, Value)>>>,
    listeners: Arc<Mutex<HashMap<String, Arc<dyn Fn(Value) + Send + Sync>>>>,
    ops: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    /// A transport answering every unary invoke through `handler`.
    pub fn new(
        handler: impl Fn(&str, &Value) -> Result<Value, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
            delays: Arc::new(Mutex::new(HashMap::new())),
            invocations: Arc::new(Mutex::new(Vec::new())),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            ops: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A transport answering every unary invoke with `value`.
    pub fn ok(value: Value) -> Self {
        Self::new(move |_, _| Ok(value.clone()))
    }

    /// Delay responses to `method` (for timeout tests).
    pub fn set_delay(&self, method: &str, delay: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.insert(method.to_string(), delay);
        }
    }

    /// Deliver a payload to the listener on `channel`.
    pub fn emit(&self, channel: &str, payload: Value) -> bool {
        let handler = self
            .listeners
            .lock()
            .ok()
            .and_then(|listeners| listeners.get(channel).cloned());
        match handler {
            Some(handler) => {
                handler(payload);
                true
            }
            None => false,
        }
    }

    /// Every `(method, args)` invoked so far.
    pub fn invocations(&self) -> Vec<(String, Value)> {
        self.invocations.lock().map(|i| i.clone()).unwrap_or_default()
    }

    /// Invocations of one method.
    pub fn invocations_of(&self, method: &str) -> Vec<Value> {
        self.invocations()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, args)| args)
            .collect()
    }

    /// Channels with a live listener, sorted for determinism.
    pub fn active_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .listeners
            .lock()
            .map(|listeners| listeners.keys().cloned().collect())
            .unwrap_or_default();
        channels.sort();
        channels
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// The ordered operation log: `listen:<ch>`, `unlisten:<ch>`,
    /// `invoke:<method>`.
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().map(|ops| ops.clone()).unwrap_or_default()
    }

    fn log(&self, op: String) {
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(op);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn invoke(&self, method: &str, args: Value) -> Result<Value, TransportError> {
        let delay = self
            .delays
            .lock()
            .ok()
            .and_then(|delays| delays.get(method).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.log(format!("invoke:{}", method));
        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push((method.to_string(), args.clone()));
        }
        (self.handler)(method, &args)
    }

    fn listen(&self, channel: &str, handler: EventHandler) -> ListenerHandle {
        self.log(format!("listen:{}", channel));
        let shared: Arc<dyn Fn(Value) + Send + Sync> = Arc::from(handler);
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.insert(channel.to_string(), shared);
        }
        let listeners = self.listeners.clone();
        let ops = self.ops.clone();
        let channel = channel.to_string();
        ListenerHandle::new(move || {
            if let Ok(mut ops) = ops.lock() {
                ops.push(format!("unlisten:{}", channel));
            }
            if let Ok(mut listeners) = listeners.lock() {
                listeners.remove(&channel);
            }
        })
    }
}
