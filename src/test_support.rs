//! In-memory test doubles shared across the unit test modules. Not part of
//! the public surface; compiled only under `#[cfg(test)]`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{ChainerError, Result};
use crate::transport::Transport;

/// Returns a fixed, per-method response and counts calls, mirroring the
/// in-memory transport doubles this lineage of tools tests proxies with.
pub struct MockTransport {
    responses: Mutex<HashMap<String, Value>>,
    pub calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport { responses: Mutex::new(HashMap::new()), calls: AtomicUsize::new(0) }
    }

    pub async fn set_response(&self, method: &str, value: Value) {
        self.responses.lock().await.insert(method.to_string(), value);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, method: &str, _params: Value, _timeout: Duration) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .await
            .get(method)
            .cloned()
            .ok_or_else(|| ChainerError::Transport(format!("no mock response for {method}")))
    }

    async fn notify(&self, _method: &str, _params: Value) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}
