//! The downstream client (DC): one MCP handshake and tool-call surface on
//! top of a single transport. A DC owns nothing about process lifecycle —
//! that belongs to the transport it wraps — only the MCP-level protocol
//! exchange: `initialize`, `tools/list`, `tools/call`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{ChainerError, Result};
use crate::identity::Identity;
use crate::transport::Transport;

pub const PROTOCOL_VERSION: &str = "latest";

#[derive(Debug, Clone)]
pub struct DownstreamTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
}

pub enum Connected {
    Server { identity: Identity, tools: Vec<DownstreamTool> },
    SelfReference,
}

pub struct DownstreamClient {
    server_key: String,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl DownstreamClient {
    pub fn new(server_key: &str, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        DownstreamClient { server_key: server_key.to_string(), transport, timeout }
    }

    /// Perform the handshake. Returns `Connected::SelfReference` without
    /// error when the downstream's own identity matches this host's, so the
    /// caller (the registry) can skip it rather than treat it as a failure.
    pub async fn connect(&self) -> Result<Connected> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": { "name": Identity::host().name, "version": Identity::host().version },
        });
        let init = self.transport.request("initialize", params, self.timeout).await?;
        let identity: Identity = serde_json::from_value(
            init.get("serverInfo")
                .cloned()
                .ok_or_else(|| ChainerError::Transport(format!("{}: missing serverInfo", self.server_key)))?,
        )
        .map_err(|e| ChainerError::Transport(format!("{}: malformed serverInfo: {e}", self.server_key)))?;

        if identity.is_host() {
            return Ok(Connected::SelfReference);
        }

        self.transport
            .notify("notifications/initialized", serde_json::json!({}))
            .await
            .ok();

        let list = self.transport.request("tools/list", serde_json::json!({}), self.timeout).await?;
        let tools = parse_tools(&list)?;
        Ok(Connected::Server { identity, tools })
    }

    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value> {
        let params = serde_json::json!({ "name": name, "arguments": args });
        self.transport.request("tools/call", params, self.timeout).await
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }
}

fn parse_tools(list_response: &Value) -> Result<Vec<DownstreamTool>> {
    let tools = list_response
        .get("tools")
        .and_then(|t| t.as_array())
        .ok_or_else(|| ChainerError::Transport("tools/list response missing tools array".to_string()))?;

    Ok(tools
        .iter()
        .filter_map(|t| {
            let name = t.get("name")?.as_str()?.to_string();
            let description = t.get("description").and_then(|d| d.as_str()).map(str::to_string);
            let input_schema = t.get("inputSchema").cloned();
            Some(DownstreamTool { name, description, input_schema })
        })
        .collect())
}
