//! The upstream tool surface (UTS): the MCP server this process presents to
//! its own client. Handles the baseline handshake plus three fixed tools
//! (`chainable_tools`, `discover_tools`, `mcp_chain`) backed by the tool
//! registry and chain executor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, RwLock};

use crate::chain::{execute_resolved, resolve_chain, ChainStep};
use crate::config::ServerEntry;
use crate::error::{ChainerError, Result};
use crate::framing::{looks_like_non_frame, FrameBuffer};
use crate::identity::Identity;
use crate::registry::ToolRegistry;

pub struct UpstreamServer {
    registry: Arc<RwLock<ToolRegistry>>,
    servers: HashMap<String, ServerEntry>,
    request_timeout: Duration,
    outer_timeout: Duration,
}

impl UpstreamServer {
    pub fn new(
        registry: Arc<RwLock<ToolRegistry>>,
        servers: HashMap<String, ServerEntry>,
        request_timeout: Duration,
        outer_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(UpstreamServer { registry, servers, request_timeout, outer_timeout })
    }

    /// Serve the upstream protocol until stdin closes. Each request spawns
    /// its own task so concurrent upstream calls don't block one another;
    /// all replies are funneled through a single writer task so JSON-RPC
    /// frames on stdout never interleave.
    pub async fn run<R, W>(self: Arc<Self>, stdin: R, stdout: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            let mut stdout = stdout;
            while let Some(line) = out_rx.recv().await {
                if stdout.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdout.write_all(b"\n").await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
        });

        let mut reader = BufReader::new(stdin);
        let mut frame_buf = FrameBuffer::new();
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    for candidate in frame_buf.push(&line) {
                        if looks_like_non_frame(&candidate) {
                            continue;
                        }
                        let trimmed = candidate.trim();
                        let value: Value = match serde_json::from_str(trimmed) {
                            Ok(v) => v,
                            Err(_) => continue,
                        };
                        let this = self.clone();
                        let out_tx = out_tx.clone();
                        tokio::spawn(async move {
                            if let Some(response) = this.handle_message(value).await {
                                let _ = out_tx.send(response.to_string());
                            }
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "upstream stdin read error");
                    break;
                }
            }
        }
        drop(out_tx);
        let _ = writer.await;
        Ok(())
    }

    async fn handle_message(&self, msg: Value) -> Option<Value> {
        let id = msg.get("id").cloned();
        let method = msg.get("method").and_then(|m| m.as_str())?.to_string();
        match method.as_str() {
            "initialize" => Some(reply(id, initialize_result())),
            "notifications/initialized" | "notifications/cancelled" => None,
            "tools/list" => Some(reply(id, serde_json::json!({ "tools": tool_schemas() }))),
            "tools/call" => {
                let id = id?;
                let params = msg.get("params").cloned().unwrap_or(Value::Null);
                let outcome = tokio::time::timeout(self.outer_timeout, self.dispatch_tool_call(params)).await;
                match outcome {
                    Ok(Ok(value)) => Some(reply(Some(id), value)),
                    Ok(Err(e)) => Some(error_reply(id, &e)),
                    Err(_) => Some(error_reply(id, &ChainerError::Timeout(self.outer_timeout))),
                }
            }
            _ => id.map(|id| error_reply(id, &ChainerError::ToolNotFound(method))),
        }
    }

    async fn dispatch_tool_call(&self, params: Value) -> Result<Value> {
        let name = params
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| ChainerError::InvalidChain("tools/call missing name".to_string()))?;
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        let text = match name {
            "chainable_tools" => self.registry.read().await.primary_aliases().join(","),
            "discover_tools" => {
                let mut registry = self.registry.write().await;
                registry.discover(&self.servers, self.request_timeout).await;
                registry.primary_aliases().join(",")
            }
            "mcp_chain" => {
                let steps: Vec<ChainStep> = arguments
                    .get("mcpPath")
                    .cloned()
                    .ok_or_else(|| ChainerError::InvalidChain("mcp_chain requires mcpPath".to_string()))
                    .and_then(|v| {
                        serde_json::from_value(v)
                            .map_err(|e| ChainerError::InvalidChain(format!("mcpPath: {e}")))
                    })?;
                // Resolve against the registry synchronously, then drop the
                // read guard before awaiting any downstream call, so a
                // concurrent `discover_tools` (or another in-flight chain)
                // never blocks on this chain's network round-trips.
                let resolved = {
                    let registry = self.registry.read().await;
                    resolve_chain(&steps, &registry)?
                };
                execute_resolved(&resolved).await?
            }
            other => return Err(ChainerError::ToolNotFound(other.to_string())),
        };

        Ok(serde_json::json!({ "content": [{ "type": "text", "text": text }] }))
    }
}

fn initialize_result() -> Value {
    serde_json::json!({
        "protocolVersion": "latest",
        "capabilities": { "tools": {} },
        "serverInfo": { "name": Identity::host().name, "version": Identity::host().version },
    })
}

fn tool_schemas() -> Vec<Value> {
    vec![chainable_tools_schema(), discover_tools_schema(), mcp_chain_schema()]
}

fn chainable_tools_schema() -> Value {
    serde_json::json!({
        "name": "chainable_tools",
        "description": "List every tool alias currently registered from discovered downstream servers",
        "inputSchema": { "type": "object", "properties": {} },
    })
}

fn discover_tools_schema() -> Value {
    serde_json::json!({
        "name": "discover_tools",
        "description": "Rediscover downstream servers and refresh the tool alias list",
        "inputSchema": { "type": "object", "properties": {} },
    })
}

fn mcp_chain_schema() -> Value {
    serde_json::json!({
        "name": "mcp_chain",
        "description": "Run a sequence of tool calls, piping each step's output into the next",
        "inputSchema": {
            "type": "object",
            "properties": {
                "mcpPath": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "toolName": { "type": "string" },
                            "toolArgs": { "type": "string" },
                            "inputPath": { "type": "string" },
                            "outputPath": { "type": "string" },
                        },
                        "required": ["toolName", "toolArgs"],
                    },
                },
            },
            "required": ["mcpPath"],
        },
    })
}

fn reply(id: Option<Value>, result: Value) -> Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_reply(id: Value, err: &ChainerError) -> Value {
    serde_json::json!({ "jsonrpc": "2.0", "id": id, "error": err.to_json_rpc_error() })
}
