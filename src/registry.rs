//! The tool registry (TR): a process-wide map from tool alias to the
//! downstream client that can execute it, rebuilt wholesale by `discover`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::client::{Connected, DownstreamClient, DownstreamTool};
use crate::config::ServerEntry;
use crate::identity::SELF_SERVER_KEY;
use crate::transport::{ChildTransport, Transport};

pub struct ToolRecord {
    pub server_key: String,
    pub server_name: String,
    pub server_version: String,
    pub tool: DownstreamTool,
    pub client: Arc<DownstreamClient>,
}

/// Replace every hyphen with an underscore, so a config key or server name
/// like `my-server` becomes a valid-looking identifier prefix `my_server`.
pub fn normalize(s: &str) -> String {
    s.replace('-', "_")
}

#[derive(Default)]
pub struct ToolRegistry {
    aliases: HashMap<String, Arc<ToolRecord>>,
    clients: Vec<Arc<DownstreamClient>>,
    primary: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, alias: &str) -> Option<Arc<ToolRecord>> {
        self.aliases.get(alias).cloned()
    }

    /// The canonical `normalize(serverName)_tool.name` alias for every
    /// registered tool, in discovery order, with duplicates removed.
    pub fn primary_aliases(&self) -> Vec<String> {
        self.primary.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Discover against real downstream processes: spawn a `ChildTransport`
    /// per configured server (skipping the reserved self key), handshake,
    /// and rebuild the registry. Individual server failures are logged and
    /// skipped; the overall discovery always completes.
    pub async fn discover(&mut self, servers: &HashMap<String, ServerEntry>, timeout: Duration) {
        self.close_all().await;
        self.aliases.clear();
        self.clients.clear();
        self.primary.clear();

        for (server_key, entry) in servers {
            if server_key == SELF_SERVER_KEY {
                continue;
            }
            let transport: Arc<dyn Transport> =
                match ChildTransport::spawn(server_key, &entry.command, &entry.args, &entry.env) {
                    Ok(t) => Arc::new(t),
                    Err(e) => {
                        tracing::warn!(server = server_key, error = %e, "failed to spawn downstream server");
                        continue;
                    }
                };
            let client = Arc::new(DownstreamClient::new(server_key, transport, timeout));
            match client.connect().await {
                Ok(Connected::SelfReference) => {
                    tracing::warn!(server = server_key, "downstream identity matches host; skipping");
                    client.close().await;
                }
                Ok(Connected::Server { identity, tools }) => {
                    self.register(server_key, &identity.name, &identity.version, tools, client.clone());
                    self.clients.push(client);
                }
                Err(e) => {
                    tracing::warn!(server = server_key, error = %e, "discovery failed for downstream server");
                }
            }
        }

        tracing::info!(
            tools = self.primary.len(),
            at = %chrono::Utc::now().to_rfc3339(),
            "discovery complete"
        );
    }

    pub(crate) fn register(
        &mut self,
        server_key: &str,
        server_name: &str,
        server_version: &str,
        tools: Vec<DownstreamTool>,
        client: Arc<DownstreamClient>,
    ) {
        for tool in tools {
            let record = Arc::new(ToolRecord {
                server_key: server_key.to_string(),
                server_name: server_name.to_string(),
                server_version: server_version.to_string(),
                tool: tool.clone(),
                client: client.clone(),
            });
            let primary = format!("{}_{}", normalize(server_name), tool.name);
            let by_key = format!("{}_{}", normalize(server_key), tool.name);
            let bare = tool.name.clone();

            if !self.primary.contains(&primary) {
                self.primary.push(primary.clone());
            }
            self.aliases.insert(primary, record.clone());
            self.aliases.insert(by_key, record.clone());
            self.aliases.insert(bare, record);
        }
    }

    async fn close_all(&self) {
        for client in &self.clients {
            client.close().await;
        }
    }
}
