//! Config-file loading and the small amount of environment-variable override
//! layered on top, in the style of the resolve-then-override pipelines this
//! lineage of tools uses for its own plugin configuration.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ChainerError, Result};
use crate::identity::SELF_SERVER_KEY;

pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
pub const LOG_ENV: &str = "MCP_CHAINER_LOG";
const REQUEST_TIMEOUT_ENV: &str = "MCP_CHAINER_REQUEST_TIMEOUT_SECS";
const OUTER_TIMEOUT_ENV: &str = "MCP_CHAINER_OUTER_TIMEOUT_SECS";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_OUTER_CALL_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawConfig {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: HashMap<String, ServerEntry>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub servers: HashMap<String, ServerEntry>,
    pub log_level: String,
    pub request_timeout: Duration,
    pub outer_call_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config::empty()
    }
}

impl Config {
    /// Degraded-mode configuration used when no config file can be resolved:
    /// the server is still a fully responsive MCP endpoint, it simply has no
    /// downstream tools to discover.
    pub fn empty() -> Self {
        Config {
            servers: HashMap::new(),
            log_level: default_log_level(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            outer_call_timeout: Duration::from_secs(DEFAULT_OUTER_CALL_TIMEOUT_SECS),
        }
    }

    /// Precedence: explicit CLI override, then the positional argument, then
    /// `CONFIG_PATH`. Returns `None` when nothing resolves, in which case the
    /// caller falls back to `Config::empty()`.
    pub fn resolve_path(cli_override: Option<&Path>, positional: Option<&Path>) -> Option<PathBuf> {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| positional.map(Path::to_path_buf))
            .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ChainerError::Config(format!("reading {}: {e}", path.display())))?;
        let raw: RawConfig = serde_json::from_str(&text)
            .map_err(|e| ChainerError::Config(format!("parsing {}: {e}", path.display())))?;
        let mut servers = raw.mcp_servers;
        if servers.remove(SELF_SERVER_KEY).is_some() {
            tracing::warn!(key = SELF_SERVER_KEY, "dropped self-referential server entry");
        }
        let mut cfg = Config::empty();
        cfg.servers = servers;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var(LOG_ENV) {
            self.log_level = v;
        }
        if let Some(secs) = parse_env_u64(REQUEST_TIMEOUT_ENV) {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env_u64(OUTER_TIMEOUT_ENV) {
            self.outer_call_timeout = Duration::from_secs(secs);
        }
    }
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn default_log_level() -> String {
    env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string())
}
