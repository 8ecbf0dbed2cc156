//! This process's own MCP identity, used both to advertise `clientInfo`
//! during downstream handshakes and to detect an accidental self-reference
//! in the server table.

use serde::{Deserialize, Serialize};

pub const HOST_NAME: &str = "mcp-tool-chainer";
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reserved config key: an entry under this key is never discovered, closing
/// off the most common way a server table ends up pointing at itself.
pub const SELF_SERVER_KEY: &str = "mcp_tool_chainer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub version: String,
}

impl Identity {
    pub fn host() -> Self {
        Identity {
            name: HOST_NAME.to_string(),
            version: HOST_VERSION.to_string(),
        }
    }

    pub fn is_host(&self) -> bool {
        *self == Identity::host()
    }
}
