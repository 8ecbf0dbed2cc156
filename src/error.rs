//! The single error vocabulary shared by transports, the registry, the chain
//! executor, and the upstream tool surface. Every failure mode documented for
//! the core maps to one variant here; `to_json_rpc_error` is the one place
//! that turns a Rust error into the shape a JSON-RPC client expects.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChainerError>;

#[derive(Debug, Error)]
pub enum ChainerError {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("downstream returned error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("unknown tool: {0}")]
    ToolNotFound(String),

    #[error("argument substitution failed at step {step}: {reason}")]
    Substitution { step: usize, reason: String },

    #[error("step {step} ({tool}) returned an empty response")]
    EmptyResponse { step: usize, tool: String },

    #[error("chain aborted at step {step} ({tool}): {source}")]
    ChainAborted {
        step: usize,
        tool: String,
        #[source]
        source: Box<ChainerError>,
    },

    #[error("invalid chain: {0}")]
    InvalidChain(String),
}

impl ChainerError {
    /// JSON-RPC error codes. The `-326xx` range is reserved by the spec for
    /// protocol-level failures; everything else uses a private block distinct
    /// from any single downstream's own error codes.
    pub fn code(&self) -> i64 {
        match self {
            ChainerError::Config(_) => -32001,
            ChainerError::Transport(_) => -32002,
            ChainerError::Timeout(_) => -32003,
            ChainerError::Remote { code, .. } => *code,
            ChainerError::ToolNotFound(_) => -32601,
            ChainerError::Substitution { .. } => -32004,
            ChainerError::EmptyResponse { .. } => -32005,
            ChainerError::ChainAborted { .. } => -32006,
            ChainerError::InvalidChain(_) => -32602,
        }
    }

    pub fn to_json_rpc_error(&self) -> Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }

    pub fn chain_aborted(step: usize, tool: impl Into<String>, source: ChainerError) -> Self {
        ChainerError::ChainAborted {
            step,
            tool: tool.into(),
            source: Box::new(source),
        }
    }
}
