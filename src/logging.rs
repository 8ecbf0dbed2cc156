//! Process-wide `tracing` initialization. Idempotent so both `main` and test
//! code can call it freely without double-installing a global subscriber.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Initialize structured logging at `level` (falling back to the
/// `MCP_CHAINER_LOG` env var, then `info`). Writes to stderr so stdout stays
/// reserved for the upstream JSON-RPC stream.
pub fn init(level: Option<&str>) {
    INIT.get_or_init(|| {
        let filter = level
            .map(str::to_string)
            .or_else(|| std::env::var(crate::config::LOG_ENV).ok())
            .unwrap_or_else(|| "info".to_string());
        let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}
