//! mcp-tool-chainer — an MCP aggregator that spawns a configured set of
//! downstream MCP servers and exposes tool chaining across them.
//!
//! # Subcommands
//!
//! - `serve`  — start the aggregator on stdio (the default)
//! - `config` — resolve and print the effective configuration, then exit

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::RwLock;

use mcp_tool_chainer::cli::{Cli, Commands, ConfigArgs};
use mcp_tool_chainer::config::Config;
use mcp_tool_chainer::error::Result as ChainerResult;
use mcp_tool_chainer::logging;
use mcp_tool_chainer::registry::ToolRegistry;
use mcp_tool_chainer::upstream::UpstreamServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level.as_deref());

    match &cli.command {
        Some(Commands::Config(args)) => run_config(&cli, args).await,
        Some(Commands::Serve(args)) => run_serve(&cli, args.config_path.as_deref()).await,
        None => run_serve(&cli, cli.positional_config.as_deref()).await,
    }
}

async fn resolve_config(cli: &Cli, positional: Option<&Path>) -> ChainerResult<Config> {
    match Config::resolve_path(cli.config.as_deref(), positional) {
        Some(path) => Config::load(&path),
        None => {
            tracing::warn!("no config file resolved; starting in degraded mode with no downstream servers");
            Ok(Config::empty())
        }
    }
}

async fn run_config(cli: &Cli, args: &ConfigArgs) -> anyhow::Result<()> {
    let config = resolve_config(cli, args.config_path.as_deref()).await?;
    if args.json {
        let out = serde_json::json!({
            "servers": config.servers.keys().collect::<Vec<_>>(),
            "logLevel": config.log_level,
            "requestTimeoutSecs": config.request_timeout.as_secs(),
            "outerCallTimeoutSecs": config.outer_call_timeout.as_secs(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("servers: {:?}", config.servers.keys().collect::<Vec<_>>());
        println!("log level: {}", config.log_level);
        println!("request timeout: {:?}", config.request_timeout);
        println!("outer call timeout: {:?}", config.outer_call_timeout);
    }
    Ok(())
}

async fn run_serve(cli: &Cli, positional: Option<&Path>) -> anyhow::Result<()> {
    let config = resolve_config(cli, positional).await?;

    let mut registry = ToolRegistry::new();
    registry.discover(&config.servers, config.request_timeout).await;
    let registry = Arc::new(RwLock::new(registry));

    let server = UpstreamServer::new(
        registry.clone(),
        config.servers.clone(),
        config.request_timeout,
        config.outer_call_timeout,
    );

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let run_fut = server.run(stdin, stdout);
    tokio::pin!(run_fut);

    tokio::select! {
        res = &mut run_fut => { res?; }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, closing downstream servers");
        }
    }

    // Reuse discover's close-then-rebuild step with an empty server table to
    // tear down every downstream transport before exiting.
    registry.write().await.discover(&std::collections::HashMap::new(), config.request_timeout).await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
