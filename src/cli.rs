//! Command-line surface. `serve` (the default) runs the MCP aggregator over
//! stdio; `config` resolves and prints the effective configuration without
//! starting anything, for debugging a server table before wiring it into an
//! agent host.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "mcp-tool-chainer", version, about = "MCP aggregator that chains tool calls across downstream servers")]
pub struct Cli {
    /// Path to the mcpServers config file. Overrides the positional argument
    /// and the CONFIG_PATH environment variable.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Overrides MCP_CHAINER_LOG / the compiled-in default.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Positional config path, honored only by the implicit `serve` run.
    pub positional_config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the MCP aggregator server on stdio (the default command).
    Serve(ServeArgs),
    /// Resolve and print the effective configuration, then exit.
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Positional path to the mcpServers config file.
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Positional path to the mcpServers config file.
    pub config_path: Option<PathBuf>,
    /// Print the resolved configuration as JSON instead of plain text.
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_invocation_as_implicit_serve() {
        let cli = Cli::parse_from(["mcp-tool-chainer"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_explicit_serve_with_positional_path() {
        let cli = Cli::parse_from(["mcp-tool-chainer", "serve", "/tmp/config.json"]);
        match cli.command {
            Some(Commands::Serve(args)) => {
                assert_eq!(args.config_path, Some(PathBuf::from("/tmp/config.json")));
            }
            _ => panic!("expected Serve subcommand"),
        }
    }

    #[test]
    fn parses_config_subcommand_with_json_flag() {
        let cli = Cli::parse_from(["mcp-tool-chainer", "config", "--json"]);
        match cli.command {
            Some(Commands::Config(args)) => assert!(args.json),
            _ => panic!("expected Config subcommand"),
        }
    }

    #[test]
    fn global_config_flag_overrides_positional() {
        let cli = Cli::parse_from(["mcp-tool-chainer", "--config", "/explicit.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/explicit.json")));
    }
}
