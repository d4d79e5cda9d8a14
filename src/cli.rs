//! Command-line interface definition.
//!
//! Uses [`clap`] derive macros. The doc comments on fields double as
//! `--help` text.

use std::path::PathBuf;

use clap::Parser;

/// Top-level CLI structure for ollie.
#[derive(Debug, Parser)]
#[command(
    name = "ollie",
    version,
    about = "Chat with a local Ollama model that can call MCP tool servers"
)]
pub struct Cli {
    /// Config file listing MCP servers and hooks (JSON or YAML)
    pub config: PathBuf,

    /// Model to use (overrides config)
    pub model: Option<String>,

    /// Ollama base URL (overrides config)
    #[arg(long, value_name = "URL")]
    pub ollama_url: Option<String>,

    /// Print the tools every server offers, then exit
    #[arg(long)]
    pub list_tools: bool,

    /// Log filter used when RUST_LOG is unset (e.g. "debug" or "ollie=trace")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Write the log file as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_only() {
        let cli = Cli::try_parse_from(["ollie", "servers.json"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("servers.json"));
        assert!(cli.model.is_none());
        assert!(!cli.list_tools);
    }

    #[test]
    fn test_positional_model_and_flags() {
        let cli = Cli::try_parse_from([
            "ollie",
            "servers.yaml",
            "llama3.2",
            "--ollama-url",
            "http://gpu-box:11434",
            "--list-tools",
            "--log-level",
            "debug",
            "--log-json",
        ])
        .unwrap();
        assert_eq!(cli.model.as_deref(), Some("llama3.2"));
        assert_eq!(cli.ollama_url.as_deref(), Some("http://gpu-box:11434"));
        assert!(cli.list_tools);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.log_json);
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["ollie"]).is_err());
    }
}
