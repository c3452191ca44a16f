//! Command-line interface definition for querywire
//!
//! This module defines the CLI structure using clap's derive API: one
//! command to run the server and a handful of client commands that talk to
//! a running server (or spawn one over stdio).

use clap::{Parser, Subcommand};

use crate::logging::LogFormat;

/// querywire - JSON-RPC database tool server and client
///
/// Serve read-only database tools over line-delimited JSON-RPC, or call
/// them on a running server.
#[derive(Parser, Debug, Clone)]
#[command(name = "querywire")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config/querywire.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Server host (bind address for `serve`, remote host otherwise)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// SQLite database path
    #[arg(long, global = true)]
    pub database: Option<String>,

    /// Use stdio instead of TCP
    ///
    /// With `serve`, run one session on stdin/stdout. With a client command,
    /// spawn `querywire serve --stdio` as a child and talk to it.
    #[arg(long, global = true)]
    pub stdio: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the server
    Serve,

    /// List the tools a server publishes
    Tools,

    /// Invoke a tool and print its result
    Call {
        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// List prompts
    Prompts,

    /// Render a prompt
    Prompt {
        /// Prompt name
        name: String,

        /// Prompt arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// List resources
    Resources,

    /// Read a resource
    Read {
        /// Resource URI, e.g. schema://tables
        uri: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["querywire", "serve"]).unwrap();
        assert_eq!(cli.command, Commands::Serve);
        assert_eq!(cli.config, Some("config/querywire.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(!cli.stdio);
        assert_eq!(cli.log_format, LogFormat::Text);
        assert_eq!(cli.port, None);
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "querywire",
            "serve",
            "--stdio",
            "--database",
            "/tmp/q.db",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert!(cli.stdio);
        assert_eq!(cli.database, Some("/tmp/q.db".to_string()));
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_cli_parse_call_with_args() {
        let cli = Cli::try_parse_from([
            "querywire",
            "call",
            "describe_table",
            "--args",
            r#"{"table_name":"ventas"}"#,
            "--port",
            "4000",
        ])
        .unwrap();
        assert_eq!(cli.port, Some(4000));
        match cli.command {
            Commands::Call { tool, args } => {
                assert_eq!(tool, "describe_table");
                assert_eq!(args, r#"{"table_name":"ventas"}"#);
            }
            other => panic!("Expected Call, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_call_args_default_to_empty_object() {
        let cli = Cli::try_parse_from(["querywire", "call", "get_tables"]).unwrap();
        assert!(matches!(cli.command, Commands::Call { ref args, .. } if args == "{}"));
    }

    #[test]
    fn test_cli_read_requires_uri() {
        assert!(Cli::try_parse_from(["querywire", "read"]).is_err());
    }

    #[test]
    fn test_cli_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["querywire", "tools", "--log-format", "xml"]).is_err());
    }
}
