//! CLI module
//!
//! This module defines the command-line interface using clap and implements
//! the command execution logic.

use crate::{Config, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod commands;
pub mod output;

/// Interoperability test state-machine runner
#[derive(Parser, Debug)]
#[command(name = "interop-fsm")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "INTEROP_FSM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pattern against recorded events
    Run {
        /// Path to the pattern file
        #[arg(short, long)]
        pattern: PathBuf,

        /// JSON array of `{ "delay_ms": n, "event": {...} }` to push in order
        #[arg(short, long)]
        events: Option<PathBuf>,

        /// JSON array of responses (or null) returned to trigger states in order
        #[arg(short, long)]
        responses: Option<PathBuf>,

        /// Wait for Enter on stdin before each transition
        #[arg(long)]
        debug: bool,

        /// Cross-test data file (overrides config)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Test id under which captured data is stored (defaults to the pattern's)
        #[arg(long)]
        test_id: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        output: OutputFormat,
    },

    /// Validate a pattern file
    Validate {
        /// Path to the pattern file
        pattern: PathBuf,
    },

    /// Export a pattern as a Graphviz DOT graph
    Dot {
        /// Path to the pattern file
        pattern: PathBuf,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Output format types
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable transcript and verdict
    Text,
    /// JSON report
    Json,
}

/// Execute the CLI command
pub async fn execute(args: Cli, config: Config) -> Result<()> {
    match args.command {
        Commands::Run { .. } => commands::run::execute(args, config).await,
        Commands::Validate { pattern } => commands::validate::execute(pattern),
        Commands::Dot { pattern, output } => commands::dot::execute(pattern, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "interop-fsm",
            "run",
            "--pattern",
            "get.toml",
            "--events",
            "events.json",
            "--output",
            "json",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                pattern,
                events,
                output,
                debug,
                ..
            } => {
                assert_eq!(pattern, PathBuf::from("get.toml"));
                assert_eq!(events, Some(PathBuf::from("events.json")));
                assert_eq!(output, OutputFormat::Json);
                assert!(!debug);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_requires_pattern() {
        assert!(Cli::try_parse_from(["interop-fsm", "run"]).is_err());
        assert!(Cli::try_parse_from(["interop-fsm", "dot", "p.toml", "-o", "p.dot"]).is_ok());
    }
}
