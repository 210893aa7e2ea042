//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

/// gp - watches remote git repositories for new refs
#[derive(Debug, Parser)]
#[command(
    name = "gp",
    about = "Watches remote git repositories and announces new refs over webhooks",
    version
)]
pub struct Cli {
    /// Config files, merged in order (later files win)
    #[arg(
        short,
        long,
        global = true,
        env = "CONFIG_PATHS",
        value_delimiter = ',',
        help = "Path to config file (repeatable)"
    )]
    pub config: Vec<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Override the configured HTTP port
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the poller and HTTP server (default)
    Serve,

    /// Print one remote ref listing as JSON
    ListRefs {
        /// Remote repository url
        #[arg(value_name = "URL")]
        url: String,
    },
}

/// Parse a log level name; unknown names give None
pub fn parse_log_level(name: &str) -> Option<Level> {
    match name.trim().to_uppercase().as_str() {
        "TRACE" => Some(Level::TRACE),
        "DEBUG" => Some(Level::DEBUG),
        "INFO" => Some(Level::INFO),
        "WARN" | "WARNING" => Some(Level::WARN),
        "ERROR" => Some(Level::ERROR),
        _ => None,
    }
}

/// Pick the effective level: CLI > config > INFO
///
/// A name that does not parse is skipped, so a bad CLI value falls through
/// to the config value rather than straight to INFO.
pub fn resolve_log_level(cli: Option<&str>, config: Option<&str>) -> Level {
    cli.and_then(parse_log_level)
        .or_else(|| config.and_then(parse_log_level))
        .unwrap_or(Level::INFO)
}
