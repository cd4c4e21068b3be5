//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// Smoothd - Rate Smoothing Dispatcher
#[derive(Parser)]
#[command(
    name = "sd",
    about = "Spread bursts of outbound API and email calls over time",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the intake server, delay queue and workers (default)
    Serve {
        /// Override server.bind
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Show the shared backlog record
    State,

    /// Clear the backlog after lost completions
    Reset,

    /// Show the delay a request arriving now would get
    Preview,

    /// Print the delay plan for a synthetic burst (no store, no dispatch)
    Simulate {
        /// Number of requests
        #[arg(short = 'n', long, default_value = "10")]
        count: u32,

        /// Milliseconds between arrivals
        #[arg(short, long, default_value = "0")]
        interval_ms: u64,

        /// Complete each request as soon as its dispatch time passes
        #[arg(short, long)]
        drain: bool,
    },

    /// Show server logs
    Logs {
        /// Follow log output (like tail -f)
        #[arg(short, long)]
        follow: bool,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("smoothd")
        .join("logs")
        .join("smoothd.log")
}
