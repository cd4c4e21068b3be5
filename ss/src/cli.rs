//! CLI argument parsing for statestore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ss")]
#[command(author, version, about = "Inspect and edit durable key/value state", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Database file (overrides config)
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the JSON value stored under a key
    Get {
        #[arg(required = true)]
        key: String,
    },

    /// Store a JSON value under a key
    Set {
        #[arg(required = true)]
        key: String,

        /// JSON document
        #[arg(required = true)]
        value: String,
    },

    /// Delete a key
    Delete {
        #[arg(required = true)]
        key: String,
    },

    /// List all keys
    List,
}
