use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use statestore::Store;
use statestore::cli::{Cli, Command};
use statestore::config::Config;

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let store_path = cli.store.unwrap_or(config.store_path);

    info!("statestore opening {}", store_path.display());
    let store = Store::open(&store_path).with_context(|| format!("Failed to open {}", store_path.display()))?;

    match cli.command {
        Command::Get { key } => match store.get_entry(&key)? {
            Some(entry) => {
                println!("{}", serde_json::to_string_pretty(&entry.value)?);
            }
            None => {
                eyre::bail!("Key not found: {}", key);
            }
        },
        Command::Set { key, value } => {
            let value: serde_json::Value = serde_json::from_str(&value).context("Value must be valid JSON")?;
            store.set(&key, &value)?;
            println!("{} Stored {}", "✓".green(), key.cyan());
        }
        Command::Delete { key } => {
            if store.delete(&key)? {
                println!("{} Deleted {}", "✓".green(), key);
            } else {
                println!("Key not found: {}", key);
            }
        }
        Command::List => {
            let entries = store.list()?;
            if entries.is_empty() {
                println!("No keys found");
            } else {
                for entry in entries {
                    println!(
                        "{} {} {}",
                        entry.key.yellow(),
                        entry.updated_at.to_rfc3339().dimmed(),
                        entry.value
                    );
                }
            }
        }
    }

    Ok(())
}
