//! vaultctl - operate an assetvault store from the shell
//!
//! Subcommands:
//! - `vaultctl store <file> --type notecard` - Store a file as an asset
//! - `vaultctl get <id>` - Write an asset's payload to stdout or a file
//! - `vaultctl refs <id>` - Show what an asset references
//! - `vaultctl purge` - Run one garbage collection pass
//! - `vaultctl watch` - Purge periodically until Ctrl-C

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "vaultctl")]
#[command(about = "Deduplicating asset store with reference-tracking garbage collection")]
#[command(version)]
struct Cli {
    /// Config file, loaded in place of ./assetvault.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file as a new asset
    Store {
        /// File to read the payload from
        file: PathBuf,

        /// Asset type name (texture, notecard, clothing, ...) or numeric code
        #[arg(short = 't', long = "type", default_value = "texture")]
        kind: String,

        /// Asset name (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Use this id instead of a fresh one
        #[arg(long)]
        id: Option<String>,
    },

    /// Write an asset's payload to stdout or a file
    Get {
        id: String,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show an asset's metadata and references
    Refs { id: String },

    /// Delete an asset record (the payload goes on the next purge)
    Delete { id: String },

    /// Check which ids exist
    Exists {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Bump access time so assets survive purges
    Mark {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// List assets still waiting for reference indexing
    Unprocessed,

    /// Index every unprocessed asset now
    Reindex {
        /// Seconds to wait for the queue to drain
        #[arg(long, default_value = "300")]
        timeout_secs: u64,
    },

    /// Run one purge pass
    Purge {
        /// Override the configured retention window
        #[arg(long)]
        retention_secs: Option<u64>,
    },

    /// Show queue and store statistics
    Stats,

    /// Index backlog, then purge on an interval until Ctrl-C
    Watch {
        /// Override the configured purge interval
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = vaultconf::VaultConfig::load_with_sources_from(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.telemetry.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Commands::Config = cli.command {
        commands::show_config(&config, &sources);
        return Ok(());
    }

    let service = assetvault::AssetService::open(&config)?;

    match cli.command {
        Commands::Store {
            file,
            kind,
            name,
            id,
        } => {
            commands::store(&service, &file, &kind, name, id.as_deref()).await?;
        }
        Commands::Get { id, output } => {
            commands::get(&service, &id, output.as_deref())?;
        }
        Commands::Refs { id } => {
            commands::refs(&service, &id)?;
        }
        Commands::Delete { id } => {
            commands::delete(&service, &id)?;
        }
        Commands::Exists { ids } => {
            commands::exists(&service, &ids)?;
        }
        Commands::Mark { ids } => {
            commands::mark(&service, &ids)?;
        }
        Commands::Unprocessed => {
            commands::unprocessed(&service)?;
        }
        Commands::Reindex { timeout_secs } => {
            commands::reindex(&service, timeout_secs).await?;
        }
        Commands::Purge { retention_secs } => {
            commands::purge(&service, retention_secs)?;
        }
        Commands::Stats => {
            commands::stats(&service)?;
        }
        Commands::Watch { interval_secs } => {
            let interval = interval_secs
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.gc.interval());
            commands::watch(service, interval).await?;
        }
        // Handled before the vault is opened.
        Commands::Config => {}
    }

    Ok(())
}
