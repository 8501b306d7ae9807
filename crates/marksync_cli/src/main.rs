//! MarkSync CLI
//!
//! Command-line tools for synchronizing a markdown vault with a remote
//! record store.
//!
//! # Commands
//!
//! - `sync` - One-shot synchronization of a vault against the remote store
//! - `status` - Inspect the persisted sync state file
//! - `check` - Classify each document's tracking state, offline

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// MarkSync command-line tools.
#[derive(Parser)]
#[command(name = "marksync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the sync state file
    #[arg(global = true, short, long, default_value = ".marksync/state.json")]
    state: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize a vault against the remote store, one shot
    Sync {
        /// Vault directory holding the markdown documents
        #[arg(long, default_value = ".")]
        vault: PathBuf,

        /// Base URL of the remote record store
        #[arg(long)]
        server: String,

        /// Remote container id
        #[arg(long)]
        container: String,

        /// Bearer token for the remote store
        #[arg(long, env = "MARKSYNC_TOKEN")]
        token: Option<String>,

        /// Folder pairing as folder=type-id (repeatable; "" pairs the root)
        #[arg(long = "map", value_name = "FOLDER=TYPE")]
        mappings: Vec<String>,

        /// Tag mapping as name=tag-id (repeatable)
        #[arg(long = "tag", value_name = "NAME=ID")]
        tags: Vec<String>,
    },

    /// Show the persisted sync state
    Status,

    /// Classify each document's tracking state without touching the remote
    Check {
        /// Vault directory holding the markdown documents
        #[arg(long, default_value = ".")]
        vault: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Sync {
            vault,
            server,
            container,
            token,
            mappings,
            tags,
        } => {
            commands::sync::run(
                &vault, &cli.state, &server, &container, token, &mappings, &tags,
            )
            .await?;
        }
        Commands::Status => {
            commands::status::run(&cli.state)?;
        }
        Commands::Check { vault } => {
            commands::check::run(&vault, &cli.state)?;
        }
    }

    Ok(())
}
