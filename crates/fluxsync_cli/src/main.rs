//! Fluxsync CLI
//!
//! Command-line tools for Fluxsync data directories.
//!
//! # Commands
//!
//! - `inspect` - Display facet counts and checkpoints per connection
//! - `range` - List a connection's facets overlapping a time window
//! - `replay` - Run one sync cycle against a recorded provider feed
//! - `erase` - Wipe everything a connection owns
//! - `compact` - Rewrite the journal to its live records

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Fluxsync data directory tools.
#[derive(Parser)]
#[command(name = "fluxsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display facet counts and checkpoints per connection
    Inspect {
        /// Only show this connection
        #[arg(short, long)]
        connection: Option<u64>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List facets overlapping a time window
    Range {
        /// Connection id
        #[arg(short, long)]
        connection: u64,

        /// Facet kind (note, resource, notebook, tag, location)
        #[arg(short, long, default_value = "note")]
        kind: String,

        /// Window start, epoch milliseconds
        #[arg(long, default_value_t = 0)]
        start: i64,

        /// Window end, epoch milliseconds
        #[arg(long, default_value_t = i64::MAX)]
        end: i64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run one sync cycle against a recorded feed
    Replay {
        /// JSON file holding the recorded feed
        feed: PathBuf,

        /// Connection id to sync into
        #[arg(short, long, default_value_t = 1)]
        connection: u64,

        /// Provider name
        #[arg(long, default_value = "evernote")]
        provider: String,

        /// Ignore the stored checkpoint and run a full sync
        #[arg(long)]
        force: bool,
    },

    /// Wipe a connection's facets, attributes and blobs
    Erase {
        /// Connection id
        #[arg(short, long)]
        connection: u64,

        /// Provider name, used to locate blobs
        #[arg(long, default_value = "evernote")]
        provider: String,
    },

    /// Rewrite the journal to its live records
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { connection, format } => {
            let path = cli.path.ok_or("Data directory required for inspect")?;
            commands::inspect::run(&path, connection, &format)?;
        }
        Commands::Range {
            connection,
            kind,
            start,
            end,
            format,
        } => {
            let path = cli.path.ok_or("Data directory required for range")?;
            commands::range::run(&path, connection, &kind, start, end, &format)?;
        }
        Commands::Replay {
            feed,
            connection,
            provider,
            force,
        } => {
            let path = cli.path.ok_or("Data directory required for replay")?;
            commands::replay::run(&path, &feed, connection, &provider, force)?;
        }
        Commands::Erase {
            connection,
            provider,
        } => {
            let path = cli.path.ok_or("Data directory required for erase")?;
            commands::erase::run(&path, connection, &provider)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Data directory required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("Fluxsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Fluxsync Core v{}", fluxsync_core::VERSION);
        }
    }

    Ok(())
}
