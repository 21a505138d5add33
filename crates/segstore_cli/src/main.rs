//! segstore CLI
//!
//! Command-line tools for a node's segment data directory.
//!
//! # Commands
//!
//! - `inspect` - List tables and segments with their manifests
//! - `verify` - Check segment checksums and report interrupted reloads
//! - `recover` - Repair interrupted reloads while the node is stopped

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// segstore command-line data directory tools.
#[derive(Parser)]
#[command(name = "segstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the instance data directory
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
    /// List tables and segments with their manifests
    Inspect {
        /// Only show this table (name with type)
        #[arg(short, long)]
        table: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify segment checksums
    Verify {
        /// Only verify this table (name with type)
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Repair interrupted reloads
    Recover {
        /// Keep a present primary without checking its checksum
        #[arg(long)]
        no_verify: bool,

        /// Dry run - show what would be repaired
        #[arg(short, long)]
        dry_run: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
        Commands::Inspect { table, format } => {
            let path = cli.path.ok_or("Data directory path required for inspect")?;
            commands::inspect::run(&path, table.as_deref(), &format)?;
        }
        Commands::Verify { table } => {
            let path = cli.path.ok_or("Data directory path required for verify")?;
            commands::verify::run(&path, table.as_deref())?;
        }
        Commands::Recover {
            no_verify,
            dry_run,
            format,
        } => {
            let path = cli.path.ok_or("Data directory path required for recover")?;
            commands::recover::run(&path, !no_verify, dry_run, &format)?;
        }
        Commands::Version => {
            println!("segstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("segstore core v{}", segstore_core::VERSION);
        }
    }

    Ok(())
}
