//! Mirrorsync CLI
//!
//! Command-line tools for exercising document mirrors against the in-memory
//! store.
//!
//! # Commands
//!
//! - `replay` - Run a session script and print the resulting mirror state
//! - `check` - Parse a session script and list its steps

mod commands;
mod script;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Mirrorsync command-line tools.
#[derive(Parser)]
#[command(name = "mirrorsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session script and print the resulting mirror state
    Replay {
        /// Path to the JSON session script
        script: PathBuf,

        /// Hold change events until the script delivers them
        #[arg(short, long)]
        manual: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Parse a session script and list its steps without running it
    Check {
        /// Path to the JSON session script
        script: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so json output stays clean.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay {
            script,
            manual,
            format,
        } => {
            commands::replay::run(&script, manual, &format)?;
        }
        Commands::Check { script } => {
            commands::check::run(&script)?;
        }
        Commands::Version => {
            println!("Mirrorsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Mirrorsync Engine v{}", mirrorsync_engine::VERSION);
        }
    }

    Ok(())
}
