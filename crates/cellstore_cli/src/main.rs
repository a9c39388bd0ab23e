//! CellStore CLI
//!
//! Command-line tools for looking at CellStore structures on disk.
//!
//! # Commands
//!
//! - `cat` - Decode a single cell file
//! - `inspect` - Display the contents of a structure
//! - `verify` - Check that definitions and backing files agree

mod commands;

use clap::{Parser, Subcommand};
use commands::{Format, Kind};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CellStore command-line tools.
#[derive(Parser)]
#[command(name = "cellstore")]
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
    /// Decode a single cell file as JSON
    Cat {
        /// Path of the cell file
        file: PathBuf,

        /// Print the raw bytes as hex instead of decoding CBOR
        #[arg(long)]
        hex: bool,
    },

    /// Display the contents of a structure
    Inspect {
        /// Structure kind
        #[arg(short, long, value_enum)]
        kind: Kind,

        /// Root path the structure was opened with
        root: PathBuf,

        /// Decode and show every value
        #[arg(long)]
        values: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Check that definitions and backing files agree
    Verify {
        /// Structure kind
        #[arg(short, long, value_enum)]
        kind: Kind,

        /// Root path the structure was opened with
        root: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Cat { file, hex } => {
            commands::cat::run(&file, hex)?;
        }
        Commands::Inspect {
            kind,
            root,
            values,
            format,
        } => {
            commands::inspect::run(&root, kind, values, format)?;
        }
        Commands::Verify { kind, root, format } => {
            commands::verify::run(&root, kind, format)?;
        }
        Commands::Version => {
            println!("CellStore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("CellStore Core v{}", cellstore_core::VERSION);
        }
    }

    Ok(())
}
