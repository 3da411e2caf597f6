//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

#[derive(Parser)]
#[command(name = "heightscale")]
#[command(author, version, about = "Ingest measurements from a BLE body-composition scale", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, env = "HEIGHTSCALE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Measurement database (overrides the config file)
    #[arg(long, global = true, env = "HEIGHTSCALE_DB")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby BLE devices and mark likely scales
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Connect to the scale and ingest measurements until stopped
    Watch {
        /// Stop after N measurements (0 = unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u32,

        /// Do not push measurements to the collector
        #[arg(long)]
        no_sync: bool,
    },

    /// Show stored measurements, newest first
    History {
        /// Show at most this many entries
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Read the collector's history instead of the local store
        #[arg(long)]
        remote: bool,
    },

    /// Show the most recent stored measurement
    Latest {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Ask the collector instead of the local store
        #[arg(long)]
        remote: bool,
    },

    /// Push every stored measurement to the collector
    Sync,

    /// Delete stored measurements older than the retention window
    Prune {
        /// Retention in days (defaults to the configured value)
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Delete every stored measurement
    Clear {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },

    /// Show adapter, collector and storage status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the configuration file path
    Path,
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
