//! Command-line ingestion for BLE body-composition scales.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Scan for nearby devices and mark likely scales |
//! | `watch` | Connect to the scale and ingest measurements |
//! | `history` | Show stored measurements |
//! | `latest` | Show the most recent measurement |
//! | `sync` | Push stored measurements to the collector |
//! | `prune` | Delete measurements older than the retention window |
//! | `clear` | Delete every stored measurement |
//! | `status` | Show connection mode, adapter, collector and storage |
//! | `config` | Manage the configuration file |
//! | `completions` | Generate shell completions |

mod cli;
mod commands;
mod config;
mod format;
mod ingest;
mod util;

use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::{
    AppContext, WatchArgs, cmd_clear, cmd_config, cmd_history, cmd_latest, cmd_prune, cmd_scan,
    cmd_status, cmd_sync, cmd_watch,
};
use crate::config::Config;
use crate::format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Completions need neither logging nor configuration.
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "heightscale", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config_path = Config::resolve_path(cli.config.as_deref());
    let config = Config::load_from(&config_path);
    let settings = config.settings(cli.database.as_deref());
    let ctx = AppContext {
        format: FormatOptions::new(cli.no_color, settings.use_metric, settings.language),
        config_path,
        config,
        settings,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Scan { timeout } => cmd_scan(&ctx, timeout).await,
        Commands::Watch { count, no_sync } => cmd_watch(&ctx, WatchArgs { count, no_sync }).await,
        Commands::History {
            limit,
            format,
            remote,
        } => cmd_history(&ctx, limit, format, remote).await,
        Commands::Latest { format, remote } => cmd_latest(&ctx, format, remote).await,
        Commands::Sync => cmd_sync(&ctx).await,
        Commands::Prune { days } => cmd_prune(&ctx, days).await,
        Commands::Clear { yes } => cmd_clear(&ctx, yes).await,
        Commands::Status => cmd_status(&ctx).await,
        Commands::Config { action } => cmd_config(&ctx, action),
        Commands::Completions { .. } => Ok(()),
    }
}
