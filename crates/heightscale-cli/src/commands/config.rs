//! Config command implementation.

use anyhow::{Context, Result, bail};

use super::AppContext;
use crate::cli::ConfigAction;
use crate::config::Config;
use crate::util::write_output;

pub fn cmd_config(ctx: &AppContext, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => write_output(&format!("{}\n", ctx.config_path.display())),
        ConfigAction::Show => {
            let content =
                toml::to_string_pretty(&ctx.config).context("Failed to serialize config")?;
            write_output(&content)
        }
        ConfigAction::Init { force } => {
            if ctx.config_path.exists() && !force {
                bail!(
                    "Config file already exists at {}. Use --force to overwrite.",
                    ctx.config_path.display()
                );
            }
            Config::default().save_to(&ctx.config_path)?;
            if !ctx.quiet {
                eprintln!("Wrote {}", ctx.config_path.display());
            }
            Ok(())
        }
    }
}
