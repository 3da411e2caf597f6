//! Sync command implementation.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use heightscale_core::sync_all_to;

use super::AppContext;
use crate::util::open_store;

pub async fn cmd_sync(ctx: &AppContext) -> Result<()> {
    let store = open_store(&ctx.settings)?;
    let entries = store.all().await;
    if entries.is_empty() {
        if !ctx.quiet {
            eprintln!("Nothing to sync.");
        }
        return Ok(());
    }

    let url = &ctx.settings.collector_url;
    if !ctx.quiet {
        eprintln!("Syncing {} measurement(s) to {}...", entries.len(), url);
    }
    let report = sync_all_to(url, &entries)
        .await
        .with_context(|| format!("Cannot sync to {url}"))?;

    let summary = format!("Delivered {}/{}", report.delivered, report.attempted);
    let summary = if ctx.format.no_color {
        summary
    } else if report.failed() == 0 {
        summary.green().to_string()
    } else {
        summary.yellow().to_string()
    };
    println!("{summary}");
    if report.failed() > 0 && !ctx.quiet {
        eprintln!(
            "{} measurement(s) were not accepted; they remain stored locally.",
            report.failed()
        );
    }
    Ok(())
}
