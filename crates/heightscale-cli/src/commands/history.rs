//! Commands over the measurement history, local or on the collector.

use anyhow::{Context, Result, bail};

use super::AppContext;
use crate::cli::OutputFormat;
use crate::format::{
    format_history_csv, format_history_json, format_history_text, format_latest_text,
    format_remote_history_text, format_remote_latest_text,
};
use crate::util::{collector_client, open_store, write_output};

pub async fn cmd_history(
    ctx: &AppContext,
    limit: Option<usize>,
    format: OutputFormat,
    remote: bool,
) -> Result<()> {
    if remote {
        return remote_history(ctx, limit, format).await;
    }

    let store = open_store(&ctx.settings)?;
    let mut entries = store.all().await;
    if let Some(limit) = limit {
        entries.truncate(limit);
    }

    let content = match format {
        OutputFormat::Text => format_history_text(&entries, &ctx.format),
        OutputFormat::Json => format_history_json(&entries)?,
        OutputFormat::Csv => format_history_csv(&entries)?,
    };
    write_output(&content)
}

async fn remote_history(
    ctx: &AppContext,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let collector = collector_client(&ctx.settings)?;
    // The collector lists oldest first.
    let mut entries = collector
        .measurements()
        .await
        .with_context(|| format!("Failed to read history from {}", collector.base_url()))?;
    entries.reverse();
    if let Some(limit) = limit {
        entries.truncate(limit);
    }

    let content = match format {
        OutputFormat::Text => format_remote_history_text(&entries, &ctx.format),
        OutputFormat::Json => format_history_json(&entries)?,
        OutputFormat::Csv => bail!("CSV output is only available for the local history"),
    };
    write_output(&content)
}

pub async fn cmd_latest(ctx: &AppContext, format: OutputFormat, remote: bool) -> Result<()> {
    if remote {
        let collector = collector_client(&ctx.settings)?;
        let latest = collector
            .latest()
            .await
            .with_context(|| format!("Failed to read latest from {}", collector.base_url()))?;
        let content = match format {
            OutputFormat::Text => format_remote_latest_text(latest.as_ref(), &ctx.format),
            OutputFormat::Json => to_json(&latest)?,
            OutputFormat::Csv => bail!("CSV output is only available for the local history"),
        };
        return write_output(&content);
    }

    let store = open_store(&ctx.settings)?;
    let latest = store.latest().await;

    let content = match format {
        OutputFormat::Text => format_latest_text(latest.as_ref(), &ctx.format),
        OutputFormat::Json => to_json(&latest)?,
        OutputFormat::Csv => format_history_csv(latest.as_slice())?,
    };
    write_output(&content)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value).context("Failed to serialize measurement")? + "\n")
}

pub async fn cmd_prune(ctx: &AppContext, days: Option<u32>) -> Result<()> {
    let days = days.unwrap_or(ctx.settings.retention_days);
    let store = open_store(&ctx.settings)?;
    let removed = store
        .prune(days)
        .await
        .context("Failed to prune measurement history")?;

    if !ctx.quiet {
        eprintln!("Removed {} measurement(s) older than {} day(s).", removed, days);
    }
    Ok(())
}

pub async fn cmd_clear(ctx: &AppContext, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to delete the measurement history without --yes");
    }
    let store = open_store(&ctx.settings)?;
    store
        .clear()
        .await
        .context("Failed to clear measurement history")?;

    if !ctx.quiet {
        eprintln!("History cleared.");
    }
    Ok(())
}
