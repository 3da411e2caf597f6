//! Scan command implementation.

use std::time::Duration;

use anyhow::{Result, bail};
use heightscale_core::{ScaleSession, SessionConfig};

use super::AppContext;
use crate::format::format_scan_text;
use crate::util::{bluetooth, write_output};

pub async fn cmd_scan(ctx: &AppContext, timeout: u64) -> Result<()> {
    let transport = bluetooth().await?;
    let session = ScaleSession::new(
        transport,
        SessionConfig::default().address(ctx.settings.scale_address.clone()),
    );

    let adapter = session.adapter_state().await;
    if !session.is_adapter_ready().await {
        session.teardown().await;
        bail!("Bluetooth adapter is {adapter}. Turn Bluetooth on and try again.");
    }

    if !ctx.quiet {
        eprintln!("Scanning for {}s...", timeout);
    }
    let result = session.survey(Duration::from_secs(timeout)).await;
    session.teardown().await;

    let devices = result?;
    write_output(&format_scan_text(
        &devices,
        &ctx.settings.scale_address,
        &ctx.format,
    ))
}
