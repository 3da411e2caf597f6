//! Status command implementation.
//!
//! Reports what the mode controller would pick right now, without opening
//! a session to the scale. In remote mode the latest reading comes from
//! the collector, as it would feed the display.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use owo_colors::OwoColorize;

use heightscale_core::{
    AdapterState, BleTransport, CollectorClient, ConnectionMode, Measurement, ModeController,
    ModeSources,
};

use super::AppContext;
use crate::format::{format_latest_text, format_mode, format_remote_latest_text};
use crate::util::{bluetooth, collector_client, open_store, write_output};

/// Mode inputs for a one-shot status check: no session is ever active.
struct StatusSources {
    adapter_ready: bool,
    collector: Arc<CollectorClient>,
}

#[async_trait]
impl ModeSources for StatusSources {
    async fn adapter_ready(&self) -> bool {
        self.adapter_ready
    }

    async fn session_active(&self) -> bool {
        false
    }

    async fn remote_reachable(&self) -> bool {
        self.collector.is_reachable().await
    }
}

pub async fn cmd_status(ctx: &AppContext) -> Result<()> {
    let settings = &ctx.settings;
    let collector = Arc::new(collector_client(settings)?);

    let adapter = if settings.ble_enabled {
        match bluetooth().await {
            Ok(transport) => {
                let state = transport.adapter_state().await;
                transport.shutdown().await;
                Some(state)
            }
            Err(e) => {
                tracing::debug!(error = %e, "no Bluetooth adapter");
                None
            }
        }
    } else {
        None
    };

    let controller = ModeController::new(
        StatusSources {
            adapter_ready: adapter == Some(AdapterState::PoweredOn),
            collector: Arc::clone(&collector),
        },
        settings.ble_enabled,
        settings.poll_interval,
    )?;
    let mode = controller.tick().await;
    let health = if mode == ConnectionMode::Remote {
        collector.health().await.ok()
    } else {
        None
    };

    let store = open_store(settings)?;
    let stored = store.len().await;
    let latest = store.latest().await;

    let adapter = match (settings.ble_enabled, adapter) {
        (false, _) => "disabled".to_string(),
        (true, None) => "unavailable".to_string(),
        (true, Some(state)) => state.to_string(),
    };
    let collector_status = match &health {
        Some(health) => format!("reachable ({})", health.status),
        // With no session, the mode is remote exactly when the collector answered.
        None if mode == ConnectionMode::Remote => "reachable".to_string(),
        None => "unreachable".to_string(),
    };

    let heading = |label: &str| {
        if ctx.format.no_color {
            label.to_string()
        } else {
            label.bold().to_string()
        }
    };

    let mut out = String::new();
    out.push_str(&format!("{}   {}\n", heading("Mode:"), format_mode(mode, ctx.format.no_color)));
    out.push_str(&format!("{}  {} ({})\n", heading("Scale:"), settings.scale_address, adapter));
    out.push_str(&format!(
        "{} {} {}\n",
        heading("Collector:"),
        collector.base_url(),
        collector_status
    ));
    out.push_str(&format!(
        "{}  {} measurement(s) in {}\n",
        heading("Store:"),
        stored,
        settings.database.display()
    ));
    out.push('\n');
    out.push_str(&latest_section(mode, &collector, latest.as_ref(), ctx).await);
    write_output(&out)
}

async fn latest_section(
    mode: ConnectionMode,
    collector: &CollectorClient,
    local: Option<&Measurement>,
    ctx: &AppContext,
) -> String {
    if mode == ConnectionMode::Remote {
        match collector.latest().await {
            Ok(remote) => return format_remote_latest_text(remote.as_ref(), &ctx.format),
            Err(e) => tracing::warn!(error = %e, "collector latest unavailable, showing local"),
        }
    }
    format_latest_text(local, &ctx.format)
}
