//! Watch command implementation.
//!
//! Holds one session to the scale for as long as the command runs. Each
//! accepted measurement is saved locally and, when auto-sync is on, pushed
//! to the collector. A dropped link is re-established with exponential
//! backoff; Ctrl+C tears the session down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use owo_colors::OwoColorize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use heightscale_core::{
    BleTransport, CollectorClient, ConnectionMode, Error, ModeController, ReconnectOptions,
    ScaleSession, SessionConfig, SessionSources, SessionState, connect_with_backoff,
};
use heightscale_store::{MeasurementStore, SqliteBackend};

use super::AppContext;
use crate::format::{format_measurement_line, format_mode, format_outcome};
use crate::ingest::{IngestSink, Ingested};
use crate::util::{bluetooth, collector_client, open_store, write_output};

/// Minimum backoff delay for reconnection attempts
const MIN_BACKOFF_SECS: u64 = 2;
/// Maximum backoff delay for reconnection attempts
const MAX_BACKOFF_SECS: u64 = 300; // 5 minutes

/// Arguments for the watch command.
pub struct WatchArgs {
    pub count: u32,
    pub no_sync: bool,
}

/// Shared pieces each (re)subscription needs.
struct Ingest {
    store: Arc<MeasurementStore<SqliteBackend>>,
    collector: Option<Arc<CollectorClient>>,
    events: mpsc::Sender<Ingested>,
}

impl Ingest {
    fn sink(&self) -> IngestSink<SqliteBackend, CollectorClient> {
        IngestSink::new(
            Arc::clone(&self.store),
            self.collector.clone(),
            self.events.clone(),
        )
    }
}

pub async fn cmd_watch(ctx: &AppContext, args: WatchArgs) -> Result<()> {
    let settings = &ctx.settings;
    if !settings.ble_enabled {
        bail!("BLE is disabled in the configuration (ble_enabled = false)");
    }

    let store = Arc::new(open_store(settings)?);
    let collector = Arc::new(collector_client(settings)?);
    let session = ScaleSession::shared(
        bluetooth().await?,
        SessionConfig::default()
            .address(settings.scale_address.clone())
            .target_bmi(settings.target_bmi)
            .scan_timeout(settings.scan_timeout),
    );
    if !session.request_permissions().await {
        session.teardown().await;
        bail!("Bluetooth permission was denied");
    }

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nShutting down...");
            }
            cancel.cancel();
        })
    };

    let controller = Arc::new(ModeController::new(
        SessionSources::new(Arc::clone(&session), Arc::clone(&collector)),
        settings.ble_enabled,
        settings.poll_interval,
    )?);
    let modes = controller.watch_mode();
    let mode_task = Arc::clone(&controller).spawn(cancel.child_token());

    let (events, rx) = mpsc::channel(16);
    let ingest = Ingest {
        store,
        collector: (settings.auto_sync && !args.no_sync).then(|| Arc::clone(&collector)),
        events,
    };

    if !ctx.quiet {
        let address = settings.scale_address.to_string();
        let address = if ctx.format.no_color {
            address
        } else {
            address.cyan().to_string()
        };
        eprintln!("Watching: {}", address);
        if args.count > 0 {
            eprintln!("Count: {} | Press Ctrl+C to stop", args.count);
        } else {
            eprintln!("Press Ctrl+C to stop");
        }
        eprintln!("{}", "-".repeat(50));
    }

    let result = run(ctx, &session, &ingest, rx, modes, args.count, &cancel).await;

    cancel.cancel();
    ctrl_c.abort();
    mode_task.await.ok();
    session.teardown().await;
    result
}

async fn run<T: BleTransport>(
    ctx: &AppContext,
    session: &ScaleSession<T>,
    ingest: &Ingest,
    mut events: mpsc::Receiver<Ingested>,
    mut modes: watch::Receiver<ConnectionMode>,
    count: u32,
    cancel: &CancellationToken,
) -> Result<()> {
    let options = ReconnectOptions::unlimited()
        .initial_delay(Duration::from_secs(MIN_BACKOFF_SECS))
        .max_delay(Duration::from_secs(MAX_BACKOFF_SECS));
    let mut taken: u32 = 0;

    loop {
        match connect_with_backoff(session, &options, cancel).await {
            Ok(()) => {}
            Err(Error::Cancelled) => return Ok(()),
            Err(e) => return Err(e).context("Failed to connect to scale"),
        }

        // Subscribed before monitoring starts, so a drop in between still registers.
        let mut states = session.watch_state();
        if let Err(e) = session.start_monitoring(ingest.sink()).await {
            if !e.is_retryable() {
                return Err(e).context("Failed to subscribe to measurements");
            }
            warn!(error = %e, "subscription failed, reconnecting");
            session.disconnect().await.ok();
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(Duration::from_secs(MIN_BACKOFF_SECS)) => continue,
            }
        }
        if !ctx.quiet {
            eprintln!("Connected. Step on the scale.");
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                Some(event) = events.recv() => {
                    write_output(&format_event(&event, ctx))?;
                    taken += 1;
                    if count > 0 && taken >= count {
                        if !ctx.quiet {
                            eprintln!("Completed {} measurement(s).", taken);
                        }
                        return Ok(());
                    }
                }
                Ok(()) = modes.changed() => {
                    let mode = *modes.borrow_and_update();
                    if !ctx.quiet {
                        eprintln!("Mode: {}", format_mode(mode, ctx.format.no_color));
                    }
                }
                changed = states.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    let state = *states.borrow_and_update();
                    if state == SessionState::Terminated {
                        return Ok(());
                    }
                    if !state.is_connected() {
                        eprintln!("Connection lost. Reconnecting...");
                        break;
                    }
                }
            }
        }
    }
}

fn format_event(event: &Ingested, ctx: &AppContext) -> String {
    let mut line = format_measurement_line(&event.measurement, &ctx.format);
    if !event.saved {
        let note = if ctx.format.no_color {
            "not saved".to_string()
        } else {
            "not saved".red().to_string()
        };
        line.push_str(&format!("  [{}]", note));
    }
    if let Some(outcome) = event.sync {
        line.push_str(&format!(
            "  [sync: {}]",
            format_outcome(outcome, ctx.format.no_color)
        ));
    }
    line.push('\n');
    line
}
