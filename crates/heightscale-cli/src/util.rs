//! Utility functions for CLI operations.

use std::io::{self, Write};

use anyhow::{Context, Result};

use heightscale_core::{BtleplugTransport, CollectorClient};
use heightscale_store::{MeasurementStore, SqliteBackend};

use crate::config::Settings;

/// Open the measurement database named by `settings`.
pub fn open_store(settings: &Settings) -> Result<MeasurementStore<SqliteBackend>> {
    MeasurementStore::open(&settings.database).with_context(|| {
        format!(
            "Failed to open measurement database: {}",
            settings.database.display()
        )
    })
}

/// Build a client for the configured collector.
pub fn collector_client(settings: &Settings) -> Result<CollectorClient> {
    CollectorClient::new(&settings.collector_url)
        .with_context(|| format!("Invalid collector URL: {}", settings.collector_url))
}

/// Open the first Bluetooth adapter.
pub async fn bluetooth() -> Result<BtleplugTransport> {
    BtleplugTransport::new()
        .await
        .context("Failed to initialize Bluetooth. Is an adapter present?")
}

/// Write command output to stdout.
pub fn write_output(content: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(content.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
