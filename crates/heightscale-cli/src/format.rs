//! Output formatting utilities for text, JSON, and CSV output.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use time::OffsetDateTime;
use time::macros::format_description;

use heightscale_core::{
    ConnectionMode, DiscoveredScale, Measurement, RemoteMeasurement, ScaleAddress, SyncOutcome,
};

use crate::config::Language;

/// 1 kg = 2.20462 lbs
const LBS_PER_KG: f64 = 2.20462;

/// 1 m = 39.3701 in
const INCHES_PER_METER: f64 = 39.3701;

/// Formatting options for output.
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// kg and cm instead of lbs and feet/inches.
    pub use_metric: bool,
    /// Label language.
    pub language: Language,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            no_color: false,
            use_metric: true,
            language: Language::En,
        }
    }
}

impl FormatOptions {
    pub fn new(no_color: bool, use_metric: bool, language: Language) -> Self {
        Self {
            no_color,
            use_metric,
            language,
        }
    }

    fn labels(&self) -> &'static Labels {
        match self.language {
            Language::En => &EN,
            Language::Fi => &FI,
        }
    }
}

/// User-facing words that change with the language setting.
struct Labels {
    weight: &'static str,
    height: &'static str,
    impedance: &'static str,
    latest: &'static str,
    updated: &'static str,
    history: &'static str,
    measurements: &'static str,
    none: &'static str,
    collector: &'static str,
}

const EN: Labels = Labels {
    weight: "Weight",
    height: "Height",
    impedance: "Impedance",
    latest: "Latest Measurement",
    updated: "Last updated",
    history: "Measurement History",
    measurements: "measurements",
    none: "No measurements",
    collector: "collector",
};

const FI: Labels = Labels {
    weight: "Paino",
    height: "Pituus",
    impedance: "Impedanssi",
    latest: "Viimeisin mittaus",
    updated: "Viimeksi päivitetty",
    history: "Mittaushistoria",
    measurements: "mittausta",
    none: "Ei mittauksia",
    collector: "palvelin",
};

/// Format a weight with its unit.
#[must_use]
pub fn format_weight(kg: f64, use_metric: bool) -> String {
    if use_metric {
        format!("{:.1} kg", kg)
    } else {
        format!("{:.1} lbs", kg * LBS_PER_KG)
    }
}

/// Format a height as centimetres, or feet and inches.
///
/// Inches are rounded before splitting, so 71.9 in renders as `6'0"`.
#[must_use]
pub fn format_height(meters: f64, use_metric: bool) -> String {
    if use_metric {
        format!("{:.0} cm", meters * 100.0)
    } else {
        let total_inches = (meters * INCHES_PER_METER).round() as u32;
        format!("{}'{}\"", total_inches / 12, total_inches % 12)
    }
}

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS`.
#[must_use]
pub fn format_timestamp(at: OffsetDateTime) -> String {
    let description = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    at.format(description)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// Format a connection mode, colored by availability.
#[must_use]
pub fn format_mode(mode: ConnectionMode, no_color: bool) -> String {
    let label = mode.to_string();
    if no_color {
        return label;
    }
    match mode {
        ConnectionMode::Ble => label.blue().to_string(),
        ConnectionMode::Remote => label.green().to_string(),
        ConnectionMode::Offline => label.red().to_string(),
    }
}

/// Format a sync outcome, colored by success.
#[must_use]
pub fn format_outcome(outcome: SyncOutcome, no_color: bool) -> String {
    let label = outcome.to_string();
    if no_color {
        return label;
    }
    match outcome {
        SyncOutcome::Delivered => label.green().to_string(),
        SyncOutcome::Failed => label.red().to_string(),
        SyncOutcome::Skipped => label.dimmed().to_string(),
    }
}

/// Format a collector timestamp (naive ISO 8601) as `YYYY-MM-DD HH:MM:SS`.
///
/// Fractional seconds are dropped; anything unexpected is shown as sent.
#[must_use]
pub fn format_remote_timestamp(raw: &str) -> String {
    match raw.get(..19) {
        Some(head) if raw.as_bytes().get(10) == Some(&b'T') => head.replacen('T', " ", 1),
        _ => raw.to_string(),
    }
}

/// The fields every rendering shows, whichever side stored the reading.
struct Reading {
    weight: f64,
    height: f64,
    impedance: u16,
    at: String,
}

impl From<&Measurement> for Reading {
    fn from(m: &Measurement) -> Self {
        Self {
            weight: m.weight(),
            height: m.height(),
            impedance: m.impedance(),
            at: format_timestamp(m.timestamp()),
        }
    }
}

impl From<&RemoteMeasurement> for Reading {
    fn from(m: &RemoteMeasurement) -> Self {
        Self {
            weight: m.weight,
            height: m.height,
            impedance: m.impedance,
            at: format_remote_timestamp(&m.timestamp),
        }
    }
}

fn reading_line(r: &Reading, opts: &FormatOptions) -> String {
    let labels = opts.labels();
    let weight = format_weight(r.weight, opts.use_metric);
    let weight = if opts.no_color {
        weight
    } else {
        weight.bold().to_string()
    };
    format!(
        "{}  {} {}  {} {}  {} {} ohm",
        r.at,
        labels.weight,
        weight,
        labels.height,
        format_height(r.height, opts.use_metric),
        labels.impedance,
        r.impedance,
    )
}

fn latest_block(latest: Option<Reading>, title: &str, opts: &FormatOptions) -> String {
    let labels = opts.labels();
    let Some(r) = latest else {
        return format!("{}\n", labels.none);
    };
    let title = if opts.no_color {
        title.to_string()
    } else {
        title.bold().to_string()
    };
    format!(
        "{}\n  {}: {}\n  {}: {}\n  {}: {} ohm\n  {}: {}\n",
        title,
        labels.weight,
        format_weight(r.weight, opts.use_metric),
        labels.height,
        format_height(r.height, opts.use_metric),
        labels.impedance,
        r.impedance,
        labels.updated,
        r.at,
    )
}

fn history_block(entries: Vec<Reading>, title: &str, opts: &FormatOptions) -> String {
    let labels = opts.labels();
    if entries.is_empty() {
        return format!("{}\n", labels.none);
    }

    let mut out = format!("{} ({} {})\n", title, entries.len(), labels.measurements);
    for r in &entries {
        out.push_str(&reading_line(r, opts));
        out.push('\n');
    }
    out
}

/// One measurement on one line.
#[must_use]
pub fn format_measurement_line(m: &Measurement, opts: &FormatOptions) -> String {
    reading_line(&m.into(), opts)
}

/// The latest measurement as a labelled block.
#[must_use]
pub fn format_latest_text(latest: Option<&Measurement>, opts: &FormatOptions) -> String {
    latest_block(latest.map(Reading::from), opts.labels().latest, opts)
}

/// The collector's latest measurement as a labelled block.
#[must_use]
pub fn format_remote_latest_text(
    latest: Option<&RemoteMeasurement>,
    opts: &FormatOptions,
) -> String {
    let labels = opts.labels();
    let title = format!("{} ({})", labels.latest, labels.collector);
    latest_block(latest.map(Reading::from), &title, opts)
}

/// Measurement history as text, one entry per line.
#[must_use]
pub fn format_history_text(entries: &[Measurement], opts: &FormatOptions) -> String {
    history_block(
        entries.iter().map(Reading::from).collect(),
        opts.labels().history,
        opts,
    )
}

/// The collector's history as text, in the order given.
#[must_use]
pub fn format_remote_history_text(entries: &[RemoteMeasurement], opts: &FormatOptions) -> String {
    let labels = opts.labels();
    let title = format!("{} ({})", labels.history, labels.collector);
    history_block(entries.iter().map(Reading::from).collect(), &title, opts)
}

/// Measurement history as a pretty-printed JSON array.
pub fn format_history_json<T: serde::Serialize>(entries: &[T]) -> Result<String> {
    let json = serde_json::to_string_pretty(entries).context("Failed to serialize history")?;
    Ok(json + "\n")
}

/// Measurement history as CSV with a header row.
pub fn format_history_csv(entries: &[Measurement]) -> Result<String> {
    let mut out = Vec::new();
    heightscale_store::export::write_csv(entries, &mut out).context("Failed to write CSV")?;
    String::from_utf8(out).context("CSV output is not UTF-8")
}

/// Scan results, marking the configured scale and likely scales.
#[must_use]
pub fn format_scan_text(
    devices: &[DiscoveredScale],
    target: &ScaleAddress,
    opts: &FormatOptions,
) -> String {
    if devices.is_empty() {
        return "No devices found.\n".to_string();
    }

    let mut out = format!("Found {} device(s):\n", devices.len());
    for device in devices {
        let name = device.name.as_deref().unwrap_or("(unnamed)");
        let rssi = device
            .rssi
            .map_or_else(|| "   ?".to_string(), |r| format!("{:>4}", r));
        let marker = if target.matches(&device.address) {
            "target"
        } else if device.looks_like_scale() {
            "scale"
        } else {
            ""
        };
        let marker = if opts.no_color || marker.is_empty() {
            marker.to_string()
        } else if marker == "target" {
            marker.green().bold().to_string()
        } else {
            marker.yellow().to_string()
        };
        out.push_str(&format!(
            "  {:<20} {} dBm  {:<16} {}\n",
            device.address, rssi, name, marker
        ));
    }
    out
}
