//! CSV export of measurement history.

use std::io::Write;

use time::format_description::well_known::Rfc3339;

use heightscale_types::Measurement;

use crate::error::{Error, Result};

/// Column headers, in output order.
pub const CSV_HEADERS: [&str; 4] = ["timestamp", "weight_kg", "impedance_ohm", "height_m"];

/// Write `entries` as CSV with a header row, in the order given.
pub fn write_csv<W: Write>(entries: &[Measurement], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(CSV_HEADERS)?;

    for m in entries {
        let timestamp = m
            .timestamp()
            .format(&Rfc3339)
            .map_err(|e| Error::InvalidTimestamp(e.to_string()))?;
        csv.write_record([
            timestamp,
            format!("{:.2}", m.weight()),
            m.impedance().to_string(),
            format!("{:.4}", m.height()),
        ])?;
    }

    csv.flush()?;
    Ok(())
}
