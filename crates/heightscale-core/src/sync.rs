//! Best-effort delivery of measurements to a remote collector.
//!
//! Delivery never blocks local persistence and never aborts a batch: each
//! measurement gets exactly one attempt and its failure is counted, logged
//! and otherwise ignored.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use heightscale_types::Measurement;

/// Why a single delivery failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// The collector could not be reached.
    #[error("collector unreachable: {0}")]
    Unreachable(String),

    /// The collector answered with a non-success status.
    #[error("collector rejected measurement (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error text from the response, or the status reason.
        message: String,
    },

    /// The collector endpoint is malformed.
    #[error("invalid collector endpoint: {0}")]
    InvalidEndpoint(String),
}

/// A remote that accepts measurements.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Whether the collector answers its reachability probe.
    async fn is_reachable(&self) -> bool;

    /// Deliver one measurement.
    async fn push(&self, measurement: &Measurement) -> Result<(), SyncError>;
}

#[async_trait]
impl<C: Collector + ?Sized> Collector for Arc<C> {
    async fn is_reachable(&self) -> bool {
        (**self).is_reachable().await
    }

    async fn push(&self, measurement: &Measurement) -> Result<(), SyncError> {
        (**self).push(measurement).await
    }
}

/// What happened to one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The collector accepted the measurement.
    Delivered,
    /// The attempt was made and failed.
    Failed,
    /// No attempt was made because the collector was unreachable.
    Skipped,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// A measurement and the outcome of its delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRecord {
    pub measurement: Measurement,
    pub outcome: SyncOutcome,
}

/// Totals for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Deliveries attempted.
    pub attempted: usize,
    /// Deliveries the collector accepted.
    pub delivered: usize,
}

impl SyncReport {
    /// Attempts that failed.
    pub fn failed(&self) -> usize {
        self.attempted - self.delivered
    }
}

/// Push every entry once, in order, counting successes.
///
/// A failed item is logged and skipped; it never stops the batch.
pub async fn sync_all<C: Collector + ?Sized>(collector: &C, entries: &[Measurement]) -> SyncReport {
    let mut report = SyncReport::default();
    for (index, measurement) in entries.iter().enumerate() {
        report.attempted += 1;
        match collector.push(measurement).await {
            Ok(()) => report.delivered += 1,
            Err(e) => warn!(index, error = %e, "measurement not delivered"),
        }
    }
    info!(
        attempted = report.attempted,
        delivered = report.delivered,
        "sync finished"
    );
    report
}

/// Push every entry to the collector at `endpoint`.
///
/// Fails only when `endpoint` cannot be used at all; per-item failures are
/// counted in the report.
#[cfg(feature = "collector-client")]
pub async fn sync_all_to(endpoint: &str, entries: &[Measurement]) -> Result<SyncReport, SyncError> {
    let client = crate::collector::CollectorClient::new(endpoint)?;
    Ok(sync_all(&client, entries).await)
}

/// Deliver a freshly accepted measurement if the collector is reachable.
///
/// Failures are logged and reported in the record, never returned.
pub async fn deliver_live<C: Collector + ?Sized>(
    collector: &C,
    measurement: Measurement,
) -> SyncRecord {
    let outcome = if !collector.is_reachable().await {
        debug!("collector unreachable, live sync skipped");
        SyncOutcome::Skipped
    } else {
        match collector.push(&measurement).await {
            Ok(()) => SyncOutcome::Delivered,
            Err(e) => {
                warn!(error = %e, "live sync failed");
                SyncOutcome::Failed
            }
        }
    };
    debug!(%outcome, "live sync");
    SyncRecord {
        measurement,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use heightscale_types::{TargetBmi, decode};

    /// Fails the pushes whose call index is listed.
    #[derive(Default)]
    struct ScriptedCollector {
        unreachable: AtomicBool,
        failing_calls: HashSet<usize>,
        calls: AtomicUsize,
        accepted: Mutex<Vec<u16>>,
    }

    #[async_trait]
    impl Collector for ScriptedCollector {
        async fn is_reachable(&self) -> bool {
            !self.unreachable.load(Ordering::SeqCst)
        }

        async fn push(&self, measurement: &Measurement) -> Result<(), SyncError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_calls.contains(&call) {
                return Err(SyncError::Rejected {
                    status: 500,
                    message: "Internal Server Error".to_string(),
                });
            }
            self.accepted.lock().unwrap().push(measurement.impedance());
            Ok(())
        }
    }

    fn measurement(impedance: u16) -> Measurement {
        let mut frame = [0u8; 13];
        frame[1] = 0x20;
        frame[9..11].copy_from_slice(&impedance.to_le_bytes());
        frame[11..13].copy_from_slice(&14000u16.to_le_bytes());
        decode(&frame, TargetBmi::default()).unwrap()
    }

    #[tokio::test]
    async fn test_sync_all_isolates_a_failed_item() {
        let collector = ScriptedCollector {
            failing_calls: HashSet::from([1]),
            ..Default::default()
        };
        let batch: Vec<_> = (0..5).map(|i| measurement(400 + i)).collect();

        let report = sync_all(&collector, &batch).await;

        assert_eq!(report.attempted, 5);
        assert_eq!(report.delivered, 4);
        assert_eq!(report.failed(), 1);
        assert_eq!(collector.calls.load(Ordering::SeqCst), 5);
        assert_eq!(
            *collector.accepted.lock().unwrap(),
            vec![400, 402, 403, 404]
        );
    }

    #[tokio::test]
    async fn test_sync_all_empty_batch() {
        let collector = ScriptedCollector::default();
        let report = sync_all(&collector, &[]).await;
        assert_eq!(report, SyncReport::default());
    }

    #[tokio::test]
    async fn test_sync_all_through_arc() {
        let collector = Arc::new(ScriptedCollector::default());
        let report = sync_all(&collector, &[measurement(500)]).await;
        assert_eq!(report.delivered, 1);
    }

    #[tokio::test]
    async fn test_deliver_live_outcomes() {
        let collector = ScriptedCollector {
            failing_calls: HashSet::from([1]),
            ..Default::default()
        };

        let record = deliver_live(&collector, measurement(500)).await;
        assert_eq!(record.outcome, SyncOutcome::Delivered);
        assert_eq!(record.measurement.impedance(), 500);

        let record = deliver_live(&collector, measurement(501)).await;
        assert_eq!(record.outcome, SyncOutcome::Failed);

        collector.unreachable.store(true, Ordering::SeqCst);
        let record = deliver_live(&collector, measurement(502)).await;
        assert_eq!(record.outcome, SyncOutcome::Skipped);
        assert_eq!(collector.calls.load(Ordering::SeqCst), 2);
    }

    #[cfg(feature = "collector-client")]
    #[tokio::test]
    async fn test_sync_all_to_rejects_malformed_endpoint() {
        let result = sync_all_to("localhost:8000", &[measurement(500)]).await;
        assert!(matches!(result, Err(SyncError::InvalidEndpoint(_))));

        let result = sync_all_to("http://", &[measurement(500)]).await;
        assert!(matches!(result, Err(SyncError::InvalidEndpoint(_))));
    }
}
