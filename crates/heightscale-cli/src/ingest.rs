//! Persist-then-sync handling of live measurements.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error};

use heightscale_core::{Collector, Measurement, MeasurementSink, SyncOutcome, deliver_live};
use heightscale_store::{BlobBackend, MeasurementStore};

/// What happened to one live measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub measurement: Measurement,
    /// Whether the local store accepted it.
    pub saved: bool,
    /// Live sync outcome, `None` when auto-sync is off.
    pub sync: Option<SyncOutcome>,
}

/// Saves every measurement locally, then optionally forwards it to the collector.
///
/// The local save always runs first and its failure never suppresses the
/// sync attempt.
pub struct IngestSink<B, C> {
    store: Arc<MeasurementStore<B>>,
    collector: Option<Arc<C>>,
    events: mpsc::Sender<Ingested>,
}

impl<B, C> IngestSink<B, C> {
    /// `collector` is `None` when live sync is disabled.
    pub fn new(
        store: Arc<MeasurementStore<B>>,
        collector: Option<Arc<C>>,
        events: mpsc::Sender<Ingested>,
    ) -> Self {
        Self {
            store,
            collector,
            events,
        }
    }
}

#[async_trait]
impl<B, C> MeasurementSink for IngestSink<B, C>
where
    B: BlobBackend + 'static,
    C: Collector + 'static,
{
    async fn accept(&self, measurement: Measurement) {
        let saved = match self.store.save(measurement.clone()).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "failed to save measurement");
                false
            }
        };

        let sync = match &self.collector {
            Some(collector) => Some(deliver_live(collector, measurement.clone()).await.outcome),
            None => None,
        };

        let event = Ingested {
            measurement,
            saved,
            sync,
        };
        if self.events.send(event).await.is_err() {
            debug!("ingest event receiver dropped");
        }
    }
}
