//! The bounded, newest-first measurement history.

use std::path::Path;

use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use heightscale_types::Measurement;

use crate::backend::{BlobBackend, SqliteBackend};
use crate::error::Result;

/// Blob key the history is persisted under.
pub const KEY: &str = "heightscale.measurements";

/// Maximum number of measurements kept.
pub const CAPACITY: usize = 100;

/// Default age limit for [`MeasurementStore::prune`].
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// At most [`CAPACITY`] measurements, newest first, stored as one blob.
///
/// Reads never fail: unreadable or corrupt history is reported as empty.
/// Writes (`save`, `clear`, `prune`) propagate backend failures and are
/// serialized so concurrent saves never lose each other's entries.
pub struct MeasurementStore<B> {
    backend: B,
    write_lock: Mutex<()>,
}

impl<B> std::fmt::Debug for MeasurementStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementStore")
            .field("key", &KEY)
            .finish_non_exhaustive()
    }
}

impl MeasurementStore<SqliteBackend> {
    /// Open or create a SQLite-backed store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(SqliteBackend::open(path)?))
    }

    /// Open the store at the default database location.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(SqliteBackend::open_default()?))
    }

    /// Open an in-memory SQLite store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(SqliteBackend::open_in_memory()?))
    }
}

impl<B: BlobBackend> MeasurementStore<B> {
    /// Wrap `backend`. Nothing is read until the first query.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    /// The backend the history is persisted in.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Every stored measurement, newest first. Empty when nothing is
    /// stored or the stored history cannot be read.
    pub async fn all(&self) -> Vec<Measurement> {
        match self.load() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "measurement history unreadable, showing none");
                Vec::new()
            }
        }
    }

    /// The newest measurement.
    pub async fn latest(&self) -> Option<Measurement> {
        self.all().await.into_iter().next()
    }

    /// Number of stored measurements.
    pub async fn len(&self) -> usize {
        self.all().await.len()
    }

    /// Whether no measurement is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Prepend `measurement`, dropping the oldest entry beyond [`CAPACITY`].
    ///
    /// Corrupt history is discarded and replaced; a backend read or write
    /// failure is returned.
    pub async fn save(&self, measurement: Measurement) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.load_for_write()?;
        entries.insert(0, measurement);
        entries.truncate(CAPACITY);
        self.persist(&entries)?;

        debug!(count = entries.len(), "measurement saved");
        Ok(())
    }

    /// Remove every measurement. Clearing an empty store succeeds.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.backend.remove(KEY)?;
        info!("measurement history cleared");
        Ok(())
    }

    /// Remove measurements older than `retention_days` days. Returns how many were removed.
    pub async fn prune(&self, retention_days: u32) -> Result<usize> {
        self.prune_at(OffsetDateTime::now_utc(), retention_days)
            .await
    }

    /// [`prune`](Self::prune) relative to a fixed `now`.
    ///
    /// An entry exactly `retention_days` old is kept.
    pub async fn prune_at(&self, now: OffsetDateTime, retention_days: u32) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let cutoff = now - Duration::days(i64::from(retention_days));
        let mut entries = self.load_for_write()?;
        let before = entries.len();
        entries.retain(|m| m.timestamp() >= cutoff);
        let removed = before - entries.len();

        if removed > 0 {
            self.persist(&entries)?;
        }
        info!(removed, kept = entries.len(), retention_days, "pruned history");
        Ok(removed)
    }

    fn load(&self) -> Result<Vec<Measurement>> {
        match self.backend.get(KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Like `load`, but corrupt data reads as empty while backend failures propagate.
    fn load_for_write(&self) -> Result<Vec<Measurement>> {
        let Some(raw) = self.backend.get(KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(error = %e, "discarding corrupt measurement history");
                Ok(Vec::new())
            }
        }
    }

    fn persist(&self, entries: &[Measurement]) -> Result<()> {
        let json = serde_json::to_string(entries)?;
        self.backend.set(KEY, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use heightscale_types::{TargetBmi, decode_at};
    use time::macros::datetime;

    use crate::backend::MemoryBackend;
    use crate::error::Error;

    const NOW: OffsetDateTime = datetime!(2026-05-04 12:00 UTC);

    fn measurement_at(at: OffsetDateTime, impedance: u16) -> Measurement {
        let mut frame = [0u8; 13];
        frame[1] = 0x20;
        frame[9..11].copy_from_slice(&impedance.to_le_bytes());
        frame[11..13].copy_from_slice(&14000u16.to_le_bytes());
        decode_at(&frame, TargetBmi::default(), at).unwrap()
    }

    fn memory_store() -> MeasurementStore<MemoryBackend> {
        MeasurementStore::new(MemoryBackend::new())
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = memory_store();
        assert!(store.all().await.is_empty());
        assert!(store.latest().await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_saving_past_capacity_keeps_newest_hundred() {
        let store = memory_store();
        for i in 0..=100u16 {
            store
                .save(measurement_at(NOW + Duration::minutes(i64::from(i)), i))
                .await
                .unwrap();
        }

        let all = store.all().await;
        assert_eq!(all.len(), CAPACITY);
        assert_eq!(all[0].impedance(), 100);
        assert_eq!(all[99].impedance(), 1);
        assert!(all.windows(2).all(|w| w[0].timestamp() > w[1].timestamp()));
    }

    #[tokio::test]
    async fn test_saved_measurement_reads_back_first() {
        let store = memory_store();
        store.save(measurement_at(NOW, 480)).await.unwrap();

        // Wall-clock timestamp with sub-second precision and an uneven weight.
        let mut frame = [0u8; 13];
        frame[1] = 0x20;
        frame[9..11].copy_from_slice(&512u16.to_le_bytes());
        frame[11..13].copy_from_slice(&15051u16.to_le_bytes());
        let fresh = heightscale_types::decode(&frame, TargetBmi::new(22.5).unwrap()).unwrap();
        store.save(fresh.clone()).await.unwrap();

        assert_eq!(store.all().await[0], fresh);
        assert_eq!(store.latest().await, Some(fresh));
    }

    #[tokio::test]
    async fn test_prune_removes_only_entries_older_than_retention() {
        let store = memory_store();
        for (days, impedance) in [(40, 1), (31, 2), (30, 3), (29, 4), (0, 5)] {
            store
                .save(measurement_at(NOW - Duration::days(days), impedance))
                .await
                .unwrap();
        }

        let removed = store.prune_at(NOW, DEFAULT_RETENTION_DAYS).await.unwrap();

        assert_eq!(removed, 2);
        let kept: Vec<u16> = store.all().await.iter().map(|m| m.impedance()).collect();
        assert_eq!(kept, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn test_prune_with_nothing_to_remove_does_not_write() {
        let store = memory_store();
        store.save(measurement_at(NOW, 500)).await.unwrap();
        store.backend().set_fail_writes(true);

        assert_eq!(store.prune_at(NOW, 30).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = memory_store();
        store.save(measurement_at(NOW, 500)).await.unwrap();

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_history_reads_as_empty_and_is_replaced() {
        let store = memory_store();
        store.backend().insert_raw(KEY, "{\"weight\": oops");

        assert!(store.all().await.is_empty());
        assert!(store.latest().await.is_none());

        store.save(measurement_at(NOW, 500)).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unreadable_backend_degrades_reads_but_fails_writes() {
        let store = memory_store();
        store.save(measurement_at(NOW, 500)).await.unwrap();
        store.backend().set_fail_reads(true);

        assert!(store.all().await.is_empty());
        assert!(matches!(
            store.save(measurement_at(NOW, 501)).await,
            Err(Error::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_write_failures_propagate() {
        let store = memory_store();
        store.backend().set_fail_writes(true);

        assert!(store.save(measurement_at(NOW, 500)).await.is_err());
        assert!(store.clear().await.is_err());
        assert!(store.all().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_lose_nothing() {
        let store = Arc::new(memory_store());
        let mut tasks = Vec::new();
        for i in 0..40u16 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.save(measurement_at(NOW, i)).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut seen: Vec<u16> = store.all().await.iter().map(|m| m.impedance()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_sqlite_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.db");

        let store = MeasurementStore::open(&path).unwrap();
        store.save(measurement_at(NOW, 500)).await.unwrap();
        store.save(measurement_at(NOW + Duration::hours(1), 510)).await.unwrap();
        drop(store);

        let store = MeasurementStore::open(&path).unwrap();
        let all = store.all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].impedance(), 510);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Pruning keeps exactly the entries at or after the cutoff, in order.
            #[test]
            fn prune_keeps_exactly_recent_entries(
                ages_hours in proptest::collection::vec(0i64..(60 * 24), 0..=CAPACITY),
                retention_days in 0u32..45,
            ) {
                let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
                runtime.block_on(async {
                    let store = memory_store();
                    for (i, age) in ages_hours.iter().enumerate() {
                        store.save(measurement_at(NOW - Duration::hours(*age), i as u16)).await.unwrap();
                    }
                    let before = store.all().await;
                    let cutoff = NOW - Duration::days(i64::from(retention_days));

                    let removed = store.prune_at(NOW, retention_days).await.unwrap();

                    let expected: Vec<Measurement> = before
                        .iter()
                        .filter(|m| m.timestamp() >= cutoff)
                        .cloned()
                        .collect();
                    prop_assert_eq!(removed, before.len() - expected.len());
                    prop_assert_eq!(store.all().await, expected);
                    Ok(())
                })?;
            }
        }
    }
}
