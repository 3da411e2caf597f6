//! Bounded local persistence for body-composition measurements.
//!
//! The history is a single newest-first sequence of at most
//! [`CAPACITY`] measurements, persisted as one blob so every write
//! replaces it atomically.
//!
//! # Features
//!
//! - [`MeasurementStore`] with save/all/latest/clear and explicit pruning
//! - SQLite ([`SqliteBackend`]) and in-memory ([`MemoryBackend`]) blob backends
//! - Corrupt or unreadable history reads as empty instead of failing
//! - CSV export via [`export::write_csv`]
//!
//! # Example
//!
//! ```no_run
//! use heightscale_store::MeasurementStore;
//!
//! # async fn example() -> Result<(), heightscale_store::Error> {
//! let store = MeasurementStore::open_default()?;
//!
//! if let Some(latest) = store.latest().await {
//!     println!("{:.1} kg", latest.weight());
//! }
//! let removed = store.prune(heightscale_store::DEFAULT_RETENTION_DAYS).await?;
//! println!("pruned {removed}");
//! # Ok(())
//! # }
//! ```

mod backend;
mod error;
pub mod export;
mod schema;
mod store;

pub use backend::{BlobBackend, MemoryBackend, SqliteBackend};
pub use error::{Error, Result};
pub use schema::SCHEMA_VERSION;
pub use store::{CAPACITY, DEFAULT_RETENTION_DAYS, KEY, MeasurementStore};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/heightscale/data.db`
/// - macOS: `~/Library/Application Support/heightscale/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\heightscale\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("heightscale")
        .join("data.db")
}
