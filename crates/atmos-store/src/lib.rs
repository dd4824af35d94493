//! Day-partitioned, append-only storage for atmos samples.
//!
//! Samples are kept as one CSV file per calendar day. Closed days are
//! compressed and old days deleted by the [`RetentionMaintainer`], which runs
//! alongside the writer without locking it.
//!
//! # Features
//!
//! - Single writer, any number of lock-free readers
//! - Torn writes are detected and truncated on open
//! - Transparent snappy compression of closed days
//! - Lazy, resumable range queries
//! - Retention by age and total size
//!
//! # Example
//!
//! ```no_run
//! use atmos_store::{SampleQuery, Store, StoreOptions};
//!
//! let store = Store::open("/var/lib/atmos", StoreOptions::default())?;
//! if !store.recovered().is_empty() {
//!     eprintln!("recovered {} partitions after a crash", store.recovered().len());
//! }
//!
//! let reader = store.reader();
//! let stats = reader.stats(&SampleQuery::new())?;
//! println!("{} samples stored", stats.count());
//! # Ok::<(), atmos_store::StoreError>(())
//! ```

mod error;
mod partition;
mod query;
mod retention;
mod stats;
mod store;

pub use error::{Result, StoreError};
pub use partition::{COLUMNS, PartitionInfo, compressed_path, day_of, plain_path};
pub use query::{SampleQuery, Samples, StorageUsage, StoreReader};
pub use retention::{RetentionMaintainer, RetentionPolicy, RetentionSummary};
pub use stats::{FieldStats, QualityCounts, SampleStats, StatsSummary};
pub use store::{Appended, RecoveredPartition, Store, StoreOptions};

/// Default store directory following platform conventions.
///
/// - Linux: `~/.local/share/atmos/samples`
/// - macOS: `~/Library/Application Support/atmos/samples`
/// - Windows: `C:\Users\<user>\AppData\Local\atmos\samples`
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("atmos")
        .join("samples")
}
