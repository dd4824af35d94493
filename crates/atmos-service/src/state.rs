//! State shared between the collector, the maintainer and consumers.
//!
//! # Channels
//!
//! Appended samples are published on two channels:
//!
//! - a `watch` channel holding only the latest sample, for live displays that
//!   just want the current value
//! - a `broadcast` channel delivering every sample to subscribers; a
//!   subscriber that falls more than [`SUBSCRIPTION_BUFFER`] samples behind
//!   loses the oldest ones and never blocks the collector

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};

use atmos_store::{RetentionSummary, StoreReader};
use atmos_types::Sample;

use crate::config::Config;

/// Capacity of the sample subscription channel.
pub const SUBSCRIPTION_BUFFER: usize = 256;

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Validated configuration.
    pub config: Config,
    /// Poll-loop counters.
    pub collector: CollectorStats,
    /// Retention counters.
    pub maintenance: MaintenanceStats,
    reader: StoreReader,
    latest_tx: watch::Sender<Option<Sample>>,
    samples_tx: broadcast::Sender<Sample>,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: Config) -> Arc<Self> {
        let reader = StoreReader::new(&config.storage.path, config.storage.utc_offset());
        let (latest_tx, _) = watch::channel(None);
        let (samples_tx, _) = broadcast::channel(SUBSCRIPTION_BUFFER);
        Arc::new(Self {
            config,
            collector: CollectorStats::default(),
            maintenance: MaintenanceStats::default(),
            reader,
            latest_tx,
            samples_tx,
        })
    }

    /// Read handle on the sample store.
    pub fn reader(&self) -> &StoreReader {
        &self.reader
    }

    /// Publish a newly stored sample.
    pub fn publish(&self, sample: Sample) {
        self.latest_tx.send_replace(Some(sample));
        // No subscribers is not an error.
        let _ = self.samples_tx.send(sample);
    }

    /// The most recently published sample.
    pub fn latest(&self) -> Option<Sample> {
        *self.latest_tx.borrow()
    }

    /// Watch the latest sample.
    pub fn watch_latest(&self) -> watch::Receiver<Option<Sample>> {
        self.latest_tx.subscribe()
    }

    /// Subscribe to every sample published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Sample> {
        self.samples_tx.subscribe()
    }
}

/// Counters maintained by the collector.
#[derive(Debug, Default)]
pub struct CollectorStats {
    running: AtomicBool,
    started_at: AtomicU64,
    readings: AtomicU64,
    read_failures: AtomicU64,
    degraded: AtomicU64,
    appended: AtomicU64,
    duplicates: AtomicU64,
    append_failures: AtomicU64,
    alerts: AtomicU64,
    baseline_saves: AtomicU64,
}

impl CollectorStats {
    /// Mark the collector as started or stopped.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if running {
            let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
            self.started_at.store(now, Ordering::SeqCst);
        }
    }

    /// Check if the collector is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn record_reading(&self, read_failed: bool, degraded: bool) {
        self.readings.fetch_add(1, Ordering::Relaxed);
        if read_failed {
            self.read_failures.fetch_add(1, Ordering::Relaxed);
        }
        if degraded {
            self.degraded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_appended(&self) {
        self.appended.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_append_failure(&self) {
        self.append_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_alert(&self) {
        self.alerts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_baseline_save(&self) {
        self.baseline_saves.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> CollectorSnapshot {
        let started_at = self.started_at.load(Ordering::SeqCst);
        CollectorSnapshot {
            running: self.is_running(),
            started_at: (started_at != 0)
                .then(|| OffsetDateTime::from_unix_timestamp(started_at as i64).ok())
                .flatten(),
            readings: self.readings.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            appended: self.appended.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            append_failures: self.append_failures.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            baseline_saves: self.baseline_saves.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`CollectorStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectorSnapshot {
    pub running: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// Polls completed, including failed reads.
    pub readings: u64,
    /// Polls whose read failed or timed out.
    pub read_failures: u64,
    /// Samples flagged degraded.
    pub degraded: u64,
    pub appended: u64,
    pub duplicates: u64,
    pub append_failures: u64,
    pub alerts: u64,
    pub baseline_saves: u64,
}

/// Counters maintained by the maintainer.
#[derive(Debug, Default)]
pub struct MaintenanceStats {
    passes: AtomicU64,
    failed_passes: AtomicU64,
    partitions_deleted: AtomicU64,
    partitions_compressed: AtomicU64,
    bytes_freed: AtomicU64,
}

impl MaintenanceStats {
    pub(crate) fn record(&self, summary: &RetentionSummary) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.partitions_deleted
            .fetch_add(summary.partitions_deleted as u64, Ordering::Relaxed);
        self.partitions_compressed
            .fetch_add(summary.partitions_compressed as u64, Ordering::Relaxed);
        self.bytes_freed
            .fetch_add(summary.bytes_freed, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed_passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed passes.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Passes that returned an error.
    pub fn failed_passes(&self) -> u64 {
        self.failed_passes.load(Ordering::Relaxed)
    }

    /// Partitions deleted over all passes.
    pub fn partitions_deleted(&self) -> u64 {
        self.partitions_deleted.load(Ordering::Relaxed)
    }

    /// Partitions compressed over all passes.
    pub fn partitions_compressed(&self) -> u64 {
        self.partitions_compressed.load(Ordering::Relaxed)
    }

    /// Bytes freed over all passes.
    pub fn bytes_freed(&self) -> u64 {
        self.bytes_freed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atmos_types::QualityFlag;

    fn sample(iaq: u16) -> Sample {
        Sample {
            timestamp: OffsetDateTime::UNIX_EPOCH,
            iaq,
            voc_index: 20,
            co2eq_ppm: 500,
            pm25_aqi: 5,
            pm1_0: 0.5,
            pm2_5: 1.2,
            pm10: 1.8,
            temperature_c: 21.0,
            humidity_pct: 40.0,
            pressure_hpa: 1013.0,
            gas_resistance_ohm: 50_000.0,
            quality: QualityFlag::Nominal,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_watch_and_subscribers() {
        let state = AppState::new(Config::default());
        assert!(state.latest().is_none());

        let mut rx = state.subscribe();
        let mut watch = state.watch_latest();

        state.publish(sample(42));

        assert_eq!(rx.recv().await.unwrap().iaq, 42);
        watch.changed().await.unwrap();
        assert_eq!(watch.borrow().map(|s| s.iaq), Some(42));
        assert_eq!(state.latest().map(|s| s.iaq), Some(42));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let state = AppState::new(Config::default());
        state.publish(sample(7));
        assert_eq!(state.latest().map(|s| s.iaq), Some(7));
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let state = AppState::new(Config::default());
        let mut rx = state.subscribe();
        for i in 0..(SUBSCRIPTION_BUFFER + 10) {
            state.publish(sample(i as u16));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(10))
        ));
        assert_eq!(rx.recv().await.unwrap().iaq, 10);
    }

    #[test]
    fn test_collector_stats() {
        let stats = CollectorStats::default();
        assert!(!stats.is_running());
        assert!(stats.snapshot().started_at.is_none());

        stats.set_running(true);
        stats.record_reading(true, true);
        stats.record_reading(false, false);
        stats.record_appended();
        stats.record_append_failure();

        let snap = stats.snapshot();
        assert!(snap.running);
        assert!(snap.started_at.is_some());
        assert_eq!(snap.readings, 2);
        assert_eq!(snap.read_failures, 1);
        assert_eq!(snap.degraded, 1);
        assert_eq!(snap.appended, 1);
        assert_eq!(snap.append_failures, 1);
    }

    #[test]
    fn test_maintenance_stats() {
        let stats = MaintenanceStats::default();
        stats.record(&RetentionSummary {
            partitions_deleted: 2,
            partitions_compressed: 3,
            bytes_freed: 1000,
            ..Default::default()
        });
        stats.record_failure();
        assert_eq!(stats.passes(), 1);
        assert_eq!(stats.failed_passes(), 1);
        assert_eq!(stats.partitions_deleted(), 2);
        assert_eq!(stats.partitions_compressed(), 3);
        assert_eq!(stats.bytes_freed(), 1000);
    }
}
