//! The poll loop.
//!
//! Every tick the collector reads the sensors, turns the reading into a
//! sample, appends it, publishes it and raises alerts. A failing sensor or a
//! failing disk never stops the loop: a failed read becomes a reading with
//! every channel missing, and a failed append is logged and counted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use atmos_core::{
    AlertEvaluator, AlertSink, BaselineState, Pipeline, Processed, RawSampleSource,
};
use atmos_store::{Appended, Store, StoreError};
use atmos_types::{QualityFlag, RawReading, Sample};

use crate::state::AppState;

/// Collector errors.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to build the signal pipeline: {0}")]
    Pipeline(#[from] atmos_core::Error),
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// The computed sample.
    pub sample: Sample,
    /// Whether the sensor read itself failed.
    pub read_failed: bool,
    /// What the store did with the sample, or `None` if appending failed.
    pub appended: Option<Appended>,
}

/// Polls a [`RawSampleSource`] and feeds the store.
pub struct Collector {
    state: Arc<AppState>,
    source: Arc<dyn RawSampleSource>,
    store: Store,
    pipeline: Pipeline,
    alerts: AlertEvaluator,
    sinks: Vec<Arc<dyn AlertSink>>,
    baseline_path: PathBuf,
    save_every: u32,
    since_save: u32,
    poll_interval: Duration,
    read_timeout: Duration,
    last_timestamp: Option<OffsetDateTime>,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("source", &self.source.name())
            .field("store", &self.store.root())
            .field("sinks", &self.sinks.len())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl Collector {
    /// Create a collector writing to `store`.
    ///
    /// The baseline state saved by a previous run is restored if present and
    /// readable; otherwise the baseline is learned from scratch.
    pub fn new(
        state: Arc<AppState>,
        source: Arc<dyn RawSampleSource>,
        store: Store,
    ) -> Result<Self, CollectorError> {
        let config = &state.config;
        let baseline_path = config.storage.baseline_path();
        let restored = match BaselineState::load(&baseline_path) {
            Ok(Some(saved)) => {
                info!(
                    "Restored baseline from {} ({} samples seen)",
                    baseline_path.display(),
                    saved.samples_seen
                );
                Some(saved)
            }
            Ok(None) => {
                info!("No saved baseline, learning from scratch");
                None
            }
            Err(e) => {
                warn!(
                    "Ignoring unreadable baseline {}: {}",
                    baseline_path.display(),
                    e
                );
                None
            }
        };

        let pipeline = Pipeline::new(
            config.compensation.clone(),
            &config.smoothing,
            config.indices.clone(),
            config.sampling.poll_interval(),
            restored,
        )?;

        Ok(Self {
            alerts: AlertEvaluator::new(config.alerts.clone()),
            sinks: Vec::new(),
            save_every: config.storage.baseline_save_every.max(1),
            since_save: 0,
            poll_interval: config.sampling.poll_interval(),
            read_timeout: config.sampling.read_timeout(),
            last_timestamp: store.last_sample().map(|s| s.timestamp),
            baseline_path,
            pipeline,
            source,
            store,
            state,
        })
    }

    /// Register an alert sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Current baseline state.
    pub fn baseline(&self) -> &BaselineState {
        self.pipeline.state()
    }

    /// Poll until `cancel` fires, then save the baseline.
    ///
    /// A poll in progress is always completed, so cancellation never leaves
    /// a partial append behind.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Collecting from {} every {:?} into {}",
            self.source.name(),
            self.poll_interval,
            self.store.root().display()
        );
        self.state.collector.set_running(true);

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        self.save_baseline();
        self.state.collector.set_running(false);
        info!("Collector stopped");
    }

    /// Run one poll.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let (raw, read_failed) = self.read().await;
        let Processed { sample, faults } = self.pipeline.process(&raw);
        self.state
            .collector
            .record_reading(read_failed, sample.quality == QualityFlag::Degraded);
        if !faults.is_empty() {
            debug!("Sample at {} substituted {} channels", sample.timestamp, faults.len());
        }

        let appended = match self.store.append(&sample) {
            Ok(outcome) => {
                match outcome {
                    Appended::Written => self.state.collector.record_appended(),
                    Appended::Duplicate => self.state.collector.record_duplicate(),
                }
                self.last_timestamp = Some(sample.timestamp);
                self.state.publish(sample);
                self.notify(&sample);
                Some(outcome)
            }
            Err(e) => {
                self.state.collector.record_append_failure();
                match &e {
                    StoreError::OutOfOrder { .. } | StoreError::PartitionClosed { .. } => {
                        warn!("Dropping sample at {}: {}", sample.timestamp, e)
                    }
                    _ => warn!("Failed to store sample at {}: {}", sample.timestamp, e),
                }
                None
            }
        };

        self.since_save += 1;
        if self.since_save >= self.save_every {
            self.save_baseline();
        }

        PollOutcome {
            sample,
            read_failed,
            appended,
        }
    }

    async fn read(&mut self) -> (RawReading, bool) {
        match tokio::time::timeout(self.read_timeout, self.source.read()).await {
            Ok(Ok(reading)) => (reading, false),
            Ok(Err(e)) => {
                warn!("Read from {} failed: {}", self.source.name(), e);
                (RawReading::missing(self.substitute_timestamp()), true)
            }
            Err(_) => {
                warn!(
                    "Read from {} timed out after {:?}",
                    self.source.name(),
                    self.read_timeout
                );
                (RawReading::missing(self.substitute_timestamp()), true)
            }
        }
    }

    /// Timestamp for a reading the source failed to deliver: now, but never
    /// before the previous sample.
    fn substitute_timestamp(&self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        match self.last_timestamp {
            Some(last) if last >= now => last + self.poll_interval,
            _ => now,
        }
    }

    fn notify(&mut self, sample: &Sample) {
        let Some(alert) = self.alerts.evaluate(sample) else {
            return;
        };
        self.state.collector.record_alert();
        for sink in &self.sinks {
            sink.notify(&alert);
        }
    }

    fn save_baseline(&mut self) {
        self.since_save = 0;
        match self.pipeline.state().save(&self.baseline_path) {
            Ok(()) => {
                self.state.collector.record_baseline_save();
                debug!("Saved baseline to {}", self.baseline_path.display());
            }
            Err(e) => error!(
                "Failed to save baseline to {}: {}",
                self.baseline_path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use atmos_core::MockSource;
    use atmos_store::StoreOptions;

    fn setup(source: MockSource) -> (tempfile::TempDir, Collector) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.path = dir.path().to_path_buf();
        config.storage.baseline_save_every = 3;
        let state = AppState::new(config);
        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        let collector = Collector::new(state, Arc::new(source), store).unwrap();
        (dir, collector)
    }

    #[tokio::test]
    async fn test_poll_once_appends_and_publishes() {
        let (_dir, mut collector) = setup(MockSource::new());
        let mut rx = collector.state.subscribe();

        let outcome = collector.poll_once().await;
        assert!(!outcome.read_failed);
        assert_eq!(outcome.appended, Some(Appended::Written));
        assert_eq!(outcome.sample.quality, QualityFlag::WarmingUp);
        assert_eq!(rx.recv().await.unwrap(), outcome.sample);
        assert_eq!(collector.state.latest(), Some(outcome.sample));
    }

    #[tokio::test]
    async fn test_failed_read_becomes_degraded_sample() {
        let (_dir, mut collector) = setup(MockSource::builder().transient_failures(1).build());

        let outcome = collector.poll_once().await;
        assert!(outcome.read_failed);
        assert_eq!(outcome.sample.quality, QualityFlag::Degraded);
        assert_eq!(outcome.appended, Some(Appended::Written));
        assert_eq!(collector.state.collector.snapshot().read_failures, 1);
    }

    #[tokio::test]
    async fn test_baseline_saved_periodically() {
        let (dir, mut collector) = setup(MockSource::new());
        let path = dir.path().join("baseline.json");

        collector.poll_once().await;
        collector.poll_once().await;
        assert!(!path.exists());
        collector.poll_once().await;
        assert!(path.exists());

        let saved = BaselineState::load(&path).unwrap().unwrap();
        assert_eq!(&saved, collector.baseline());
    }

    #[test]
    fn test_substitute_timestamp_never_goes_back() {
        let (_dir, mut collector) = setup(MockSource::new());
        assert!(collector.substitute_timestamp() <= OffsetDateTime::now_utc());

        let future = OffsetDateTime::now_utc() + time::Duration::days(1);
        collector.last_timestamp = Some(future);
        assert_eq!(
            collector.substitute_timestamp(),
            future + collector.poll_interval
        );
    }
}
