//! Periodic retention passes.

use std::sync::Arc;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use atmos_store::{RetentionMaintainer, RetentionPolicy, RetentionSummary, StoreError};

use crate::state::AppState;

/// Maintenance errors.
#[derive(Debug, thiserror::Error)]
pub enum MaintenanceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Retention pass panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs the retention maintainer on a schedule, off the async runtime.
#[derive(Debug)]
pub struct Maintainer {
    state: Arc<AppState>,
    maintainer: RetentionMaintainer,
    policy: RetentionPolicy,
}

impl Maintainer {
    pub fn new(state: Arc<AppState>) -> Self {
        let maintainer =
            RetentionMaintainer::new(&state.config.storage.path, state.config.storage.utc_offset());
        let policy = state.config.retention.policy();
        Self {
            state,
            maintainer,
            policy,
        }
    }

    /// Run a pass now and then every configured interval until `cancel`
    /// fires. A pass in progress stops at the next partition boundary.
    pub async fn run(self, cancel: CancellationToken) {
        let period = self.state.config.retention.interval();
        info!(
            "Retention every {:?} (max age {:?} days, max size {:?} bytes)",
            period, self.policy.max_age_days, self.policy.max_total_bytes
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_pass(&cancel).await {
                        error!("Retention pass failed: {}", e);
                    }
                }
            }
        }
        debug!("Maintainer stopped");
    }

    /// Run one pass on the blocking pool and record its outcome.
    pub async fn run_pass(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RetentionSummary, MaintenanceError> {
        let maintainer = self.maintainer.clone();
        let policy = self.policy;
        let token = cancel.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let today = maintainer.today();
            maintainer.enforce_with(&policy, today, || token.is_cancelled())
        })
        .await
        .map_err(MaintenanceError::from)
        .and_then(|r| r.map_err(MaintenanceError::from));

        match &outcome {
            Ok(summary) => {
                self.state.maintenance.record(summary);
                if summary.failures > 0 {
                    warn!("Retention pass skipped {} failed operations", summary.failures);
                }
            }
            Err(_) => self.state.maintenance.record_failure(),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use atmos_store::{Store, StoreOptions, compressed_path};
    use atmos_types::{QualityFlag, Sample};
    use time::macros::{date, datetime};

    fn sample() -> Sample {
        Sample {
            timestamp: datetime!(2020-01-01 12:00 UTC),
            iaq: 50,
            voc_index: 30,
            co2eq_ppm: 550,
            pm25_aqi: 10,
            pm1_0: 1.0,
            pm2_5: 2.5,
            pm10: 3.0,
            temperature_c: 21.5,
            humidity_pct: 41.0,
            pressure_hpa: 1012.0,
            gas_resistance_ohm: 52_000.0,
            quality: QualityFlag::Nominal,
        }
    }

    fn state(dir: &tempfile::TempDir) -> Arc<AppState> {
        let mut config = Config::default();
        config.storage.path = dir.path().to_path_buf();
        config.retention.max_age_days = None;
        config.retention.max_total_bytes = Some(1 << 30);
        AppState::new(config)
    }

    #[tokio::test]
    async fn test_pass_compresses_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        store.append(&sample()).unwrap();
        drop(store);

        let state = state(&dir);
        let maintainer = Maintainer::new(Arc::clone(&state));
        let summary = maintainer
            .run_pass(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.partitions_compressed, 1);
        assert!(compressed_path(dir.path(), date!(2020 - 01 - 01)).exists());
        assert_eq!(state.maintenance.passes(), 1);
        assert_eq!(state.maintenance.partitions_compressed(), 1);
        assert_eq!(state.reader().latest().unwrap(), Some(sample()));
    }

    #[tokio::test]
    async fn test_cancelled_pass_does_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        store.append(&sample()).unwrap();
        drop(store);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let maintainer = Maintainer::new(state(&dir));
        let summary = maintainer.run_pass(&cancel).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.partitions_compressed, 0);
    }

    #[tokio::test]
    async fn test_run_exits_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Maintainer::new(Arc::clone(&state)).run(cancel.clone()));
        cancel.cancel();
        handle.await.unwrap();
    }
}
