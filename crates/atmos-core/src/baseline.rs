//! Adaptive gas-resistance baseline state and its persistence.
//!
//! [`BaselineState`] is a plain value threaded through
//! [`CompensationEngine::compensate`](crate::CompensationEngine::compensate).
//! It is saved as JSON so that a restart does not need a full recalibration.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Last accepted value of every channel, used for substitution after a fault.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LastKnownGood {
    /// Raw (uncompensated) gas resistance (Ω).
    pub gas_resistance_ohm: Option<f32>,
    /// Temperature (°C).
    pub temperature_c: Option<f32>,
    /// Relative humidity (%).
    pub humidity_pct: Option<f32>,
    /// Pressure (hPa).
    pub pressure_hpa: Option<f32>,
    /// PM1.0 (µg/m³).
    pub pm1_0: Option<f32>,
    /// PM2.5 (µg/m³).
    pub pm2_5: Option<f32>,
    /// PM10 (µg/m³).
    pub pm10: Option<f32>,
}

/// Exponentially weighted gas-resistance reference and warm-up progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineState {
    /// Slow moving reference of compensated gas resistance (Ω).
    pub baseline_ohm: Option<f64>,
    /// Exponentially weighted variance of the reference.
    pub variance: f64,
    /// Readings left before the baseline is trusted.
    pub warmup_remaining: u32,
    /// Whether the baseline completed at least one warm-up.
    pub established: bool,
    /// Number of gas readings that trained the baseline.
    pub samples_seen: u64,
    /// Last accepted channel values.
    pub last_good: LastKnownGood,
}

impl BaselineState {
    /// Returns `true` while the baseline is not trusted.
    pub fn is_warming_up(&self) -> bool {
        self.warmup_remaining > 0
    }

    /// Standard deviation of the reference.
    pub fn sigma(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    /// Load a persisted state.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state = serde_json::from_slice(&content)?;
        debug!("Loaded baseline state from {}", path.display());
        Ok(Some(state))
    }

    /// Persist the state.
    ///
    /// The file is written to a temporary sibling and renamed over the
    /// destination, so a crash never leaves a half-written state behind.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = Path::new(&tmp_name);

        let content = serde_json::to_vec_pretty(self)?;
        let mut file = fs::File::create(tmp)?;
        file.write_all(&content)?;
        file.sync_all()?;
        fs::rename(tmp, path)?;

        debug!(
            "Saved baseline state to {} ({} samples seen)",
            path.display(),
            self.samples_seen
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn trained() -> BaselineState {
        BaselineState {
            baseline_ohm: Some(48_250.5),
            variance: 1_250.0,
            warmup_remaining: 0,
            established: true,
            samples_seen: 9_001,
            last_good: LastKnownGood {
                humidity_pct: Some(44.0),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_default_not_established() {
        let state = BaselineState::default();
        assert_eq!(state.baseline_ohm, None);
        assert!(!state.established);
        assert!(!state.is_warming_up());
    }

    #[test]
    fn test_sigma() {
        assert_eq!(trained().sigma(), 1_250f64.sqrt());
        let negative = BaselineState {
            variance: -1.0,
            ..Default::default()
        };
        assert_eq!(negative.sigma(), 0.0);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let loaded = BaselineState::load(dir.path().join("none.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("baseline.json");

        trained().save(&path).unwrap();
        let loaded = BaselineState::load(&path).unwrap().unwrap();
        assert_eq!(loaded, trained());
        assert!(!dir.path().join("nested").join("baseline.json.tmp").exists());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("baseline.json");
        fs::write(&path, b"{\"baseline_ohm\": ").unwrap();

        let err = BaselineState::load(&path).unwrap_err();
        assert!(matches!(err, crate::Error::Serialization(_)));
    }

    #[test]
    fn test_load_partial_fields_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("baseline.json");
        fs::write(&path, br#"{"baseline_ohm": 51000.0, "established": true}"#).unwrap();

        let loaded = BaselineState::load(&path).unwrap().unwrap();
        assert_eq!(loaded.baseline_ohm, Some(51_000.0));
        assert_eq!(loaded.samples_seen, 0);
        assert_eq!(loaded.last_good, LastKnownGood::default());
    }
}
