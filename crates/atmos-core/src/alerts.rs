//! Alert thresholds and evaluation.
//!
//! An [`Alert`] is raised for every sample that is degraded or exceeds a
//! threshold. `onset` marks the first alerting sample after a quiet one, so
//! a sink can choose between notifying once per episode and on every sample.
//!
//! # Example
//!
//! ```
//! use atmos_core::alerts::{AlertEvaluator, AlertReason, AlertThresholds};
//! use atmos_types::{QualityFlag, Sample};
//! use time::OffsetDateTime;
//!
//! let mut evaluator = AlertEvaluator::new(AlertThresholds::default());
//! let sample = Sample {
//!     timestamp: OffsetDateTime::UNIX_EPOCH,
//!     iaq: 180,
//!     voc_index: 120,
//!     co2eq_ppm: 720,
//!     pm25_aqi: 40,
//!     pm1_0: 3.0,
//!     pm2_5: 9.6,
//!     pm10: 12.0,
//!     temperature_c: 22.0,
//!     humidity_pct: 40.0,
//!     pressure_hpa: 1012.0,
//!     gas_resistance_ohm: 31_000.0,
//!     quality: QualityFlag::Nominal,
//! };
//!
//! let alert = evaluator.evaluate(&sample).unwrap();
//! assert_eq!(alert.reasons, vec![AlertReason::IaqAbove { value: 180, threshold: 150 }]);
//! assert!(alert.onset);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use atmos_types::{INDEX_MAX, QualityFlag, Sample};

use crate::error::ConfigIssue;

/// Why a sample raised an alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum AlertReason {
    /// The sample was computed from substituted channels.
    Degraded,
    /// IAQ above threshold.
    IaqAbove { value: u16, threshold: u16 },
    /// VOC index above threshold.
    VocAbove { value: u16, threshold: u16 },
    /// CO₂-equivalent above threshold.
    Co2eqAbove { value: u16, threshold: u16 },
    /// PM2.5 above threshold.
    Pm25Above { value: f32, threshold: f32 },
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertReason::Degraded => write!(f, "sensor degraded"),
            AlertReason::IaqAbove { value, threshold } => {
                write!(f, "IAQ {} exceeds {}", value, threshold)
            }
            AlertReason::VocAbove { value, threshold } => {
                write!(f, "VOC index {} exceeds {}", value, threshold)
            }
            AlertReason::Co2eqAbove { value, threshold } => {
                write!(f, "CO2-eq {} ppm exceeds {} ppm", value, threshold)
            }
            AlertReason::Pm25Above { value, threshold } => {
                write!(f, "PM2.5 {} µg/m³ exceeds {} µg/m³", value, threshold)
            }
        }
    }
}

/// Alert thresholds. A value strictly above its threshold alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// IAQ threshold.
    pub iaq: u16,
    /// VOC index threshold.
    pub voc_index: u16,
    /// CO₂-equivalent threshold (ppm).
    pub co2eq_ppm: u16,
    /// PM2.5 threshold (µg/m³).
    pub pm2_5: f32,
    /// Alert on degraded samples.
    pub notify_degraded: bool,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            iaq: 150,
            voc_index: 250,
            co2eq_ppm: 2000,
            pm2_5: 100.0,
            notify_degraded: true,
        }
    }
}

impl AlertThresholds {
    /// Validate that every threshold lies within its index range.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.iaq > INDEX_MAX {
            issues.push(ConfigIssue::new(
                "iaq",
                format!("{} is outside 0..{INDEX_MAX}", self.iaq),
            ));
        }
        if self.voc_index > INDEX_MAX {
            issues.push(ConfigIssue::new(
                "voc_index",
                format!("{} is outside 0..{INDEX_MAX}", self.voc_index),
            ));
        }
        if self.co2eq_ppm < 400 {
            issues.push(ConfigIssue::new(
                "co2eq_ppm",
                format!("{} is below the 400 ppm floor", self.co2eq_ppm),
            ));
        }
        if !(self.pm2_5 > 0.0) || !self.pm2_5.is_finite() {
            issues.push(ConfigIssue::new("pm2_5", "must be a positive number"));
        }
        issues
    }

    /// Reasons the sample alerts, in a fixed order.
    pub fn reasons(&self, sample: &Sample) -> Vec<AlertReason> {
        let mut reasons = Vec::new();
        if self.notify_degraded && sample.quality == QualityFlag::Degraded {
            reasons.push(AlertReason::Degraded);
        }
        if sample.iaq > self.iaq {
            reasons.push(AlertReason::IaqAbove {
                value: sample.iaq,
                threshold: self.iaq,
            });
        }
        if sample.voc_index > self.voc_index {
            reasons.push(AlertReason::VocAbove {
                value: sample.voc_index,
                threshold: self.voc_index,
            });
        }
        if sample.co2eq_ppm > self.co2eq_ppm {
            reasons.push(AlertReason::Co2eqAbove {
                value: sample.co2eq_ppm,
                threshold: self.co2eq_ppm,
            });
        }
        if sample.pm2_5 > self.pm2_5 {
            reasons.push(AlertReason::Pm25Above {
                value: sample.pm2_5,
                threshold: self.pm2_5,
            });
        }
        reasons
    }
}

/// A notification about one appended sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// The sample that triggered the alert.
    pub sample: Sample,
    /// Every reason that applies.
    pub reasons: Vec<AlertReason>,
    /// `true` if the previous sample did not alert.
    pub onset: bool,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reasons = self
            .reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{} at {}", reasons, self.sample.timestamp)
    }
}

/// Tracks alert episodes across consecutive samples.
#[derive(Debug, Clone, Default)]
pub struct AlertEvaluator {
    thresholds: AlertThresholds,
    active: bool,
}

impl AlertEvaluator {
    /// Create an evaluator with the given thresholds.
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self {
            thresholds,
            active: false,
        }
    }

    /// Get the thresholds.
    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Whether the last evaluated sample alerted.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Evaluate a sample.
    pub fn evaluate(&mut self, sample: &Sample) -> Option<Alert> {
        let reasons = self.thresholds.reasons(sample);
        if reasons.is_empty() {
            self.active = false;
            return None;
        }
        let onset = !self.active;
        self.active = true;
        Some(Alert {
            sample: *sample,
            reasons,
            onset,
        })
    }
}
