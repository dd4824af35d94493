//! Range checking for raw sensor channels.
//!
//! A channel that is missing, not finite or outside its physical range is a
//! [`SensorFault`]. Faults never fail the pipeline; the compensation engine
//! substitutes the last known good value and flags the sample as degraded.
//!
//! # Example
//!
//! ```
//! use atmos_core::validation::ReadingValidator;
//! use atmos_types::{Channel, RawReading};
//! use time::OffsetDateTime;
//!
//! let validator = ReadingValidator::default();
//! let reading = RawReading {
//!     gas_resistance_ohm: Some(-12.0),
//!     temperature_c: Some(22.0),
//!     humidity_pct: Some(140.0),
//!     ..RawReading::missing(OffsetDateTime::UNIX_EPOCH)
//! };
//!
//! let checked = validator.validate(&reading);
//! assert!(checked.has_fault(Channel::GasResistance));
//! assert!(checked.has_fault(Channel::Humidity));
//! assert!(!checked.has_fault(Channel::Temperature));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use atmos_types::{Channel, RawReading};

/// Why a channel was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum FaultKind {
    /// The sensor returned no value.
    Missing,
    /// The value is NaN or infinite.
    NotFinite,
    /// The value is outside the physical range of the channel.
    OutOfRange { value: f32, min: f32, max: f32 },
}

/// A rejected channel on a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorFault {
    /// The channel that was rejected.
    pub channel: Channel,
    /// Why it was rejected.
    pub kind: FaultKind,
}

impl fmt::Display for SensorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FaultKind::Missing => write!(f, "{} is missing", self.channel),
            FaultKind::NotFinite => write!(f, "{} is not a finite number", self.channel),
            FaultKind::OutOfRange { value, min, max } => {
                let unit = self.channel.unit();
                write!(
                    f,
                    "{} {}{} is outside {}{}..{}{}",
                    self.channel, value, unit, min, unit, max, unit
                )
            }
        }
    }
}

/// Accepted physical ranges per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorConfig {
    /// Minimum plausible temperature (°C).
    pub temperature_min: f32,
    /// Maximum plausible temperature (°C).
    pub temperature_max: f32,
    /// Minimum plausible pressure (hPa).
    pub pressure_min: f32,
    /// Maximum plausible pressure (hPa).
    pub pressure_max: f32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            // Operating range of common MOX gas/climate sensors.
            temperature_min: -40.0,
            temperature_max: 85.0,
            pressure_min: 300.0,
            pressure_max: 1100.0,
        }
    }
}

/// Result of validating a reading: the accepted values and the faults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckedReading {
    /// Accepted gas resistance (Ω).
    pub gas_resistance_ohm: Option<f32>,
    /// Accepted temperature (°C).
    pub temperature_c: Option<f32>,
    /// Accepted relative humidity (%).
    pub humidity_pct: Option<f32>,
    /// Accepted pressure (hPa).
    pub pressure_hpa: Option<f32>,
    /// Accepted PM1.0, clamped to ≥ 0.
    pub pm1_0: Option<f32>,
    /// Accepted PM2.5, clamped to ≥ 0.
    pub pm2_5: Option<f32>,
    /// Accepted PM10, clamped to ≥ 0.
    pub pm10: Option<f32>,
    /// Rejected channels.
    pub faults: Vec<SensorFault>,
}

impl CheckedReading {
    /// Returns `true` if the given channel was rejected.
    pub fn has_fault(&self, channel: Channel) -> bool {
        self.faults.iter().any(|f| f.channel == channel)
    }

    /// Returns `true` if every channel was accepted.
    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

/// Validates raw readings against [`ValidatorConfig`].
#[derive(Debug, Clone, Default)]
pub struct ReadingValidator {
    config: ValidatorConfig,
}

impl ReadingValidator {
    /// Create a validator with the given ranges.
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Get the validator configuration.
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Check every channel of a reading.
    pub fn validate(&self, reading: &RawReading) -> CheckedReading {
        let mut faults = Vec::new();
        let c = &self.config;

        let mut accept = |channel: Channel, check: fn(f32, &ValidatorConfig) -> Option<FaultKind>| {
            match reading.channel(channel) {
                None => {
                    faults.push(SensorFault {
                        channel,
                        kind: FaultKind::Missing,
                    });
                    None
                }
                Some(v) if !v.is_finite() => {
                    faults.push(SensorFault {
                        channel,
                        kind: FaultKind::NotFinite,
                    });
                    None
                }
                Some(v) => match check(v, c) {
                    Some(kind) => {
                        faults.push(SensorFault { channel, kind });
                        None
                    }
                    None => Some(v),
                },
            }
        };

        let gas_resistance_ohm = accept(Channel::GasResistance, |v, _| {
            (v <= 0.0).then_some(FaultKind::OutOfRange {
                value: v,
                min: 0.0,
                max: f32::MAX,
            })
        });
        let temperature_c = accept(Channel::Temperature, |v, c| {
            out_of_range(v, c.temperature_min, c.temperature_max)
        });
        let humidity_pct = accept(Channel::Humidity, |v, _| out_of_range(v, 0.0, 100.0));
        let pressure_hpa = accept(Channel::Pressure, |v, c| {
            out_of_range(v, c.pressure_min, c.pressure_max)
        });
        // Negative particulate counts are sensor noise around zero, not a fault.
        let pm1_0 = accept(Channel::Pm1_0, |_, _| None).map(|v| v.max(0.0));
        let pm2_5 = accept(Channel::Pm2_5, |_, _| None).map(|v| v.max(0.0));
        let pm10 = accept(Channel::Pm10, |_, _| None).map(|v| v.max(0.0));

        CheckedReading {
            gas_resistance_ohm,
            temperature_c,
            humidity_pct,
            pressure_hpa,
            pm1_0,
            pm2_5,
            pm10,
            faults,
        }
    }
}

fn out_of_range(value: f32, min: f32, max: f32) -> Option<FaultKind> {
    if value < min || value > max {
        Some(FaultKind::OutOfRange { value, min, max })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn good_reading() -> RawReading {
        RawReading {
            timestamp: OffsetDateTime::UNIX_EPOCH,
            gas_resistance_ohm: Some(50_000.0),
            temperature_c: Some(22.5),
            humidity_pct: Some(45.0),
            pressure_hpa: Some(1013.0),
            pm1_0: Some(1.0),
            pm2_5: Some(3.0),
            pm10: Some(5.0),
        }
    }

    #[test]
    fn test_clean_reading() {
        let checked = ReadingValidator::default().validate(&good_reading());
        assert!(checked.is_clean());
        assert_eq!(checked.gas_resistance_ohm, Some(50_000.0));
        assert_eq!(checked.pm10, Some(5.0));
    }

    #[test]
    fn test_missing_reading_faults_every_channel() {
        let checked =
            ReadingValidator::default().validate(&RawReading::missing(OffsetDateTime::UNIX_EPOCH));
        assert_eq!(checked.faults.len(), Channel::ALL.len());
        assert!(
            checked
                .faults
                .iter()
                .all(|f| matches!(f.kind, FaultKind::Missing))
        );
    }

    #[test]
    fn test_negative_resistance_is_fault() {
        let reading = RawReading {
            gas_resistance_ohm: Some(-1.0),
            ..good_reading()
        };
        let checked = ReadingValidator::default().validate(&reading);
        assert!(checked.has_fault(Channel::GasResistance));
        assert_eq!(checked.gas_resistance_ohm, None);
    }

    #[test]
    fn test_zero_resistance_is_fault() {
        let reading = RawReading {
            gas_resistance_ohm: Some(0.0),
            ..good_reading()
        };
        assert!(
            ReadingValidator::default()
                .validate(&reading)
                .has_fault(Channel::GasResistance)
        );
    }

    #[test]
    fn test_humidity_out_of_range() {
        for bad in [-0.5, 100.5] {
            let reading = RawReading {
                humidity_pct: Some(bad),
                ..good_reading()
            };
            let checked = ReadingValidator::default().validate(&reading);
            assert_eq!(checked.faults.len(), 1);
            assert_eq!(
                checked.faults[0].kind,
                FaultKind::OutOfRange {
                    value: bad,
                    min: 0.0,
                    max: 100.0
                }
            );
        }
    }

    #[test]
    fn test_humidity_bounds_inclusive() {
        for edge in [0.0, 100.0] {
            let reading = RawReading {
                humidity_pct: Some(edge),
                ..good_reading()
            };
            assert!(ReadingValidator::default().validate(&reading).is_clean());
        }
    }

    #[test]
    fn test_nan_is_fault() {
        let reading = RawReading {
            temperature_c: Some(f32::NAN),
            ..good_reading()
        };
        let checked = ReadingValidator::default().validate(&reading);
        assert_eq!(checked.faults[0].kind, FaultKind::NotFinite);
    }

    #[test]
    fn test_negative_pm_clamped_not_fault() {
        let reading = RawReading {
            pm2_5: Some(-0.4),
            ..good_reading()
        };
        let checked = ReadingValidator::default().validate(&reading);
        assert!(checked.is_clean());
        assert_eq!(checked.pm2_5, Some(0.0));
    }

    #[test]
    fn test_custom_pressure_range() {
        let validator = ReadingValidator::new(ValidatorConfig {
            pressure_min: 950.0,
            ..ValidatorConfig::default()
        });
        let reading = RawReading {
            pressure_hpa: Some(900.0),
            ..good_reading()
        };
        assert!(validator.validate(&reading).has_fault(Channel::Pressure));
    }

    #[test]
    fn test_fault_display() {
        let fault = SensorFault {
            channel: Channel::Humidity,
            kind: FaultKind::OutOfRange {
                value: 120.0,
                min: 0.0,
                max: 100.0,
            },
        };
        assert_eq!(fault.to_string(), "humidity 120% is outside 0%..100%");

        let missing = SensorFault {
            channel: Channel::Pm2_5,
            kind: FaultKind::Missing,
        };
        assert_eq!(missing.to_string(), "PM2.5 is missing");
    }
}
