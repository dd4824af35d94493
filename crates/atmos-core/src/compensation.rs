//! Temperature/humidity compensation and adaptive baseline tracking.
//!
//! The engine turns a [`RawReading`] into a [`CompensatedSignal`]:
//!
//! 1. Every channel is range-checked. Rejected channels are replaced by their
//!    last known good value (or a fixed default) and reported as faults.
//! 2. Gas resistance is multiplied by a clamped correction factor
//!    `(1 + kT·(T − Tref)) · (1 + kH·(H − Href))`.
//! 3. A short moving average of compensated gas (the fast average) tracks
//!    transient events.
//! 4. A slow exponential moving average (the baseline) tracks long-term drift.
//!    Deviations beyond `gate_sigma` standard deviations train it at a reduced
//!    rate so that a short event does not drag the reference.
//!
//! While warming up, the index reference is `default_baseline_ohm` and the
//! signal is flagged. Warm-up restarts on every process start and after a
//! gas-channel fault.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use atmos_types::{Channel, QualityFlag, RawReading};

use crate::baseline::BaselineState;
use crate::error::{ConfigIssue, Error, Result};
use crate::smoothing::{Smoother, SmoothingConfig};
use crate::validation::{ReadingValidator, SensorFault};

/// Pressure substituted when no good value was ever seen (hPa).
pub const STANDARD_PRESSURE_HPA: f64 = 1013.25;

/// Compensation engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompensationConfig {
    /// Warm-up duration after start or after a gas fault (seconds).
    pub warmup_secs: u64,
    /// Time constant of the slow baseline (seconds).
    pub baseline_time_constant_secs: u64,
    /// Temperature at which no correction is applied (°C).
    pub reference_temperature_c: f64,
    /// Humidity at which no correction is applied (%).
    pub reference_humidity_pct: f64,
    /// Relative correction per °C of deviation.
    pub temperature_coefficient: f64,
    /// Relative correction per % RH of deviation.
    pub humidity_coefficient: f64,
    /// Lower clamp of the correction factor.
    pub min_correction: f64,
    /// Upper clamp of the correction factor.
    pub max_correction: f64,
    /// Clean-air reference used while warming up (Ω).
    pub default_baseline_ohm: f64,
    /// Deviation, in standard deviations, above which training is slowed.
    pub gate_sigma: f64,
    /// Multiplier applied to the learning rate of gated updates.
    pub gate_factor: f64,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            warmup_secs: 300,
            baseline_time_constant_secs: 4 * 60 * 60,
            reference_temperature_c: 25.0,
            reference_humidity_pct: 40.0,
            temperature_coefficient: 0.005,
            humidity_coefficient: 0.01,
            min_correction: 0.6,
            max_correction: 1.6,
            default_baseline_ohm: 50_000.0,
            gate_sigma: 3.0,
            gate_factor: 0.1,
        }
    }
}

impl CompensationConfig {
    /// Validate the configuration and return every problem found.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.warmup_secs == 0 {
            issues.push(ConfigIssue::new("warmup_secs", "must be greater than 0"));
        }
        if self.baseline_time_constant_secs == 0 {
            issues.push(ConfigIssue::new(
                "baseline_time_constant_secs",
                "must be greater than 0",
            ));
        }
        if !(-40.0..=85.0).contains(&self.reference_temperature_c) {
            issues.push(ConfigIssue::new(
                "reference_temperature_c",
                format!("{} is outside -40..85", self.reference_temperature_c),
            ));
        }
        if !(0.0..=100.0).contains(&self.reference_humidity_pct) {
            issues.push(ConfigIssue::new(
                "reference_humidity_pct",
                format!("{} is outside 0..100", self.reference_humidity_pct),
            ));
        }
        for (field, value) in [
            ("temperature_coefficient", self.temperature_coefficient),
            ("humidity_coefficient", self.humidity_coefficient),
        ] {
            if !value.is_finite() {
                issues.push(ConfigIssue::new(field, "must be a finite number"));
            }
        }
        if !(self.min_correction > 0.0) {
            issues.push(ConfigIssue::new("min_correction", "must be greater than 0"));
        }
        if !(self.min_correction <= self.max_correction) {
            issues.push(ConfigIssue::new(
                "max_correction",
                format!(
                    "must not be below min_correction ({} < {})",
                    self.max_correction, self.min_correction
                ),
            ));
        }
        if !(self.default_baseline_ohm > 0.0) || !self.default_baseline_ohm.is_finite() {
            issues.push(ConfigIssue::new(
                "default_baseline_ohm",
                "must be a positive number",
            ));
        }
        if !(self.gate_sigma > 0.0) {
            issues.push(ConfigIssue::new("gate_sigma", "must be greater than 0"));
        }
        if !(self.gate_factor > 0.0 && self.gate_factor <= 1.0) {
            issues.push(ConfigIssue::new("gate_factor", "must be in (0, 1]"));
        }

        issues
    }
}

/// Gas resistance corrected for temperature and humidity, plus the other
/// channels after substitution. Derived per reading and never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CompensatedSignal {
    /// When the underlying reading was taken.
    pub timestamp: OffsetDateTime,
    /// Compensated gas resistance of this reading (Ω).
    pub gas_resistance_ohm: f64,
    /// Moving average of compensated gas resistance (Ω).
    pub fast_gas_ohm: f64,
    /// Clean-air reference for the index calculation (Ω).
    pub reference_ohm: f64,
    /// Correction factor applied to the raw gas resistance.
    pub correction_factor: f64,
    /// Temperature (°C).
    pub temperature_c: f64,
    /// Relative humidity (%).
    pub humidity_pct: f64,
    /// Pressure (hPa).
    pub pressure_hpa: f64,
    /// PM1.0 (µg/m³).
    pub pm1_0: f64,
    /// PM2.5 (µg/m³).
    pub pm2_5: f64,
    /// PM10 (µg/m³).
    pub pm10: f64,
    /// Whether the baseline was untrusted for this reading.
    pub warming_up: bool,
    /// Channels that were substituted.
    pub faults: Vec<SensorFault>,
}

impl CompensatedSignal {
    /// Quality of the signal: `Degraded` beats `WarmingUp` beats `Nominal`.
    pub fn quality(&self) -> QualityFlag {
        if !self.faults.is_empty() {
            QualityFlag::Degraded
        } else if self.warming_up {
            QualityFlag::WarmingUp
        } else {
            QualityFlag::Nominal
        }
    }
}

/// Turns raw readings into compensated signals while training the baseline.
#[derive(Debug, Clone)]
pub struct CompensationEngine {
    config: CompensationConfig,
    validator: ReadingValidator,
    fast: Smoother,
    alpha: f64,
    warmup_readings: u32,
    in_fault_run: bool,
}

impl CompensationEngine {
    /// Create an engine for the given polling interval.
    ///
    /// Returns [`Error::InvalidConfig`] if either configuration is invalid or
    /// the polling interval is zero.
    pub fn new(
        config: CompensationConfig,
        smoothing: &SmoothingConfig,
        poll_interval: Duration,
    ) -> Result<Self> {
        let mut issues = config.validate();
        issues.extend(smoothing.validate());
        if poll_interval.is_zero() {
            issues.push(ConfigIssue::new("poll_interval", "must be greater than 0"));
        }
        if !issues.is_empty() {
            return Err(Error::invalid_config(&issues));
        }

        let poll = poll_interval.as_secs_f64();
        let alpha = 1.0 - (-poll / config.baseline_time_constant_secs as f64).exp();
        let warmup_readings = ((config.warmup_secs as f64 / poll).ceil() as u32).max(1);

        Ok(Self {
            config,
            validator: ReadingValidator::default(),
            fast: Smoother::new(smoothing.window),
            alpha,
            warmup_readings,
            in_fault_run: false,
        })
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &CompensationConfig {
        &self.config
    }

    /// Per-reading learning rate of the slow baseline.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Length of a warm-up, in readings.
    pub fn warmup_readings(&self) -> u32 {
        self.warmup_readings
    }

    /// State for a first start with nothing persisted.
    pub fn initial_state(&self) -> BaselineState {
        BaselineState {
            warmup_remaining: self.warmup_readings,
            ..BaselineState::default()
        }
    }

    /// Prepare a persisted state for a new process run.
    ///
    /// The warm-up always restarts; an established baseline stays frozen
    /// until it ends.
    pub fn resume(&self, state: BaselineState) -> BaselineState {
        BaselineState {
            warmup_remaining: self.warmup_readings,
            ..state
        }
    }

    /// Correction factor for the given temperature and humidity.
    pub fn correction_factor(&self, temperature_c: f64, humidity_pct: f64) -> f64 {
        let c = &self.config;
        let t = 1.0 + c.temperature_coefficient * (temperature_c - c.reference_temperature_c);
        let h = 1.0 + c.humidity_coefficient * (humidity_pct - c.reference_humidity_pct);
        (t * h).clamp(c.min_correction, c.max_correction)
    }

    /// Compensate one reading and return the signal with the next state.
    ///
    /// This never fails: faulty channels are substituted and reported on the
    /// signal.
    pub fn compensate(
        &mut self,
        raw: &RawReading,
        state: BaselineState,
    ) -> (CompensatedSignal, BaselineState) {
        let checked = self.validator.validate(raw);
        self.log_faults(raw.timestamp, &checked.faults);

        let mut next = state;
        let c = &self.config;
        let last = &mut next.last_good;

        let raw_gas = resolve(
            checked.gas_resistance_ohm,
            &mut last.gas_resistance_ohm,
            c.default_baseline_ohm,
        );
        let temperature_c = resolve(
            checked.temperature_c,
            &mut last.temperature_c,
            c.reference_temperature_c,
        );
        let humidity_pct = resolve(
            checked.humidity_pct,
            &mut last.humidity_pct,
            c.reference_humidity_pct,
        );
        let pressure_hpa = resolve(
            checked.pressure_hpa,
            &mut last.pressure_hpa,
            STANDARD_PRESSURE_HPA,
        );
        let pm1_0 = resolve(checked.pm1_0, &mut last.pm1_0, 0.0);
        let pm2_5 = resolve(checked.pm2_5, &mut last.pm2_5, 0.0);
        let pm10 = resolve(checked.pm10, &mut last.pm10, 0.0);

        let correction_factor = self.correction_factor(temperature_c, humidity_pct);
        let compensated = raw_gas * correction_factor;
        let fast = self.fast.push(compensated);

        let gas_fault = checked.has_fault(Channel::GasResistance);
        if gas_fault {
            if next.warmup_remaining < self.warmup_readings {
                debug!("Gas channel fault, restarting warm-up");
            }
            next.warmup_remaining = self.warmup_readings;
        }

        let warming_up = next.is_warming_up();
        let reference_ohm = if warming_up {
            self.config.default_baseline_ohm
        } else {
            next.baseline_ohm.unwrap_or(self.config.default_baseline_ohm)
        };
        if !gas_fault {
            self.train(&mut next, compensated, fast, warming_up);
        }

        let signal = CompensatedSignal {
            timestamp: raw.timestamp,
            gas_resistance_ohm: compensated,
            fast_gas_ohm: fast,
            reference_ohm,
            correction_factor,
            temperature_c,
            humidity_pct,
            pressure_hpa,
            pm1_0,
            pm2_5,
            pm10,
            warming_up,
            faults: checked.faults,
        };
        (signal, next)
    }

    fn train(&self, state: &mut BaselineState, compensated: f64, fast: f64, warming_up: bool) {
        state.samples_seen += 1;

        if warming_up {
            state.warmup_remaining -= 1;
            if !state.established {
                state.baseline_ohm = Some(fast);
                if state.warmup_remaining == 0 {
                    state.established = true;
                    info!("Gas baseline established at {:.0} Ω", fast);
                }
            } else if state.warmup_remaining == 0 {
                debug!("Warm-up complete, resuming baseline training");
            }
            return;
        }

        let Some(baseline) = state.baseline_ohm else {
            state.baseline_ohm = Some(compensated);
            state.established = true;
            return;
        };

        let delta = compensated - baseline;
        let mut alpha = self.alpha;
        if state.variance > 0.0 && delta.abs() > self.config.gate_sigma * state.sigma() {
            alpha *= self.config.gate_factor;
        }
        state.baseline_ohm = Some(baseline + alpha * delta);
        state.variance = (1.0 - alpha) * (state.variance + alpha * delta * delta);
    }

    fn log_faults(&mut self, timestamp: OffsetDateTime, faults: &[SensorFault]) {
        if faults.is_empty() {
            if self.in_fault_run {
                info!("All sensor channels recovered at {}", timestamp);
                self.in_fault_run = false;
            }
            return;
        }

        for fault in faults {
            debug!("Sensor fault at {}: {}", timestamp, fault);
        }
        if !self.in_fault_run {
            warn!(
                "Sensor fault on {} channel(s) at {}, substituting last known values",
                faults.len(),
                timestamp
            );
            self.in_fault_run = true;
        }
    }
}

/// Accepted value, else the last known good value, else `fallback`.
fn resolve(accepted: Option<f32>, last: &mut Option<f32>, fallback: f64) -> f64 {
    match accepted {
        Some(v) => {
            *last = Some(v);
            f64::from(v)
        }
        None => last.map(f64::from).unwrap_or(fallback),
    }
}
