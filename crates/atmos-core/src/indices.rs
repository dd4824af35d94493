//! Air-quality index calculation.
//!
//! # Gas indices
//!
//! The deviation of the fast gas average below the reference,
//! `d = clamp(1 − fast / reference, 0, 1)`, is mapped through piecewise-linear
//! tables. Clean air (`d = 0`) scores 0; higher deviation scores higher and
//! saturates at the last breakpoint.
//!
//! | d    | VOC index | gas IAQ |
//! |------|-----------|---------|
//! | 0.00 | 0         | 0       |
//! | 0.05 |           | 25      |
//! | 0.10 | 50        |         |
//! | 0.15 |           | 50      |
//! | 0.25 | 100       |         |
//! | 0.30 |           | 100     |
//! | 0.40 | 150       |         |
//! | 0.45 |           | 150     |
//! | 0.55 | 200       |         |
//! | 0.60 |           | 200     |
//! | 0.70 | 300       |         |
//! | 0.75 |           | 300     |
//! | 0.80 | 400       |         |
//! | 0.90 | 500       | 500     |
//!
//! # IAQ
//!
//! `IAQ = clamp(round(max(gas IAQ, PM2.5 AQI) + comfort penalty), 0, 500)`.
//! The comfort penalty adds 2 points per % RH above 70 and 2 points per °C
//! outside 18..26.
//!
//! # CO₂-equivalent
//!
//! `co2eq_ppm` is an **estimate** derived from the VOC index, not a measured
//! CO₂ concentration: VOC 0 → 400 ppm, 50 → 500, 100 → 650, 150 → 800,
//! 200 → 1000, 300 → 1500, 400 → 2000, 500 → 5000.
//!
//! # Precision
//!
//! Indices are whole numbers (rounded half away from zero). Temperature,
//! humidity, pressure and PM are rounded to 0.1; gas resistance to whole ohms.
//!
//! # Example
//!
//! ```
//! use atmos_core::indices::{IndexCalculator, deviation};
//!
//! let calc = IndexCalculator::default();
//! let d = deviation(10_000.0, 50_000.0);
//! assert_eq!(calc.voc_index(d), 400);
//! assert_eq!(calc.co2eq_ppm(400), 2000);
//! ```

use serde::{Deserialize, Serialize};

use atmos_types::INDEX_MAX;

use crate::compensation::CompensatedSignal;
use crate::error::ConfigIssue;

/// A monotonic piecewise-linear mapping.
///
/// Inputs below the first point map to the first output; inputs above the
/// last point saturate at the last output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Breakpoints(Vec<(f64, f64)>);

impl Breakpoints {
    /// Create a table from `(input, output)` points.
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self(points)
    }

    /// The `(input, output)` points.
    pub fn points(&self) -> &[(f64, f64)] {
        &self.0
    }

    /// Evaluate the mapping with linear interpolation.
    pub fn evaluate(&self, x: f64) -> f64 {
        let points = &self.0;
        let Some(&(x0, y0)) = points.first() else {
            return 0.0;
        };
        if x <= x0 {
            return y0;
        }
        for pair in points.windows(2) {
            let (xa, ya) = pair[0];
            let (xb, yb) = pair[1];
            if x <= xb {
                return ya + (x - xa) / (xb - xa) * (yb - ya);
            }
        }
        points.last().map_or(y0, |&(_, y)| y)
    }

    /// Check the table: non-empty, strictly increasing inputs, non-decreasing
    /// outputs, every value finite.
    pub fn validate(&self, field: &str) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.0.is_empty() {
            issues.push(ConfigIssue::new(field, "breakpoint table is empty"));
            return issues;
        }
        if self.0.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            issues.push(ConfigIssue::new(field, "breakpoints must be finite"));
        }
        for (i, pair) in self.0.windows(2).enumerate() {
            if pair[1].0 <= pair[0].0 {
                issues.push(ConfigIssue::new(
                    format!("{field}[{}]", i + 1),
                    "inputs must be strictly increasing",
                ));
            }
            if pair[1].1 < pair[0].1 {
                issues.push(ConfigIssue::new(
                    format!("{field}[{}]", i + 1),
                    "outputs must not decrease",
                ));
            }
        }
        issues
    }
}

/// Temperature and humidity band outside which IAQ is penalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComfortBand {
    /// Humidity above which the penalty applies (%).
    pub humidity_max_pct: f64,
    /// Temperature below which the penalty applies (°C).
    pub temperature_min_c: f64,
    /// Temperature above which the penalty applies (°C).
    pub temperature_max_c: f64,
    /// IAQ points per unit outside the band.
    pub points_per_unit: f64,
}

impl Default for ComfortBand {
    fn default() -> Self {
        Self {
            humidity_max_pct: 70.0,
            temperature_min_c: 18.0,
            temperature_max_c: 26.0,
            points_per_unit: 2.0,
        }
    }
}

impl ComfortBand {
    /// IAQ points added for the given climate.
    pub fn penalty(&self, temperature_c: f64, humidity_pct: f64) -> f64 {
        let humidity = (humidity_pct - self.humidity_max_pct).max(0.0);
        let cold = (self.temperature_min_c - temperature_c).max(0.0);
        let hot = (temperature_c - self.temperature_max_c).max(0.0);
        self.points_per_unit * (humidity + cold + hot)
    }
}

/// Index calculator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Deviation → VOC index.
    pub voc: Breakpoints,
    /// Deviation → gas component of IAQ.
    pub iaq: Breakpoints,
    /// VOC index → CO₂-equivalent ppm.
    pub co2eq: Breakpoints,
    /// Climate comfort penalty.
    pub comfort: ComfortBand,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            voc: Breakpoints::new(vec![
                (0.00, 0.0),
                (0.10, 50.0),
                (0.25, 100.0),
                (0.40, 150.0),
                (0.55, 200.0),
                (0.70, 300.0),
                (0.80, 400.0),
                (0.90, 500.0),
            ]),
            iaq: Breakpoints::new(vec![
                (0.00, 0.0),
                (0.05, 25.0),
                (0.15, 50.0),
                (0.30, 100.0),
                (0.45, 150.0),
                (0.60, 200.0),
                (0.75, 300.0),
                (0.90, 500.0),
            ]),
            co2eq: Breakpoints::new(vec![
                (0.0, 400.0),
                (50.0, 500.0),
                (100.0, 650.0),
                (150.0, 800.0),
                (200.0, 1000.0),
                (300.0, 1500.0),
                (400.0, 2000.0),
                (500.0, 5000.0),
            ]),
            comfort: ComfortBand::default(),
        }
    }
}

impl IndexConfig {
    /// Validate every table.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        issues.extend(self.voc.validate("voc"));
        issues.extend(self.iaq.validate("iaq"));
        issues.extend(self.co2eq.validate("co2eq"));
        if !(self.comfort.temperature_min_c <= self.comfort.temperature_max_c) {
            issues.push(ConfigIssue::new(
                "comfort.temperature_max_c",
                "must not be below comfort.temperature_min_c",
            ));
        }
        if !(self.comfort.points_per_unit >= 0.0) {
            issues.push(ConfigIssue::new(
                "comfort.points_per_unit",
                "must not be negative",
            ));
        }
        issues
    }
}

/// Indices computed for one compensated signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexSet {
    /// Indoor air quality index, 0-500.
    pub iaq: u16,
    /// VOC index, 0-500.
    pub voc_index: u16,
    /// Estimated CO₂-equivalent (ppm).
    pub co2eq_ppm: u16,
    /// US EPA AQI of PM2.5, 0-500.
    pub pm25_aqi: u16,
    /// PM1.0 (µg/m³), ≥ 0.
    pub pm1_0: f32,
    /// PM2.5 (µg/m³), ≥ 0.
    pub pm2_5: f32,
    /// PM10 (µg/m³), ≥ 0.
    pub pm10: f32,
}

/// Fractional deviation of `fast` below `reference`, clamped to `[0, 1]`.
pub fn deviation(fast_ohm: f64, reference_ohm: f64) -> f64 {
    if !(reference_ohm > 0.0) || !fast_ohm.is_finite() {
        return 0.0;
    }
    (1.0 - fast_ohm / reference_ohm).clamp(0.0, 1.0)
}

/// US EPA PM2.5 breakpoints: (C_lo, C_hi, I_lo, I_hi).
const PM25_BREAKPOINTS: [(f64, f64, f64, f64); 6] = [
    (0.0, 12.0, 0.0, 50.0),
    (12.1, 35.4, 51.0, 100.0),
    (35.5, 55.4, 101.0, 150.0),
    (55.5, 150.4, 151.0, 200.0),
    (150.5, 250.4, 201.0, 300.0),
    (250.5, 500.4, 301.0, 500.0),
];

/// US EPA AQI of a PM2.5 concentration in µg/m³.
///
/// The concentration is truncated to 0.1 µg/m³ first, as the EPA method
/// requires. Concentrations above the last breakpoint score 500.
///
/// ```
/// use atmos_core::indices::pm25_aqi;
///
/// assert_eq!(pm25_aqi(12.0), 50);
/// assert_eq!(pm25_aqi(35.49), 100);
/// assert_eq!(pm25_aqi(900.0), 500);
/// ```
pub fn pm25_aqi(concentration: f64) -> u16 {
    if !concentration.is_finite() || concentration <= 0.0 {
        return 0;
    }
    // Nudge before flooring so 35.4 (stored as 35.39999...) stays 35.4.
    let c = (concentration * 10.0 + 1e-9).floor() / 10.0;
    for &(c_lo, c_hi, i_lo, i_hi) in &PM25_BREAKPOINTS {
        if c <= c_hi + 1e-9 {
            let c = c.max(c_lo);
            let aqi = (i_hi - i_lo) / (c_hi - c_lo) * (c - c_lo) + i_lo;
            return to_index(aqi);
        }
    }
    INDEX_MAX
}

/// Converts compensated signals into bounded indices.
#[derive(Debug, Clone, Default)]
pub struct IndexCalculator {
    config: IndexConfig,
}

impl IndexCalculator {
    /// Create a calculator with the given tables.
    pub fn new(config: IndexConfig) -> Self {
        Self { config }
    }

    /// Get the calculator configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// VOC index for a deviation.
    pub fn voc_index(&self, deviation: f64) -> u16 {
        to_index(self.config.voc.evaluate(deviation))
    }

    /// Gas component of IAQ for a deviation, before the PM and comfort terms.
    pub fn gas_iaq(&self, deviation: f64) -> f64 {
        self.config.iaq.evaluate(deviation)
    }

    /// CO₂-equivalent estimate for a VOC index.
    pub fn co2eq_ppm(&self, voc_index: u16) -> u16 {
        let ppm = self.config.co2eq.evaluate(f64::from(voc_index)).round();
        ppm.clamp(0.0, f64::from(u16::MAX)) as u16
    }

    /// Compute every index for a signal.
    pub fn compute(&self, signal: &CompensatedSignal) -> IndexSet {
        let d = deviation(signal.fast_gas_ohm, signal.reference_ohm);
        let voc_index = self.voc_index(d);
        let pm25_aqi = pm25_aqi(signal.pm2_5);

        let penalty = self
            .config
            .comfort
            .penalty(signal.temperature_c, signal.humidity_pct);
        let iaq = to_index(self.gas_iaq(d).max(f64::from(pm25_aqi)) + penalty);

        IndexSet {
            iaq,
            voc_index,
            co2eq_ppm: self.co2eq_ppm(voc_index),
            pm25_aqi,
            pm1_0: round_tenth(signal.pm1_0.max(0.0)),
            pm2_5: round_tenth(signal.pm2_5.max(0.0)),
            pm10: round_tenth(signal.pm10.max(0.0)),
        }
    }
}

/// Round to a whole index and clamp to `0..=INDEX_MAX`.
pub(crate) fn to_index(value: f64) -> u16 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, f64::from(INDEX_MAX)) as u16
}

/// Round to one decimal place.
pub(crate) fn round_tenth(value: f64) -> f32 {
    ((value * 10.0).round() / 10.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn signal(fast: f64, reference: f64) -> CompensatedSignal {
        CompensatedSignal {
            timestamp: OffsetDateTime::UNIX_EPOCH,
            gas_resistance_ohm: fast,
            fast_gas_ohm: fast,
            reference_ohm: reference,
            correction_factor: 1.0,
            temperature_c: 25.0,
            humidity_pct: 40.0,
            pressure_hpa: 1013.25,
            pm1_0: 0.0,
            pm2_5: 0.0,
            pm10: 0.0,
            warming_up: false,
            faults: Vec::new(),
        }
    }

    #[test]
    fn test_default_tables_valid() {
        assert!(IndexConfig::default().validate().is_empty());
    }

    #[test]
    fn test_invalid_tables() {
        let config = IndexConfig {
            voc: Breakpoints::new(vec![]),
            iaq: Breakpoints::new(vec![(0.0, 0.0), (0.5, 100.0), (0.4, 200.0)]),
            co2eq: Breakpoints::new(vec![(0.0, 800.0), (100.0, 400.0)]),
            ..Default::default()
        };
        let issues = config.validate();
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0].field, "voc");
        assert_eq!(issues[1].field, "iaq[2]");
        assert_eq!(issues[2].field, "co2eq[1]");
    }

    #[test]
    fn test_breakpoints_interpolate_and_saturate() {
        let table = Breakpoints::new(vec![(0.0, 0.0), (1.0, 100.0), (2.0, 300.0)]);
        assert_eq!(table.evaluate(-5.0), 0.0);
        assert_eq!(table.evaluate(0.5), 50.0);
        assert_eq!(table.evaluate(1.5), 200.0);
        assert_eq!(table.evaluate(9.0), 300.0);
        assert_eq!(Breakpoints::new(vec![]).evaluate(1.0), 0.0);
    }

    #[test]
    fn test_deviation() {
        assert_eq!(deviation(50_000.0, 50_000.0), 0.0);
        assert_eq!(deviation(80_000.0, 50_000.0), 0.0);
        assert!((deviation(10_000.0, 50_000.0) - 0.8).abs() < 1e-12);
        assert_eq!(deviation(0.0, 50_000.0), 1.0);
        assert_eq!(deviation(10_000.0, 0.0), 0.0);
    }

    #[test]
    fn test_worked_example() {
        let calc = IndexCalculator::default();
        let indices = calc.compute(&signal(10_000.0, 50_000.0));
        assert_eq!(indices.voc_index, 400);
        assert_eq!(indices.iaq, 367);
        assert_eq!(indices.co2eq_ppm, 2000);
        assert_eq!(indices.pm25_aqi, 0);
    }

    #[test]
    fn test_clean_air() {
        let indices = IndexCalculator::default().compute(&signal(50_000.0, 50_000.0));
        assert_eq!(indices.iaq, 0);
        assert_eq!(indices.voc_index, 0);
        assert_eq!(indices.co2eq_ppm, 400);
    }

    #[test]
    fn test_saturates_at_500() {
        let indices = IndexCalculator::default().compute(&signal(1.0, 50_000.0));
        assert_eq!(indices.iaq, 500);
        assert_eq!(indices.voc_index, 500);
        assert_eq!(indices.co2eq_ppm, 5000);
    }

    #[test]
    fn test_pm25_aqi_breakpoints() {
        assert_eq!(pm25_aqi(0.0), 0);
        assert_eq!(pm25_aqi(-3.0), 0);
        assert_eq!(pm25_aqi(6.0), 25);
        assert_eq!(pm25_aqi(12.0), 50);
        assert_eq!(pm25_aqi(12.05), 50);
        assert_eq!(pm25_aqi(12.1), 51);
        assert_eq!(pm25_aqi(35.4), 100);
        assert_eq!(pm25_aqi(55.5), 151);
        assert_eq!(pm25_aqi(150.4), 200);
        assert_eq!(pm25_aqi(250.4), 300);
        assert_eq!(pm25_aqi(500.4), 500);
        assert_eq!(pm25_aqi(f64::NAN), 0);
    }

    #[test]
    fn test_pm_drives_iaq_when_worse() {
        let mut s = signal(50_000.0, 50_000.0);
        s.pm2_5 = 55.5;
        let indices = IndexCalculator::default().compute(&s);
        assert_eq!(indices.pm25_aqi, 151);
        assert_eq!(indices.iaq, 151);
        assert_eq!(indices.pm2_5, 55.5);
    }

    #[test]
    fn test_comfort_penalty() {
        let band = ComfortBand::default();
        assert_eq!(band.penalty(22.0, 50.0), 0.0);
        assert_eq!(band.penalty(22.0, 80.0), 20.0);
        assert_eq!(band.penalty(15.0, 50.0), 6.0);
        assert_eq!(band.penalty(30.0, 75.0), 18.0);

        let mut s = signal(50_000.0, 50_000.0);
        s.humidity_pct = 80.0;
        assert_eq!(IndexCalculator::default().compute(&s).iaq, 20);
    }

    #[test]
    fn test_pm_rounded_to_tenth() {
        let mut s = signal(50_000.0, 50_000.0);
        s.pm1_0 = 1.26;
        s.pm10 = 7.04;
        let indices = IndexCalculator::default().compute(&s);
        assert_eq!(indices.pm1_0, 1.3);
        assert_eq!(indices.pm10, 7.0);
    }

    #[test]
    fn test_co2eq_from_voc() {
        let calc = IndexCalculator::default();
        assert_eq!(calc.co2eq_ppm(0), 400);
        assert_eq!(calc.co2eq_ppm(75), 575);
        assert_eq!(calc.co2eq_ppm(250), 1250);
        assert_eq!(calc.co2eq_ppm(500), 5000);
    }

    #[test]
    fn test_breakpoints_toml_shape() {
        let json = serde_json::to_string(&Breakpoints::new(vec![(0.0, 1.0)])).unwrap();
        assert_eq!(json, "[[0.0,1.0]]");
    }
}
