//! Raw reading to [`Sample`] processing.
//!
//! [`Pipeline`] owns the compensation engine, the index calculator and the
//! current [`BaselineState`], and produces one immutable sample per reading.

use std::time::Duration;

use atmos_types::{RawReading, Sample};

use crate::baseline::BaselineState;
use crate::compensation::{CompensatedSignal, CompensationConfig, CompensationEngine};
use crate::error::Result;
use crate::indices::{IndexCalculator, IndexConfig, round_tenth};
use crate::smoothing::SmoothingConfig;
use crate::validation::SensorFault;

/// Output of processing one reading.
#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    /// The computed sample.
    pub sample: Sample,
    /// Channels that were substituted for this sample.
    pub faults: Vec<SensorFault>,
}

/// The signal-processing chain: compensate, smooth, score.
#[derive(Debug, Clone)]
pub struct Pipeline {
    engine: CompensationEngine,
    calculator: IndexCalculator,
    state: BaselineState,
}

impl Pipeline {
    /// Build a pipeline.
    ///
    /// A `restored` state is resumed (its warm-up restarts); without one the
    /// baseline is learned from scratch.
    pub fn new(
        compensation: CompensationConfig,
        smoothing: &SmoothingConfig,
        indices: IndexConfig,
        poll_interval: Duration,
        restored: Option<BaselineState>,
    ) -> Result<Self> {
        let issues = indices.validate();
        if !issues.is_empty() {
            return Err(crate::Error::invalid_config(&issues));
        }
        let engine = CompensationEngine::new(compensation, smoothing, poll_interval)?;
        let state = match restored {
            Some(state) => engine.resume(state),
            None => engine.initial_state(),
        };
        Ok(Self {
            engine,
            calculator: IndexCalculator::new(indices),
            state,
        })
    }

    /// Current baseline state.
    pub fn state(&self) -> &BaselineState {
        &self.state
    }

    /// Consume the pipeline and return its baseline state.
    pub fn into_state(self) -> BaselineState {
        self.state
    }

    /// The compensation engine.
    pub fn engine(&self) -> &CompensationEngine {
        &self.engine
    }

    /// The index calculator.
    pub fn calculator(&self) -> &IndexCalculator {
        &self.calculator
    }

    /// Process one reading. Never fails.
    pub fn process(&mut self, raw: &RawReading) -> Processed {
        let state = std::mem::take(&mut self.state);
        let (signal, next) = self.engine.compensate(raw, state);
        self.state = next;

        let sample = self.to_sample(&signal);
        Processed {
            sample,
            faults: signal.faults,
        }
    }

    fn to_sample(&self, signal: &CompensatedSignal) -> Sample {
        let indices = self.calculator.compute(signal);
        Sample {
            timestamp: signal.timestamp,
            iaq: indices.iaq,
            voc_index: indices.voc_index,
            co2eq_ppm: indices.co2eq_ppm,
            pm25_aqi: indices.pm25_aqi,
            pm1_0: indices.pm1_0,
            pm2_5: indices.pm2_5,
            pm10: indices.pm10,
            temperature_c: round_tenth(signal.temperature_c),
            humidity_pct: round_tenth(signal.humidity_pct.clamp(0.0, 100.0)),
            pressure_hpa: round_tenth(signal.pressure_hpa),
            gas_resistance_ohm: signal.gas_resistance_ohm.round() as f32,
            quality: signal.quality(),
        }
    }
}
