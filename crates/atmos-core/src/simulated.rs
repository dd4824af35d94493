//! Simulated sensor for running the service without hardware.
//!
//! Every channel follows a bounded random walk. Occasionally a channel is
//! dropped or a short pollution event pulls the gas resistance down, so
//! the degraded and alert paths get exercised too.

use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use time::OffsetDateTime;

use atmos_types::RawReading;

use crate::error::{Error, Result};
use crate::traits::RawSampleSource;

/// Tuning for [`SimulatedSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Seed of the random generator; equal seeds give equal sequences.
    pub seed: u64,
    /// Probability that a single channel is missing from a reading.
    pub drop_probability: f64,
    /// Probability that a pollution event starts on a reading.
    pub event_probability: f64,
    /// Clean-air gas resistance the walk is pulled toward (Ω).
    pub clean_air_ohm: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            drop_probability: 0.002,
            event_probability: 0.001,
            clean_air_ohm: 50_000.0,
        }
    }
}

#[derive(Debug)]
struct Walk {
    rng: StdRng,
    gas: f64,
    temperature: f64,
    humidity: f64,
    pressure: f64,
    pm2_5: f64,
    event_remaining: u32,
}

/// A [`RawSampleSource`] producing plausible indoor readings.
#[derive(Debug)]
pub struct SimulatedSource {
    config: SimulationConfig,
    walk: Mutex<Walk>,
}

impl SimulatedSource {
    /// Create a simulator.
    pub fn new(config: SimulationConfig) -> Self {
        let walk = Walk {
            rng: StdRng::seed_from_u64(config.seed),
            gas: config.clean_air_ohm,
            temperature: 22.0,
            humidity: 45.0,
            pressure: 1013.0,
            pm2_5: 4.0,
            event_remaining: 0,
        };
        Self {
            config,
            walk: Mutex::new(walk),
        }
    }

    /// Produce the next reading for the given timestamp.
    pub fn next_reading(&self, timestamp: OffsetDateTime) -> Result<RawReading> {
        let mut guard = self
            .walk
            .lock()
            .map_err(|_| Error::SensorUnavailable("simulator state poisoned".to_string()))?;
        let walk = &mut *guard;
        let c = &self.config;

        if walk.event_remaining == 0 && walk.rng.random::<f64>() < c.event_probability {
            walk.event_remaining = walk.rng.random_range(30..150);
        }
        let target = if walk.event_remaining > 0 {
            walk.event_remaining -= 1;
            c.clean_air_ohm * 0.3
        } else {
            c.clean_air_ohm
        };

        let noise = walk.rng.random_range(-0.01..0.01);
        walk.gas += (target - walk.gas) * 0.05 + walk.gas * noise;
        walk.gas = walk.gas.max(1_000.0);

        let dt = walk.rng.random_range(-0.05..0.05);
        walk.temperature = (walk.temperature + dt).clamp(15.0, 30.0);
        let dh = walk.rng.random_range(-0.2..0.2);
        walk.humidity = (walk.humidity + dh).clamp(20.0, 80.0);
        let dp = walk.rng.random_range(-0.05..0.05);
        walk.pressure = (walk.pressure + dp).clamp(980.0, 1040.0);
        let dpm = walk.rng.random_range(-0.3..0.3);
        walk.pm2_5 = (walk.pm2_5 + dpm).clamp(0.0, 60.0);

        let values = [
            walk.gas as f32,
            walk.temperature as f32,
            walk.humidity as f32,
            walk.pressure as f32,
            (walk.pm2_5 * 0.6) as f32,
            walk.pm2_5 as f32,
            (walk.pm2_5 * 1.4) as f32,
        ];
        let mut channels = [None; 7];
        for (slot, value) in channels.iter_mut().zip(values) {
            if walk.rng.random::<f64>() >= c.drop_probability {
                *slot = Some(value);
            }
        }
        let [gas, temperature, humidity, pressure, pm1_0, pm2_5, pm10] = channels;

        Ok(RawReading {
            timestamp,
            gas_resistance_ohm: gas,
            temperature_c: temperature,
            humidity_pct: humidity,
            pressure_hpa: pressure,
            pm1_0,
            pm2_5,
            pm10,
        })
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

#[async_trait]
impl RawSampleSource for SimulatedSource {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn read(&self) -> Result<RawReading> {
        self.next_reading(OffsetDateTime::now_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ReadingValidator;

    #[test]
    fn test_same_seed_same_sequence() {
        let a = SimulatedSource::default();
        let b = SimulatedSource::default();
        for _ in 0..100 {
            let ts = OffsetDateTime::UNIX_EPOCH;
            assert_eq!(a.next_reading(ts).unwrap(), b.next_reading(ts).unwrap());
        }
    }

    #[test]
    fn test_readings_in_range_without_drops() {
        let sim = SimulatedSource::new(SimulationConfig {
            drop_probability: 0.0,
            event_probability: 0.05,
            ..Default::default()
        });
        let validator = ReadingValidator::default();
        for _ in 0..2_000 {
            let reading = sim.next_reading(OffsetDateTime::UNIX_EPOCH).unwrap();
            assert!(validator.validate(&reading).is_clean());
        }
    }

    #[test]
    fn test_drops_channels() {
        let sim = SimulatedSource::new(SimulationConfig {
            drop_probability: 1.0,
            ..Default::default()
        });
        assert!(sim.next_reading(OffsetDateTime::UNIX_EPOCH).unwrap().is_empty());
    }
}
