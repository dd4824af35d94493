//! Signal-processing core for atmos air-quality monitoring.
//!
//! This crate turns noisy, drift-prone raw readings from a metal-oxide
//! gas/climate sensor and a particulate sensor into stable, bounded
//! air-quality indices.
//!
//! # Features
//!
//! - **Fault tolerance**: missing or out-of-range channels are substituted
//!   with their last known good value and flagged, never propagated as errors
//! - **Compensation**: temperature/humidity correction of gas resistance
//! - **Adaptive baseline**: slow gated EMA with warm-up, persisted across
//!   restarts as an explicit [`BaselineState`] value
//! - **Smoothing**: bounded moving average with a documented reaction bound
//! - **Indices**: IAQ, VOC index, CO₂-equivalent estimate and PM2.5 AQI from
//!   documented breakpoint tables
//! - **Alerts**: threshold evaluation with episode onset tracking
//! - **Sources**: [`RawSampleSource`] abstraction with mock and simulated
//!   implementations
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use atmos_core::{CompensationConfig, IndexConfig, Pipeline, SmoothingConfig};
//! use atmos_types::RawReading;
//! use time::OffsetDateTime;
//!
//! let mut pipeline = Pipeline::new(
//!     CompensationConfig::default(),
//!     &SmoothingConfig::default(),
//!     IndexConfig::default(),
//!     Duration::from_secs(2),
//!     None,
//! )?;
//!
//! let reading = RawReading {
//!     gas_resistance_ohm: Some(48_000.0),
//!     temperature_c: Some(22.5),
//!     humidity_pct: Some(45.0),
//!     pressure_hpa: Some(1011.0),
//!     pm1_0: Some(1.0),
//!     pm2_5: Some(3.0),
//!     pm10: Some(4.0),
//!     ..RawReading::missing(OffsetDateTime::now_utc())
//! };
//!
//! let processed = pipeline.process(&reading);
//! assert!(processed.sample.iaq <= 500);
//! # Ok::<(), atmos_core::Error>(())
//! ```

pub mod alerts;
pub mod baseline;
pub mod compensation;
pub mod error;
pub mod indices;
pub mod mock;
pub mod pipeline;
pub mod simulated;
pub mod smoothing;
pub mod traits;
pub mod validation;

// Re-export the data model so callers need only one dependency.
pub use atmos_types::types;

pub use alerts::{Alert, AlertEvaluator, AlertReason, AlertThresholds};
pub use baseline::{BaselineState, LastKnownGood};
pub use compensation::{CompensatedSignal, CompensationConfig, CompensationEngine};
pub use error::{ConfigIssue, Error, Result};
pub use indices::{Breakpoints, ComfortBand, IndexCalculator, IndexConfig, IndexSet};
pub use mock::{MockSource, MockSourceBuilder, RecordingSink};
pub use pipeline::{Pipeline, Processed};
pub use simulated::{SimulatedSource, SimulationConfig};
pub use smoothing::{Smoother, SmoothingConfig};
pub use traits::{AlertSink, RawSampleSource};
pub use validation::{FaultKind, ReadingValidator, SensorFault, ValidatorConfig};
