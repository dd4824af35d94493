//! Collector service for atmos air-quality sensors.
//!
//! This crate wires the signal pipeline to the sample store:
//! - Polls a [`RawSampleSource`](atmos_core::RawSampleSource) on a fixed
//!   interval and appends one sample per tick
//! - Persists the gas baseline so warm-up survives restarts
//! - Publishes every sample to in-process subscribers
//! - Raises alerts through pluggable sinks
//! - Runs retention passes in the background
//!
//! # Configuration
//!
//! The service reads `~/.config/atmos/atmosd.toml`; see [`config`] for the
//! available sections.
//!
//! # Shutdown
//!
//! Both tasks take a `CancellationToken`. The collector finishes the poll in
//! progress and saves the baseline; the maintainer stops at the next
//! partition boundary.

pub mod collector;
pub mod config;
pub mod maintenance;
pub mod sink;
pub mod state;

pub use collector::{Collector, CollectorError, PollOutcome};
pub use config::{
    Config, ConfigError, RetentionConfig, SamplingConfig, ShutdownConfig, StorageConfig,
    ValidationError,
};
pub use maintenance::{MaintenanceError, Maintainer};
pub use sink::TracingAlertSink;
pub use state::{AppState, CollectorSnapshot};
