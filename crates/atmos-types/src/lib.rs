//! Platform-agnostic types for atmos air-quality monitoring.
//!
//! This crate provides the data model shared by the signal-processing core
//! (atmos-core), the sample store (atmos-store) and anything consuming the
//! stored history.
//!
//! # Features
//!
//! - [`RawReading`]: one poll of the gas/climate and particulate sensors, every
//!   channel optional to model partial failures
//! - [`Sample`]: the computed, bounded, immutable unit of record
//! - [`QualityFlag`] and [`IaqLevel`] categorizations
//!
//! # Example
//!
//! ```
//! use atmos_types::{Channel, RawReading};
//! use time::OffsetDateTime;
//!
//! let reading = RawReading {
//!     gas_resistance_ohm: Some(48_000.0),
//!     ..RawReading::missing(OffsetDateTime::now_utc())
//! };
//! assert_eq!(reading.channel(Channel::Humidity), None);
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{Channel, INDEX_MAX, IaqLevel, QualityFlag, RawReading, Sample};
