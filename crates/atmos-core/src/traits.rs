//! Capability traits for the collaborators of the signal core.
//!
//! The poll loop depends on these abstractly, so hardware drivers, the
//! simulator and test mocks are interchangeable.

use async_trait::async_trait;

use atmos_types::RawReading;

use crate::alerts::Alert;
use crate::error::Result;

/// A source of raw sensor readings.
///
/// # Example
///
/// ```ignore
/// use atmos_core::{RawSampleSource, Result};
///
/// async fn print_gas<S: RawSampleSource>(source: &S) -> Result<()> {
///     let reading = source.read().await?;
///     println!("gas: {:?} Ω", reading.gas_resistance_ohm);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait RawSampleSource: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Poll the sensors once.
    ///
    /// Individual channels may be missing. An `Err` means the whole poll
    /// failed; callers treat it like a reading with every channel missing.
    async fn read(&self) -> Result<RawReading>;
}

/// Receives alerts for appended samples.
///
/// Delivery and formatting are the sink's concern. `notify` is called from
/// the poll loop and must not block.
pub trait AlertSink: Send + Sync {
    /// Deliver one alert.
    fn notify(&self, alert: &Alert);
}
