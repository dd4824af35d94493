//! Mock sample source and alert sink for testing.
//!
//! [`MockSource`] implements [`RawSampleSource`] without hardware.
//!
//! # Features
//!
//! - **Scripted readings**: queue exact readings to replay in order
//! - **Steady template**: after the script runs out, a template reading is
//!   returned with a timestamp advancing by a fixed step
//! - **Failure injection**: fail permanently or for the next N reads
//! - **Latency simulation**: delay every read, e.g. to exercise timeouts

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use atmos_types::RawReading;

use crate::alerts::Alert;
use crate::error::{Error, Result};
use crate::traits::{AlertSink, RawSampleSource};

/// A scripted sample source for testing.
///
/// # Example
///
/// ```
/// use atmos_core::{MockSource, RawSampleSource};
///
/// #[tokio::main]
/// async fn main() {
///     let source = MockSource::builder().gas(42_000.0).build();
///     let reading = source.read().await.unwrap();
///     assert_eq!(reading.gas_resistance_ohm, Some(42_000.0));
/// }
/// ```
pub struct MockSource {
    name: String,
    template: RwLock<RawReading>,
    script: RwLock<VecDeque<RawReading>>,
    start: OffsetDateTime,
    step: Duration,
    read_count: AtomicU32,
    should_fail: AtomicBool,
    fail_message: RwLock<String>,
    /// Simulated read latency in milliseconds (0 = no delay).
    read_latency_ms: AtomicU64,
    /// Reads left to fail before succeeding again.
    remaining_failures: AtomicU32,
}

impl std::fmt::Debug for MockSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSource")
            .field("name", &self.name)
            .field("read_count", &self.read_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockSource {
    /// Create a mock source with a clean-air template reading.
    pub fn new() -> Self {
        MockSourceBuilder::new().build()
    }

    /// Start building a mock source.
    pub fn builder() -> MockSourceBuilder {
        MockSourceBuilder::new()
    }

    fn default_template(timestamp: OffsetDateTime) -> RawReading {
        RawReading {
            timestamp,
            gas_resistance_ohm: Some(50_000.0),
            temperature_c: Some(25.0),
            humidity_pct: Some(40.0),
            pressure_hpa: Some(1013.2),
            pm1_0: Some(1.0),
            pm2_5: Some(2.0),
            pm10: Some(3.0),
        }
    }

    async fn check_should_fail(&self) -> Result<()> {
        let latency = self.read_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.remaining_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::SensorUnavailable(
                self.fail_message.read().await.clone(),
            ));
        }

        if self.should_fail.load(Ordering::Relaxed) {
            Err(Error::SensorUnavailable(
                self.fail_message.read().await.clone(),
            ))
        } else {
            Ok(())
        }
    }

    // --- Test control methods ---

    /// Queue readings to be returned before the template.
    pub async fn push_script(&self, readings: impl IntoIterator<Item = RawReading>) {
        self.script.write().await.extend(readings);
    }

    /// Replace the template reading. Its timestamp is ignored.
    pub async fn set_template(&self, reading: RawReading) {
        *self.template.write().await = reading;
    }

    /// Set the template gas resistance.
    pub async fn set_gas(&self, ohm: Option<f32>) {
        self.template.write().await.gas_resistance_ohm = ohm;
    }

    /// Set the template humidity.
    pub async fn set_humidity(&self, pct: Option<f32>) {
        self.template.write().await.humidity_pct = pct;
    }

    /// Make every read fail, or stop failing.
    pub async fn set_should_fail(&self, fail: bool, message: Option<&str>) {
        self.should_fail.store(fail, Ordering::Relaxed);
        if let Some(msg) = message {
            *self.fail_message.write().await = msg.to_string();
        }
    }

    /// Fail the next `count` reads, then succeed.
    pub fn set_transient_failures(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Set simulated read latency.
    ///
    /// Set to `Duration::ZERO` to disable latency simulation.
    pub fn set_read_latency(&self, latency: Duration) {
        self.read_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of read attempts so far, failed ones included.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RawSampleSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Result<RawReading> {
        let n = self.read_count.fetch_add(1, Ordering::Relaxed);
        self.check_should_fail().await?;

        if let Some(reading) = self.script.write().await.pop_front() {
            return Ok(reading);
        }

        let timestamp = self.start + self.step * n;
        Ok(RawReading {
            timestamp,
            ..*self.template.read().await
        })
    }
}

/// Builder for creating mock sources with custom settings.
#[derive(Debug)]
pub struct MockSourceBuilder {
    name: String,
    template: RawReading,
    script: Vec<RawReading>,
    start: OffsetDateTime,
    step: Duration,
    should_fail: bool,
    transient_failures: u32,
}

impl Default for MockSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSourceBuilder {
    /// Create a new builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        let start = OffsetDateTime::UNIX_EPOCH;
        Self {
            name: "mock".to_string(),
            template: MockSource::default_template(start),
            script: Vec::new(),
            start,
            step: Duration::from_secs(2),
            should_fail: false,
            transient_failures: 0,
        }
    }

    /// Set the source name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the template gas resistance.
    #[must_use]
    pub fn gas(mut self, ohm: f32) -> Self {
        self.template.gas_resistance_ohm = Some(ohm);
        self
    }

    /// Set the template temperature.
    #[must_use]
    pub fn temperature(mut self, celsius: f32) -> Self {
        self.template.temperature_c = Some(celsius);
        self
    }

    /// Set the template humidity.
    #[must_use]
    pub fn humidity(mut self, pct: f32) -> Self {
        self.template.humidity_pct = Some(pct);
        self
    }

    /// Set the template PM2.5.
    #[must_use]
    pub fn pm2_5(mut self, ugm3: f32) -> Self {
        self.template.pm2_5 = Some(ugm3);
        self
    }

    /// Timestamp of the first template reading.
    #[must_use]
    pub fn start(mut self, start: OffsetDateTime) -> Self {
        self.start = start;
        self
    }

    /// Time between template readings.
    #[must_use]
    pub fn step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Readings replayed before the template.
    #[must_use]
    pub fn script(mut self, readings: Vec<RawReading>) -> Self {
        self.script = readings;
        self
    }

    /// Set whether every read fails.
    #[must_use]
    pub fn should_fail(mut self, fail: bool) -> Self {
        self.should_fail = fail;
        self
    }

    /// Fail the first `count` reads.
    #[must_use]
    pub fn transient_failures(mut self, count: u32) -> Self {
        self.transient_failures = count;
        self
    }

    /// Build the mock source.
    #[must_use]
    pub fn build(self) -> MockSource {
        MockSource {
            name: self.name,
            template: RwLock::new(self.template),
            script: RwLock::new(self.script.into()),
            start: self.start,
            step: self.step,
            read_count: AtomicU32::new(0),
            should_fail: AtomicBool::new(self.should_fail),
            fail_message: RwLock::new("Mock failure".to_string()),
            read_latency_ms: AtomicU64::new(0),
            remaining_failures: AtomicU32::new(self.transient_failures),
        }
    }
}

/// An alert sink that records every alert it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts received so far.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .map(|alerts| alerts.clone())
            .unwrap_or_default()
    }

    /// Number of alerts received so far.
    pub fn len(&self) -> usize {
        self.alerts.lock().map(|alerts| alerts.len()).unwrap_or(0)
    }

    /// Returns `true` if no alert was received.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for RecordingSink {
    fn notify(&self, alert: &Alert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert.clone());
        }
    }
}
