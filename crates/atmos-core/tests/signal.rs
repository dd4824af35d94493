//! End-to-end tests of the signal chain: raw readings in, samples out.

use std::time::Duration;

use atmos_core::{
    BaselineState, CompensationConfig, IndexConfig, Pipeline, RawSampleSource, SmoothingConfig,
};
use atmos_core::mock::MockSource;
use atmos_types::{QualityFlag, RawReading, Sample};
use tempfile::TempDir;
use time::OffsetDateTime;

const POLL: Duration = Duration::from_secs(2);

fn pipeline(warmup_secs: u64, restored: Option<BaselineState>) -> Pipeline {
    let compensation = CompensationConfig {
        warmup_secs,
        ..Default::default()
    };
    Pipeline::new(
        compensation,
        &SmoothingConfig::default(),
        IndexConfig::default(),
        POLL,
        restored,
    )
    .unwrap()
}

fn reading(i: i64, gas: f32) -> RawReading {
    RawReading {
        timestamp: OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(2 * i),
        gas_resistance_ohm: Some(gas),
        temperature_c: Some(25.0),
        humidity_pct: Some(40.0),
        pressure_hpa: Some(1013.0),
        pm1_0: Some(0.0),
        pm2_5: Some(0.0),
        pm10: Some(0.0),
    }
}

/// Everything except the quality flag.
fn same_values(a: &Sample, b: &Sample) -> bool {
    Sample {
        quality: QualityFlag::Nominal,
        ..*a
    } == Sample {
        quality: QualityFlag::Nominal,
        ..*b
    }
}

#[test]
fn test_step_change_reaches_steady_state_within_bound() {
    // 10 s warm-up = 5 readings at a 2 s poll.
    let mut p = pipeline(10, None);
    let mut i = 0;
    for _ in 0..50 {
        let out = p.process(&reading(i, 50_000.0));
        i += 1;
        assert!(out.sample.iaq <= 5);
    }

    let mut iaq = Vec::new();
    for _ in 0..40 {
        let out = p.process(&reading(i, 10_000.0));
        i += 1;
        assert_eq!(out.sample.quality, QualityFlag::Nominal);
        iaq.push(f64::from(out.sample.iaq));
    }

    let steady = iaq[30];
    assert!(steady > 300.0, "steady-state IAQ {steady} too low");
    // Reaction bound: within 5 polling intervals.
    assert!(iaq[4] >= 0.9 * steady, "iaq after 5 samples: {}", iaq[4]);
    // The default window settles after 3.
    assert!(iaq[2] >= 0.9 * steady);
}

#[test]
fn test_missing_humidity_matches_last_known_good() {
    let mut degraded = pipeline(10, None);
    let mut reference = pipeline(10, None);

    for i in 0..20 {
        let mut r = reading(i, 45_000.0 + (i as f32) * 100.0);
        r.humidity_pct = Some(55.0);
        degraded.process(&r);
        reference.process(&r);
    }

    let mut missing = reading(20, 47_000.0);
    missing.humidity_pct = None;
    let mut filled = missing;
    filled.humidity_pct = Some(55.0);

    let a = degraded.process(&missing);
    let b = reference.process(&filled);

    assert_eq!(a.sample.quality, QualityFlag::Degraded);
    assert_eq!(b.sample.quality, QualityFlag::Nominal);
    assert!(same_values(&a.sample, &b.sample));
    assert_eq!(a.sample.humidity_pct, 55.0);

    // The baseline trained identically.
    assert_eq!(degraded.state().baseline_ohm, reference.state().baseline_ohm);
}

#[test]
fn test_worked_example_during_warmup() {
    // While warming up the reference is the 50 kΩ default.
    let mut p = pipeline(300, None);
    let mut last = None;
    for i in 0..3 {
        last = Some(p.process(&reading(i, 10_000.0)).sample);
    }
    let sample = last.unwrap();
    assert_eq!(sample.quality, QualityFlag::WarmingUp);
    assert_eq!(sample.voc_index, 400);
    assert_eq!(sample.iaq, 367);
    assert_eq!(sample.co2eq_ppm, 2000);
    assert_eq!(sample.gas_resistance_ohm, 10_000.0);
}

#[test]
fn test_baseline_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("baseline.json");

    let mut first = pipeline(10, None);
    for i in 0..30 {
        first.process(&reading(i, 62_000.0));
    }
    first.state().save(&path).unwrap();
    let saved_baseline = first.state().baseline_ohm;

    let restored = BaselineState::load(&path).unwrap();
    let mut second = pipeline(10, restored);

    // Warm-up restarts but the learned reference is kept frozen.
    for i in 30..35 {
        let out = second.process(&reading(i, 20_000.0));
        assert_eq!(out.sample.quality, QualityFlag::WarmingUp);
    }
    assert_eq!(second.state().baseline_ohm, saved_baseline);

    let out = second.process(&reading(35, 62_000.0));
    assert_eq!(out.sample.quality, QualityFlag::Nominal);
}

#[tokio::test]
async fn test_mock_source_drives_pipeline() {
    let source = MockSource::builder().gas(50_000.0).build();
    source.set_transient_failures(1);

    let mut p = pipeline(10, None);
    let mut qualities = Vec::new();
    for _ in 0..8 {
        let raw = match source.read().await {
            Ok(raw) => raw,
            Err(_) => RawReading::missing(OffsetDateTime::UNIX_EPOCH),
        };
        qualities.push(p.process(&raw).sample.quality);
    }

    assert_eq!(qualities[0], QualityFlag::Degraded);
    assert!(qualities[1..6].iter().all(|q| *q == QualityFlag::WarmingUp));
    assert_eq!(qualities[6], QualityFlag::Nominal);
}
