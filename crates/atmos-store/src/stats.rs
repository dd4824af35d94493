//! Streaming aggregates over stored samples.

use serde::Serialize;
use time::OffsetDateTime;

use atmos_types::{QualityFlag, Sample};

/// Min, max and mean of one field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    min: f64,
    max: f64,
    sum: f64,
    count: u64,
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.count += 1;
    }

    fn finish(&self) -> Option<FieldStats> {
        (self.count > 0).then(|| FieldStats {
            min: self.min,
            max: self.max,
            mean: self.sum / self.count as f64,
        })
    }
}

/// Number of samples per quality flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualityCounts {
    pub nominal: u64,
    pub warming_up: u64,
    pub degraded: u64,
}

/// Aggregate of a range of samples, built one sample at a time.
#[derive(Debug, Clone, Default)]
pub struct SampleStats {
    count: u64,
    first: Option<OffsetDateTime>,
    last: Option<OffsetDateTime>,
    peak_iaq: Option<(u16, OffsetDateTime)>,
    iaq: Accumulator,
    voc_index: Accumulator,
    co2eq_ppm: Accumulator,
    pm2_5: Accumulator,
    temperature_c: Accumulator,
    humidity_pct: Accumulator,
    quality: QualityCounts,
}

impl SampleStats {
    /// Fold one sample into the aggregate.
    pub fn add(&mut self, sample: &Sample) {
        self.count += 1;
        self.first.get_or_insert(sample.timestamp);
        self.last = Some(sample.timestamp);
        if self.peak_iaq.is_none_or(|(iaq, _)| sample.iaq > iaq) {
            self.peak_iaq = Some((sample.iaq, sample.timestamp));
        }
        self.iaq.add(f64::from(sample.iaq));
        self.voc_index.add(f64::from(sample.voc_index));
        self.co2eq_ppm.add(f64::from(sample.co2eq_ppm));
        self.pm2_5.add(f64::from(sample.pm2_5));
        self.temperature_c.add(f64::from(sample.temperature_c));
        self.humidity_pct.add(f64::from(sample.humidity_pct));
        match sample.quality {
            QualityFlag::Nominal => self.quality.nominal += 1,
            QualityFlag::WarmingUp => self.quality.warming_up += 1,
            QualityFlag::Degraded => self.quality.degraded += 1,
        }
    }

    /// Number of samples.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Timestamp of the first sample.
    pub fn first(&self) -> Option<OffsetDateTime> {
        self.first
    }

    /// Timestamp of the last sample.
    pub fn last(&self) -> Option<OffsetDateTime> {
        self.last
    }

    /// Highest IAQ and when it was first reached.
    pub fn peak_iaq(&self) -> Option<(u16, OffsetDateTime)> {
        self.peak_iaq
    }

    pub fn iaq(&self) -> Option<FieldStats> {
        self.iaq.finish()
    }

    pub fn voc_index(&self) -> Option<FieldStats> {
        self.voc_index.finish()
    }

    pub fn co2eq_ppm(&self) -> Option<FieldStats> {
        self.co2eq_ppm.finish()
    }

    pub fn pm2_5(&self) -> Option<FieldStats> {
        self.pm2_5.finish()
    }

    pub fn temperature_c(&self) -> Option<FieldStats> {
        self.temperature_c.finish()
    }

    pub fn humidity_pct(&self) -> Option<FieldStats> {
        self.humidity_pct.finish()
    }

    /// Samples per quality flag.
    pub fn quality(&self) -> QualityCounts {
        self.quality
    }

    /// Plain-data summary for display or serialization.
    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            count: self.count,
            first: self.first,
            last: self.last,
            peak_iaq: self.peak_iaq.map(|(iaq, _)| iaq),
            peak_iaq_at: self.peak_iaq.map(|(_, at)| at),
            iaq: self.iaq(),
            voc_index: self.voc_index(),
            co2eq_ppm: self.co2eq_ppm(),
            pm2_5: self.pm2_5(),
            temperature_c: self.temperature_c(),
            humidity_pct: self.humidity_pct(),
            quality: self.quality,
        }
    }
}

/// Serializable form of [`SampleStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub count: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last: Option<OffsetDateTime>,
    pub peak_iaq: Option<u16>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub peak_iaq_at: Option<OffsetDateTime>,
    pub iaq: Option<FieldStats>,
    pub voc_index: Option<FieldStats>,
    pub co2eq_ppm: Option<FieldStats>,
    pub pm2_5: Option<FieldStats>,
    pub temperature_c: Option<FieldStats>,
    pub humidity_pct: Option<FieldStats>,
    pub quality: QualityCounts,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn sample(offset_s: i64, iaq: u16, temperature_c: f32, quality: QualityFlag) -> Sample {
        Sample {
            timestamp: OffsetDateTime::UNIX_EPOCH + Duration::seconds(offset_s),
            iaq,
            voc_index: iaq / 2,
            co2eq_ppm: 400 + iaq,
            pm25_aqi: 0,
            pm1_0: 0.0,
            pm2_5: 1.0,
            pm10: 0.0,
            temperature_c,
            humidity_pct: 50.0,
            pressure_hpa: 1013.0,
            gas_resistance_ohm: 50_000.0,
            quality,
        }
    }

    #[test]
    fn test_empty() {
        let stats = SampleStats::default();
        assert_eq!(stats.count(), 0);
        assert!(stats.iaq().is_none());
        assert!(stats.peak_iaq().is_none());
        assert_eq!(stats.summary().quality, QualityCounts::default());
    }

    #[test]
    fn test_aggregates() {
        let mut stats = SampleStats::default();
        stats.add(&sample(0, 40, 20.0, QualityFlag::WarmingUp));
        stats.add(&sample(2, 120, 22.0, QualityFlag::Nominal));
        stats.add(&sample(4, 120, 24.0, QualityFlag::Degraded));
        stats.add(&sample(6, 80, 22.0, QualityFlag::Nominal));

        assert_eq!(stats.count(), 4);
        assert_eq!(stats.first(), Some(OffsetDateTime::UNIX_EPOCH));
        assert_eq!(
            stats.last(),
            Some(OffsetDateTime::UNIX_EPOCH + Duration::seconds(6))
        );

        let iaq = stats.iaq().unwrap();
        assert_eq!(iaq.min, 40.0);
        assert_eq!(iaq.max, 120.0);
        assert_eq!(iaq.mean, 90.0);
        assert_eq!(stats.temperature_c().unwrap().mean, 22.0);

        // Ties keep the earliest peak.
        assert_eq!(
            stats.peak_iaq(),
            Some((120, OffsetDateTime::UNIX_EPOCH + Duration::seconds(2)))
        );
        assert_eq!(
            stats.quality(),
            QualityCounts {
                nominal: 2,
                warming_up: 1,
                degraded: 1
            }
        );
    }
}
