//! Core types for air-quality sensor data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Upper bound of the IAQ and VOC index scales.
pub const INDEX_MAX: u16 = 500;

/// Quality of a computed [`Sample`].
///
/// # Ordering
///
/// Flags are ordered by severity: `Nominal < WarmingUp < Degraded`.
///
/// ```
/// use atmos_types::QualityFlag;
///
/// assert!(QualityFlag::Degraded > QualityFlag::WarmingUp);
/// assert_eq!("warming_up".parse::<QualityFlag>().unwrap(), QualityFlag::WarmingUp);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum QualityFlag {
    /// All channels valid and the adaptive baseline is trusted.
    #[default]
    Nominal,
    /// Baseline not yet trusted; indices were computed from fixed defaults.
    WarmingUp,
    /// At least one channel was missing or out of range and was substituted.
    Degraded,
}

impl QualityFlag {
    /// Stable lowercase name, used in logs and on the command line.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::Nominal => "nominal",
            QualityFlag::WarmingUp => "warming_up",
            QualityFlag::Degraded => "degraded",
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityFlag {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "nominal" => Ok(QualityFlag::Nominal),
            "warming_up" | "warmingup" => Ok(QualityFlag::WarmingUp),
            "degraded" => Ok(QualityFlag::Degraded),
            _ => Err(ParseError::UnknownQualityFlag(s.to_string())),
        }
    }
}

/// Health category of an IAQ score.
///
/// ```
/// use atmos_types::IaqLevel;
///
/// assert_eq!(IaqLevel::from_iaq(42), IaqLevel::Good);
/// assert_eq!(IaqLevel::from_iaq(151), IaqLevel::Unhealthy);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IaqLevel {
    /// 0-50.
    Good,
    /// 51-100.
    Moderate,
    /// 101-150.
    UnhealthySensitive,
    /// 151-200.
    Unhealthy,
    /// 201-300.
    VeryUnhealthy,
    /// Above 300.
    Hazardous,
}

impl IaqLevel {
    /// Categorize an IAQ score.
    #[must_use]
    pub fn from_iaq(iaq: u16) -> Self {
        match iaq {
            0..=50 => IaqLevel::Good,
            51..=100 => IaqLevel::Moderate,
            101..=150 => IaqLevel::UnhealthySensitive,
            151..=200 => IaqLevel::Unhealthy,
            201..=300 => IaqLevel::VeryUnhealthy,
            _ => IaqLevel::Hazardous,
        }
    }

    /// Suggested action for this level.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            IaqLevel::Good | IaqLevel::Moderate => "No action needed",
            IaqLevel::UnhealthySensitive => "Consider ventilating",
            IaqLevel::Unhealthy => "Ventilate and look for indoor pollution sources",
            IaqLevel::VeryUnhealthy => "Ventilate immediately",
            IaqLevel::Hazardous => "Leave the area and ventilate thoroughly",
        }
    }
}

impl fmt::Display for IaqLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IaqLevel::Good => write!(f, "Good"),
            IaqLevel::Moderate => write!(f, "Moderate"),
            IaqLevel::UnhealthySensitive => write!(f, "Unhealthy (SG)"),
            IaqLevel::Unhealthy => write!(f, "Unhealthy"),
            IaqLevel::VeryUnhealthy => write!(f, "Very Unhealthy"),
            IaqLevel::Hazardous => write!(f, "Hazardous"),
        }
    }
}

/// A physical input channel of a [`RawReading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Channel {
    /// Heated metal-oxide gas resistance.
    GasResistance,
    /// Ambient temperature.
    Temperature,
    /// Relative humidity.
    Humidity,
    /// Barometric pressure.
    Pressure,
    /// PM1.0 mass concentration.
    Pm1_0,
    /// PM2.5 mass concentration.
    Pm2_5,
    /// PM10 mass concentration.
    Pm10,
}

impl Channel {
    /// Every channel, in record order.
    pub const ALL: [Channel; 7] = [
        Channel::GasResistance,
        Channel::Temperature,
        Channel::Humidity,
        Channel::Pressure,
        Channel::Pm1_0,
        Channel::Pm2_5,
        Channel::Pm10,
    ];

    /// Unit suffix for display.
    #[must_use]
    pub fn unit(&self) -> &'static str {
        match self {
            Channel::GasResistance => "Ω",
            Channel::Temperature => "°C",
            Channel::Humidity => "%",
            Channel::Pressure => "hPa",
            Channel::Pm1_0 | Channel::Pm2_5 | Channel::Pm10 => "µg/m³",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::GasResistance => write!(f, "gas resistance"),
            Channel::Temperature => write!(f, "temperature"),
            Channel::Humidity => write!(f, "humidity"),
            Channel::Pressure => write!(f, "pressure"),
            Channel::Pm1_0 => write!(f, "PM1.0"),
            Channel::Pm2_5 => write!(f, "PM2.5"),
            Channel::Pm10 => write!(f, "PM10"),
        }
    }
}

/// One poll of the gas/climate sensor and the particulate sensor.
///
/// Every measurement is optional so that a partial sensor failure can be
/// represented; a timed-out poll is a reading with no values at all.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawReading {
    /// When the poll happened.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Gas resistance in ohms.
    pub gas_resistance_ohm: Option<f32>,
    /// Temperature in degrees Celsius.
    pub temperature_c: Option<f32>,
    /// Relative humidity in percent.
    pub humidity_pct: Option<f32>,
    /// Pressure in hPa.
    pub pressure_hpa: Option<f32>,
    /// PM1.0 in µg/m³.
    pub pm1_0: Option<f32>,
    /// PM2.5 in µg/m³.
    pub pm2_5: Option<f32>,
    /// PM10 in µg/m³.
    pub pm10: Option<f32>,
}

impl RawReading {
    /// A reading with no values, as produced by a timed-out poll.
    #[must_use]
    pub fn missing(timestamp: OffsetDateTime) -> Self {
        Self {
            timestamp,
            gas_resistance_ohm: None,
            temperature_c: None,
            humidity_pct: None,
            pressure_hpa: None,
            pm1_0: None,
            pm2_5: None,
            pm10: None,
        }
    }

    /// Value of a single channel.
    #[must_use]
    pub fn channel(&self, channel: Channel) -> Option<f32> {
        match channel {
            Channel::GasResistance => self.gas_resistance_ohm,
            Channel::Temperature => self.temperature_c,
            Channel::Humidity => self.humidity_pct,
            Channel::Pressure => self.pressure_hpa,
            Channel::Pm1_0 => self.pm1_0,
            Channel::Pm2_5 => self.pm2_5,
            Channel::Pm10 => self.pm10,
        }
    }

    /// Returns `true` if no channel carries a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Channel::ALL.iter().all(|c| self.channel(*c).is_none())
    }
}

/// The unit of record: one computed air-quality sample per poll cycle.
///
/// Samples are immutable once produced. Bounded fields are always within their
/// documented ranges and a [`QualityFlag::Degraded`] sample still carries
/// best-effort values for every field.
///
/// Field order is the persisted column order.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    /// When the underlying reading was taken.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Indoor air quality index, 0-500.
    pub iaq: u16,
    /// VOC index, 0-500.
    pub voc_index: u16,
    /// CO₂-equivalent in ppm.
    ///
    /// This is an estimate derived from the VOC index, not a sensed CO₂
    /// concentration.
    pub co2eq_ppm: u16,
    /// US EPA AQI of the PM2.5 concentration, 0-500.
    pub pm25_aqi: u16,
    /// PM1.0 in µg/m³ (≥ 0).
    pub pm1_0: f32,
    /// PM2.5 in µg/m³ (≥ 0).
    pub pm2_5: f32,
    /// PM10 in µg/m³ (≥ 0).
    pub pm10: f32,
    /// Temperature in degrees Celsius.
    pub temperature_c: f32,
    /// Relative humidity in percent, 0-100.
    pub humidity_pct: f32,
    /// Pressure in hPa.
    pub pressure_hpa: f32,
    /// Humidity/temperature compensated gas resistance in ohms.
    pub gas_resistance_ohm: f32,
    /// Quality of this sample.
    pub quality: QualityFlag,
}

impl Sample {
    /// Health category of the IAQ score.
    #[must_use]
    pub fn iaq_level(&self) -> IaqLevel {
        IaqLevel::from_iaq(self.iaq)
    }

    /// Returns `true` if every bounded field is inside its documented range.
    #[must_use]
    pub fn is_within_bounds(&self) -> bool {
        self.iaq <= INDEX_MAX
            && self.voc_index <= INDEX_MAX
            && self.pm25_aqi <= INDEX_MAX
            && self.pm1_0 >= 0.0
            && self.pm2_5 >= 0.0
            && self.pm10 >= 0.0
            && (0.0..=100.0).contains(&self.humidity_pct)
    }
}
