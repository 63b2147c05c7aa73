//! Angle parsing and formatting.
//!
//! Field books record angles in the `DDD.MMSS` convention: `123.4530` is
//! 123 degrees, 45 minutes, 30 seconds. Digits after the seconds are decimal
//! seconds, so `123.453015` is 123°45'30.15".

use crate::error::{Result, SurveyError};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// How angle text in the input should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AngleFormat {
    /// DDD.MMSS packed degrees-minutes-seconds (default)
    #[default]
    Dms,
    /// Plain decimal degrees
    Decimal,
}

impl fmt::Display for AngleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AngleFormat::Dms => write!(f, "DD.MMSS"),
            AngleFormat::Decimal => write!(f, "Decimal Degrees"),
        }
    }
}

/// An angle as it appears in a data file.
///
/// Text is read with the configured [`AngleFormat`]. A bare number in a
/// job file is always decimal degrees, since `123.4530` written as a TOML
/// float loses its trailing zero.
#[derive(Debug, Clone, PartialEq)]
pub enum AngleValue {
    Text(String),
    Degrees(f64),
}

impl AngleValue {
    pub fn resolve(&self, format: AngleFormat) -> Result<f64> {
        match self {
            AngleValue::Text(text) => parse_angle(text, format),
            AngleValue::Degrees(value) => Ok(*value),
        }
    }

    /// Read the value as a plain number, ignoring the angle format.
    pub fn as_number(&self) -> Result<f64> {
        match self {
            AngleValue::Text(text) => parse_angle(text, AngleFormat::Decimal),
            AngleValue::Degrees(value) => Ok(*value),
        }
    }
}

impl From<&str> for AngleValue {
    fn from(text: &str) -> Self {
        AngleValue::Text(text.to_string())
    }
}

impl fmt::Display for AngleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AngleValue::Text(text) => write!(f, "{}", text),
            AngleValue::Degrees(value) => write!(f, "{}", value),
        }
    }
}

struct AngleValueVisitor;

impl<'de> Visitor<'de> for AngleValueVisitor {
    type Value = AngleValue;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an angle as text or a number of degrees")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<AngleValue, E> {
        Ok(AngleValue::Text(value.trim().to_string()))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> std::result::Result<AngleValue, E> {
        Ok(AngleValue::Degrees(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<AngleValue, E> {
        Ok(AngleValue::Degrees(value as f64))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<AngleValue, E> {
        Ok(AngleValue::Degrees(value as f64))
    }
}

impl<'de> Deserialize<'de> for AngleValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // CSV fields stay text; self-describing formats may hand over numbers
        deserializer.deserialize_str(AngleValueVisitor)
    }
}

/// Convert a `DDD.MMSS` string to decimal degrees.
///
/// Text without a decimal point, or with fewer than four fractional digits,
/// is taken as decimal degrees already.
pub fn dms_to_dd(text: &str) -> Result<f64> {
    let invalid = || SurveyError::InvalidAngle(text.to_string());
    let trimmed = text.trim();

    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    if body.is_empty() {
        return Err(invalid());
    }

    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());

    let value = match body.split_once('.') {
        None => {
            if !all_digits(body) {
                return Err(invalid());
            }
            body.parse::<f64>().map_err(|_| invalid())?
        }
        Some((deg, frac)) => {
            if !all_digits(deg) || !all_digits(frac) || (deg.is_empty() && frac.is_empty()) {
                return Err(invalid());
            }

            if frac.len() < 4 {
                body.parse::<f64>().map_err(|_| invalid())?
            } else {
                let degrees: f64 = if deg.is_empty() {
                    0.0
                } else {
                    deg.parse().map_err(|_| invalid())?
                };
                let minutes: f64 = frac[..2].parse().map_err(|_| invalid())?;
                let seconds: f64 = if frac.len() > 4 {
                    format!("{}.{}", &frac[2..4], &frac[4..])
                        .parse()
                        .map_err(|_| invalid())?
                } else {
                    frac[2..4].parse().map_err(|_| invalid())?
                };

                if minutes >= 60.0 || seconds >= 60.0 {
                    return Err(invalid());
                }

                degrees + minutes / 60.0 + seconds / 3600.0
            }
        }
    };

    Ok(if negative { -value } else { value })
}

/// Convert decimal degrees to a `DD.MMSS` string, rounding to whole seconds.
///
/// `dd` must be finite; callers parse with [`parse_angle`].
pub fn dd_to_dms(dd: f64) -> String {
    debug_assert!(dd.is_finite(), "dd_to_dms called with {}", dd);
    let negative = dd < 0.0;
    let abs = dd.abs();

    let mut degrees = abs.trunc() as u64;
    let minutes_float = (abs - degrees as f64) * 60.0;
    let mut minutes = minutes_float.trunc() as u64;
    let mut seconds = ((minutes_float - minutes as f64) * 60.0).round() as u64;

    // Rounding can push seconds or minutes to 60
    if seconds == 60 {
        minutes += 1;
        seconds = 0;
    }
    if minutes == 60 {
        degrees += 1;
        minutes = 0;
    }

    let sign = if negative && (degrees, minutes, seconds) != (0, 0, 0) {
        "-"
    } else {
        ""
    };
    format!("{}{:02}.{:02}{:02}", sign, degrees, minutes, seconds)
}

/// Parse angle text in the given format into decimal degrees.
pub fn parse_angle(text: &str, format: AngleFormat) -> Result<f64> {
    match format {
        AngleFormat::Dms => dms_to_dd(text),
        AngleFormat::Decimal => {
            let value: f64 = text
                .trim()
                .parse()
                .map_err(|_| SurveyError::InvalidAngle(text.to_string()))?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(SurveyError::InvalidAngle(text.to_string()))
            }
        }
    }
}

/// Reduce an angle in degrees to the range [0, 360).
pub fn normalize_degrees(degrees: f64) -> f64 {
    let reduced = degrees.rem_euclid(360.0);
    if reduced >= 360.0 {
        0.0
    } else {
        reduced
    }
}

/// Symbolic rendering for reports, e.g. `45°30'15.0"`.
pub fn format_dms(dd: f64) -> String {
    let negative = dd < 0.0;
    let tenths = (dd.abs() * 36_000.0).round() as u64;

    let degrees = tenths / 36_000;
    let remainder = tenths % 36_000;
    let minutes = remainder / 600;
    let seconds = (remainder % 600) as f64 / 10.0;

    let sign = if negative && tenths > 0 { "-" } else { "" };
    format!("{}{}°{:02}'{:04.1}\"", sign, degrees, minutes, seconds)
}
