//! Signed durations in whole minutes
//!
//! [`TimeDuration`] is independent of the store. It accepts minutes, `"H:MM"`
//! clock strings, `{hours, minutes}` parts, hour/minute pairs and pairs of
//! instants, and renders back to `"H:MM"`.
//!
//! Hours and minutes always share the sign of the total: -62 minutes is
//! -1 hour and -2 minutes, and prints as `-1:02`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors from constructing or scaling a [`TimeDuration`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    /// A field was not numeric, or a clock string was malformed
    #[error("invalid {field}: {value:?}")]
    InvalidInput { field: &'static str, value: String },

    #[error("division by zero")]
    DivisionByZero,
}

/// An hours or minutes field: a number or a numeric string.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Number(f64),
    Text(String),
}

impl From<i64> for Part {
    fn from(n: i64) -> Self {
        Part::Number(n as f64)
    }
}

impl From<f64> for Part {
    fn from(n: f64) -> Self {
        Part::Number(n)
    }
}

impl From<&str> for Part {
    fn from(s: &str) -> Self {
        Part::Text(s.to_string())
    }
}

impl From<String> for Part {
    fn from(s: String) -> Self {
        Part::Text(s)
    }
}

/// Every shape a [`TimeDuration`] can be built from.
#[derive(Debug, Clone, PartialEq)]
pub enum DurationInput {
    Empty,
    Minutes(i64),
    Copy(TimeDuration),
    /// `[sign] H:MM`, whitespace allowed around the sign
    Clock(String),
    Parts {
        hours: Option<Part>,
        minutes: Option<Part>,
    },
    HoursMinutes(i64, i64),
    /// Elapsed time from the first instant to the second
    InstantPair(DateTime<Utc>, DateTime<Utc>),
}

impl From<i64> for DurationInput {
    fn from(minutes: i64) -> Self {
        DurationInput::Minutes(minutes)
    }
}

impl From<&str> for DurationInput {
    fn from(clock: &str) -> Self {
        DurationInput::Clock(clock.to_string())
    }
}

impl From<TimeDuration> for DurationInput {
    fn from(duration: TimeDuration) -> Self {
        DurationInput::Copy(duration)
    }
}

impl From<(i64, i64)> for DurationInput {
    fn from((hours, minutes): (i64, i64)) -> Self {
        DurationInput::HoursMinutes(hours, minutes)
    }
}

impl From<(DateTime<Utc>, DateTime<Utc>)> for DurationInput {
    fn from((start, end): (DateTime<Utc>, DateTime<Utc>)) -> Self {
        DurationInput::InstantPair(start, end)
    }
}

/// Signed hours and minutes of a duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockParts {
    pub hours: i64,
    pub minutes: i64,
}

/// A signed number of minutes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeDuration {
    total_minutes: i64,
}

impl TimeDuration {
    pub fn new(input: impl Into<DurationInput>) -> Result<Self, DurationError> {
        let total_minutes = match input.into() {
            DurationInput::Empty => 0,
            DurationInput::Minutes(minutes) => minutes,
            DurationInput::Copy(other) => other.total_minutes,
            DurationInput::Clock(clock) => parse_clock(&clock)?,
            DurationInput::Parts { hours, minutes } => {
                let hours = hours.map(|h| parse_part("hours", &h)).transpose()?;
                let minutes = minutes.map(|m| parse_part("minutes", &m)).transpose()?;
                combine(hours, minutes)
            }
            DurationInput::HoursMinutes(hours, minutes) => {
                combine(Some(hours as f64), Some(minutes as f64))
            }
            DurationInput::InstantPair(start, end) => Self::between(start, end).total_minutes,
        };
        Ok(Self { total_minutes })
    }

    pub const fn from_minutes(total_minutes: i64) -> Self {
        Self { total_minutes }
    }

    /// `hours*60 + minutes`, negated as a whole when `hours` is negative.
    pub fn from_hours_minutes(hours: i64, minutes: i64) -> Self {
        Self {
            total_minutes: combine(Some(hours as f64), Some(minutes as f64)),
        }
    }

    /// Time elapsed from `start` to `end`, rounded to the nearest minute.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let millis = (end - start).num_milliseconds();
        Self {
            total_minutes: (millis as f64 / 60_000.0).round() as i64,
        }
    }

    pub fn to_minutes(&self) -> i64 {
        self.total_minutes
    }

    /// Whole hours, truncated toward zero.
    pub fn hours(&self) -> i64 {
        self.total_minutes / 60
    }

    /// Minutes left over after [`TimeDuration::hours`], with the same sign.
    pub fn minutes(&self) -> i64 {
        self.total_minutes % 60
    }

    pub fn set_hours(&mut self, hours: i64) -> &mut Self {
        self.total_minutes = hours.saturating_mul(60).saturating_add(self.minutes());
        self
    }

    pub fn set_minutes(&mut self, minutes: i64) -> &mut Self {
        self.total_minutes = (self.hours() * 60).saturating_add(minutes);
        self
    }

    pub fn add(&mut self, other: &TimeDuration) -> &mut Self {
        self.total_minutes = self.total_minutes.saturating_add(other.total_minutes);
        self
    }

    pub fn subtract(&mut self, other: &TimeDuration) -> &mut Self {
        self.total_minutes = self.total_minutes.saturating_sub(other.total_minutes);
        self
    }

    pub fn multiply_by(&mut self, factor: i64) -> &mut Self {
        self.total_minutes = self.total_minutes.saturating_mul(factor);
        self
    }

    /// Divide, truncating toward zero.
    ///
    /// Like the rest of the arithmetic, saturates at the `i64` bounds.
    pub fn divide_by(&mut self, divisor: i64) -> Result<&mut Self, DurationError> {
        if divisor == 0 {
            return Err(DurationError::DivisionByZero);
        }
        self.total_minutes = self.total_minutes.saturating_div(divisor);
        Ok(self)
    }

    /// Total hours rounded to two decimals.
    pub fn to_hours(&self) -> f64 {
        self.to_hours_rounded(2)
    }

    /// Total hours rounded to `decimals` places.
    pub fn to_hours_rounded(&self, decimals: u32) -> f64 {
        let factor = 10f64.powi(decimals as i32);
        (self.total_minutes as f64 / 60.0 * factor).round() / factor
    }

    pub fn to_object(&self) -> ClockParts {
        ClockParts {
            hours: self.hours(),
            minutes: self.minutes(),
        }
    }

    /// Render as `H:MM`, with hours padded to two digits when `pad_hours`.
    pub fn format(&self, pad_hours: bool) -> String {
        let sign = if self.total_minutes < 0 { "-" } else { "" };
        let hours = self.hours().unsigned_abs();
        let minutes = self.minutes().unsigned_abs();
        if pad_hours {
            format!("{}{:02}:{:02}", sign, hours, minutes)
        } else {
            format!("{}{}:{:02}", sign, hours, minutes)
        }
    }
}

impl fmt::Display for TimeDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(false))
    }
}

impl FromStr for TimeDuration {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_minutes(parse_clock(s)?))
    }
}

impl From<i64> for TimeDuration {
    fn from(total_minutes: i64) -> Self {
        Self::from_minutes(total_minutes)
    }
}

impl Serialize for TimeDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let clock = String::deserialize(deserializer)?;
        clock.parse().map_err(de::Error::custom)
    }
}

fn parse_clock(input: &str) -> Result<i64, DurationError> {
    let invalid = || DurationError::InvalidInput {
        field: "clock",
        value: input.to_string(),
    };

    let rest = input.trim();
    let (negative, rest) = match rest.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, rest.strip_prefix('+').unwrap_or(rest)),
    };
    let rest = rest.trim_start();
    if rest.is_empty() {
        return Ok(0);
    }

    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(hours) || !digits(minutes) || minutes.len() > 2 {
        return Err(invalid());
    }

    let hours: i64 = hours.parse().map_err(|_| invalid())?;
    let minutes: i64 = minutes.parse().map_err(|_| invalid())?;
    let total = hours
        .checked_mul(60)
        .and_then(|h| h.checked_add(minutes))
        .ok_or_else(invalid)?;
    Ok(if negative { -total } else { total })
}

fn parse_part(field: &'static str, part: &Part) -> Result<f64, DurationError> {
    let invalid = || DurationError::InvalidInput {
        field,
        value: match part {
            Part::Number(n) => n.to_string(),
            Part::Text(s) => s.clone(),
        },
    };

    let value = match part {
        Part::Number(n) => *n,
        Part::Text(s) => s.trim().parse::<f64>().map_err(|_| invalid())?,
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid())
    }
}

fn combine(hours: Option<f64>, minutes: Option<f64>) -> i64 {
    let minutes = minutes.unwrap_or(0.0);
    let total = match hours {
        None => minutes,
        // -0 counts as negative, so {hours: -0, minutes: 10} is -10.
        Some(hours) if hours.is_sign_negative() => -(hours.abs() * 60.0 + minutes.abs()),
        Some(hours) => hours * 60.0 + minutes,
    };
    total.round() as i64
}
