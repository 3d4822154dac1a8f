//! Time-series primitives shared by the analytics engine and the API.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A single observation. Missing values are represented as NaN until
/// preprocessing fills or drops them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        TimeSeriesPoint { timestamp, value }
    }

    pub fn is_missing(&self) -> bool {
        self.value.is_nan()
    }
}

/// Aggregation bucket width recognized by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Hour,
    Day,
    Week,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
        }
    }

    /// Bucket width as wall-clock duration.
    pub fn duration(&self) -> Duration {
        match self {
            Interval::Hour => Duration::from_secs(3600),
            Interval::Day => Duration::from_secs(86_400),
            Interval::Week => Duration::from_secs(7 * 86_400),
        }
    }

    pub fn seconds(&self) -> i64 {
        self.duration().as_secs() as i64
    }

    /// SQL interval literal understood by `time_bucket`.
    pub fn as_pg_interval(&self) -> &'static str {
        match self {
            Interval::Hour => "1 hour",
            Interval::Day => "1 day",
            Interval::Week => "1 week",
        }
    }

    pub fn step(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seconds())
    }

    /// Seasonal period conventionally paired with this interval:
    /// 24 buckets per day, 7 per week, 4 per month.
    pub fn default_period(&self) -> usize {
        match self {
            Interval::Hour => 24,
            Interval::Day => 7,
            Interval::Week => 4,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "hourly" | "1h" => Ok(Interval::Hour),
            "day" | "daily" | "1d" => Ok(Interval::Day),
            "week" | "weekly" | "1w" => Ok(Interval::Week),
            other => Err(Error::validation(format!("unknown interval: {}", other))),
        }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval::Day
    }
}

/// A point flagged by anomaly detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnomalyPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(rename = "zScore")]
    pub z_score: f64,
}

/// Output of seasonal-trend decomposition. All four component series
/// share the original timestamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Decomposition {
    pub original: Vec<TimeSeriesPoint>,
    pub trend: Vec<TimeSeriesPoint>,
    pub seasonal: Vec<TimeSeriesPoint>,
    pub residual: Vec<TimeSeriesPoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_parsing() {
        assert_eq!("hour".parse::<Interval>().unwrap(), Interval::Hour);
        assert_eq!("DAILY".parse::<Interval>().unwrap(), Interval::Day);
        assert_eq!("1w".parse::<Interval>().unwrap(), Interval::Week);
        assert!("fortnight".parse::<Interval>().is_err());
    }

    #[test]
    fn interval_periods() {
        assert_eq!(Interval::Hour.default_period(), 24);
        assert_eq!(Interval::Day.default_period(), 7);
        assert_eq!(Interval::Week.default_period(), 4);
    }

    #[test]
    fn missing_points_are_nan() {
        let p = TimeSeriesPoint::new(Utc::now(), f64::NAN);
        assert!(p.is_missing());
        let q = TimeSeriesPoint::new(Utc::now(), 0.0);
        assert!(!q.is_missing());
    }
}
