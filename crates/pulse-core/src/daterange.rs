//! The dashboard's date-range grammar.
//!
//! Accepted forms: `last-N-days`, `this-month`, `last-month`,
//! `this-year`, and `YYYY-MM-DD_to_YYYY-MM-DD`. Anything else falls
//! back to `last-30-days`. Bounds are taken at local midnight and
//! converted to UTC; everything past this boundary works in UTC only.

use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        DateRange { start, end }
    }

    /// Parse a range expression. Unknown input defaults to the last 30
    /// days rather than failing; the dashboard treats the parameter as
    /// a hint.
    pub fn parse(input: &str) -> Self {
        Self::parse_at(input, Local::now().date_naive())
    }

    /// Parse relative to an explicit "today", for deterministic tests.
    pub fn parse_at(input: &str, today: NaiveDate) -> Self {
        let trimmed = input.trim();

        if let Some(days) = parse_last_n_days(trimmed) {
            let start = today - Duration::days(days - 1);
            return Self::from_dates(start, today);
        }

        match trimmed {
            "this-month" => {
                let first = today.with_day(1).unwrap_or(today);
                Self::from_dates(first, today)
            }
            "last-month" => {
                let first_of_this = today.with_day(1).unwrap_or(today);
                let last_of_prev = first_of_this - Duration::days(1);
                let first_of_prev = last_of_prev.with_day(1).unwrap_or(last_of_prev);
                Self::from_dates(first_of_prev, last_of_prev)
            }
            "this-year" => {
                let first = NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today);
                Self::from_dates(first, today)
            }
            other => {
                if let Some((a, b)) = parse_explicit(other) {
                    if a <= b {
                        return Self::from_dates(a, b);
                    }
                }
                // default window
                Self::from_dates(today - Duration::days(29), today)
            }
        }
    }

    /// Midnight-to-end-of-day bounds in local time, expressed in UTC.
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange {
            start: local_to_utc(start, 0, 0, 0, 0),
            end: local_to_utc(end, 23, 59, 59, 999),
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// The window of identical length immediately preceding this one,
    /// used for period-over-period comparisons.
    pub fn previous(&self) -> DateRange {
        let len = self.duration();
        DateRange {
            start: self.start - len,
            end: self.start,
        }
    }
}

fn parse_last_n_days(s: &str) -> Option<i64> {
    let rest = s.strip_prefix("last-")?.strip_suffix("-days")?;
    let n: i64 = rest.parse().ok()?;
    (n > 0).then_some(n)
}

fn parse_explicit(s: &str) -> Option<(NaiveDate, NaiveDate)> {
    let (a, b) = s.split_once("_to_")?;
    let start = NaiveDate::parse_from_str(a, "%Y-%m-%d").ok()?;
    let end = NaiveDate::parse_from_str(b, "%Y-%m-%d").ok()?;
    Some((start, end))
}

fn local_to_utc(date: NaiveDate, h: u32, m: u32, s: u32, ms: u32) -> DateTime<Utc> {
    let naive = date
        .and_hms_milli_opt(h, m, s, ms)
        .unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN));
    match Local.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        // Skipped by a DST jump; nudge forward an hour
        chrono::LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            Local
                .from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
    }

    #[test]
    fn last_n_days_spans_n_days() {
        let r = DateRange::parse_at("last-7-days", today());
        let days = (r.end - r.start).num_days();
        assert_eq!(days, 6); // 7 calendar days inclusive
        assert!(r.start < r.end);
    }

    #[test]
    fn explicit_range() {
        let r = DateRange::parse_at("2025-01-01_to_2025-01-31", today());
        assert_eq!((r.end - r.start).num_days(), 30);
    }

    #[test]
    fn explicit_range_reversed_falls_back() {
        let r = DateRange::parse_at("2025-02-01_to_2025-01-01", today());
        assert_eq!((r.end - r.start).num_days(), 29); // last-30-days
    }

    #[test]
    fn this_month_starts_on_the_first() {
        let r = DateRange::parse_at("this-month", today());
        let default = DateRange::from_dates(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), today());
        assert_eq!(r, default);
    }

    #[test]
    fn last_month_is_full_month() {
        let r = DateRange::parse_at("last-month", today());
        let expected = DateRange::from_dates(
            NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 31).unwrap(),
        );
        assert_eq!(r, expected);
    }

    #[test]
    fn unknown_defaults_to_last_30_days() {
        let r = DateRange::parse_at("whenever", today());
        assert_eq!((r.end - r.start).num_days(), 29);
    }

    #[test]
    fn zero_days_is_rejected() {
        let r = DateRange::parse_at("last-0-days", today());
        assert_eq!((r.end - r.start).num_days(), 29);
    }

    #[test]
    fn previous_window_abuts_current() {
        let r = DateRange::parse_at("last-7-days", today());
        let prev = r.previous();
        assert_eq!(prev.end, r.start);
        assert_eq!(prev.duration(), r.duration());
    }
}
