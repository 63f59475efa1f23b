use std::fmt;
use std::sync::OnceLock;

use anyhow::Result;
use chrono::{DateTime, Months, TimeDelta, Utc};
use regex::Regex;

use crate::error::AnimateError;

/// Step granularity of an animation step.
///
/// Seconds through weeks are exact durations. Months and years advance on the calendar,
/// so two ticks of `1mo` can span a different number of days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Fixed { count: u32, unit: FixedUnit },
    Calendar { count: u32, unit: CalendarUnit },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarUnit {
    Month,
    Year,
}

const DATETIME_PRESETS: &[(&str, &str)] = &[
    ("human-date", "[on] YYYY-MM-DD"),
    ("human-time", "[at] HH:mm:ss"),
    ("human-datetime", "[on] YYYY-MM-DD [at] HH:mm:ss"),
];

fn compact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)\s*([a-z]+)$").expect("interval pattern is a valid regex")
    })
}

impl Interval {
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim().to_ascii_lowercase();
        let named = match value.as_str() {
            "secondly" => Some(Self::fixed(1, FixedUnit::Second)),
            "minutely" => Some(Self::fixed(1, FixedUnit::Minute)),
            "hourly" => Some(Self::fixed(1, FixedUnit::Hour)),
            "daily" => Some(Self::fixed(1, FixedUnit::Day)),
            "weekly" => Some(Self::fixed(1, FixedUnit::Week)),
            "monthly" => Some(Self::calendar(1, CalendarUnit::Month)),
            "yearly" => Some(Self::calendar(1, CalendarUnit::Year)),
            _ => None,
        };
        if let Some(interval) = named {
            return Ok(interval);
        }

        let captures = compact_pattern().captures(&value).ok_or_else(|| {
            AnimateError::configuration(format!(
                "invalid interval '{raw}': expected a name like 'hourly' or a count with unit like '5min'"
            ))
        })?;
        let count = captures[1].parse::<u32>().map_err(|_| {
            AnimateError::configuration(format!("invalid interval '{raw}': count out of range"))
        })?;
        if count == 0 {
            return Err(AnimateError::configuration(format!(
                "invalid interval '{raw}': count must be > 0"
            ))
            .into());
        }

        let interval = match &captures[2] {
            "s" | "sec" | "secs" | "second" | "seconds" => Self::fixed(count, FixedUnit::Second),
            "m" | "min" | "mins" | "minute" | "minutes" => Self::fixed(count, FixedUnit::Minute),
            "h" | "hr" | "hrs" | "hour" | "hours" => Self::fixed(count, FixedUnit::Hour),
            "d" | "day" | "days" => Self::fixed(count, FixedUnit::Day),
            "w" | "week" | "weeks" => Self::fixed(count, FixedUnit::Week),
            "mo" | "mon" | "month" | "months" => Self::calendar(count, CalendarUnit::Month),
            "y" | "yr" | "yrs" | "year" | "years" => Self::calendar(count, CalendarUnit::Year),
            other => {
                return Err(AnimateError::configuration(format!(
                    "invalid interval '{raw}': unknown unit '{other}'"
                ))
                .into())
            }
        };
        Ok(interval)
    }

    fn fixed(count: u32, unit: FixedUnit) -> Self {
        Self::Fixed { count, unit }
    }

    fn calendar(count: u32, unit: CalendarUnit) -> Self {
        Self::Calendar { count, unit }
    }

    /// Exact length for fixed intervals, `None` for calendar ones.
    pub fn fixed_delta(&self) -> Option<TimeDelta> {
        let Self::Fixed { count, unit } = *self else {
            return None;
        };
        let count = i64::from(count);
        Some(match unit {
            FixedUnit::Second => TimeDelta::seconds(count),
            FixedUnit::Minute => TimeDelta::minutes(count),
            FixedUnit::Hour => TimeDelta::hours(count),
            FixedUnit::Day => TimeDelta::days(count),
            FixedUnit::Week => TimeDelta::weeks(count),
        })
    }

    /// `origin + ticks * self`, saturating at the far end of the representable range.
    pub fn advance(&self, origin: DateTime<Utc>, ticks: u64) -> DateTime<Utc> {
        match *self {
            Self::Fixed { .. } => {
                let step_ms = self
                    .fixed_delta()
                    .map_or(0, |delta| delta.num_milliseconds());
                i64::try_from(ticks)
                    .ok()
                    .and_then(|ticks| step_ms.checked_mul(ticks))
                    .and_then(TimeDelta::try_milliseconds)
                    .and_then(|offset| origin.checked_add_signed(offset))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
            Self::Calendar { count, unit } => {
                let per_tick = match unit {
                    CalendarUnit::Month => u64::from(count),
                    CalendarUnit::Year => u64::from(count) * 12,
                };
                u32::try_from(per_tick.saturating_mul(ticks))
                    .ok()
                    .and_then(|months| origin.checked_add_months(Months::new(months)))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
        }
    }

    /// Number of ticks needed to cover `[start, end]`, at least one.
    pub fn tick_count(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
        if end <= start {
            return 1;
        }
        match self.fixed_delta() {
            Some(delta) => {
                let span = (end - start).num_milliseconds();
                let step = delta.num_milliseconds().max(1);
                let ticks = span / step + i64::from(span % step != 0);
                u64::try_from(ticks).unwrap_or(1).max(1)
            }
            None => {
                let mut ticks = 1;
                while self.advance(start, ticks) < end {
                    ticks += 1;
                }
                ticks
            }
        }
    }

    /// Datetime format used by header layouts when none was configured.
    pub fn default_datetime_format(&self) -> &'static str {
        match *self {
            Self::Fixed {
                unit: FixedUnit::Second,
                ..
            } => "YYYY-MM-DD HH:mm:ss",
            Self::Fixed {
                unit: FixedUnit::Minute | FixedUnit::Hour,
                ..
            } => "YYYY-MM-DD HH:mm",
            Self::Fixed {
                unit: FixedUnit::Day | FixedUnit::Week,
                ..
            } => "YYYY-MM-DD",
            Self::Calendar {
                unit: CalendarUnit::Month,
                ..
            } => "YYYY-MM",
            Self::Calendar {
                unit: CalendarUnit::Year,
                ..
            } => "YYYY",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (count, unit) = match *self {
            Self::Fixed { count, unit } => (
                count,
                match unit {
                    FixedUnit::Second => "s",
                    FixedUnit::Minute => "min",
                    FixedUnit::Hour => "h",
                    FixedUnit::Day => "d",
                    FixedUnit::Week => "w",
                },
            ),
            Self::Calendar { count, unit } => (
                count,
                match unit {
                    CalendarUnit::Month => "mo",
                    CalendarUnit::Year => "y",
                },
            ),
        };
        write!(f, "{count}{unit}")
    }
}

/// Resolve `--datetime-format`: presets expand, empty falls back to the interval default.
pub fn resolve_datetime_format(configured: Option<&str>, interval: &Interval) -> String {
    let configured = configured.map(str::trim).unwrap_or_default();
    if configured.is_empty() {
        return interval.default_datetime_format().to_owned();
    }
    DATETIME_PRESETS
        .iter()
        .find(|(name, _)| *name == configured)
        .map_or_else(|| configured.to_owned(), |(_, format)| (*format).to_owned())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn parses_named_and_compact_forms() {
        assert_eq!(
            Interval::parse("hourly").expect("hourly parses"),
            Interval::Fixed {
                count: 1,
                unit: FixedUnit::Hour
            }
        );
        assert_eq!(
            Interval::parse("5min").expect("5min parses"),
            Interval::Fixed {
                count: 5,
                unit: FixedUnit::Minute
            }
        );
        assert_eq!(
            Interval::parse(" 30 Seconds ").expect("30 seconds parses"),
            Interval::Fixed {
                count: 30,
                unit: FixedUnit::Second
            }
        );
        assert_eq!(
            Interval::parse("2mo").expect("2mo parses"),
            Interval::Calendar {
                count: 2,
                unit: CalendarUnit::Month
            }
        );
        assert_eq!(
            Interval::parse("1y").expect("1y parses").to_string(),
            "1y".to_owned()
        );
    }

    #[test]
    fn rejects_zero_and_unknown_units() {
        assert!(Interval::parse("0min").is_err());
        assert!(Interval::parse("5 fortnights").is_err());
        assert!(Interval::parse("").is_err());
        assert!(Interval::parse("min").is_err());
    }

    #[test]
    fn near_miss_units_are_rejected_not_reinterpreted() {
        for raw in ["5ms", "5ss", "5mss", "5hs", "5ys"] {
            assert!(Interval::parse(raw).is_err(), "{raw} should be rejected");
        }
        assert_eq!(
            Interval::parse("3 hours").expect("3 hours parses"),
            Interval::parse("3h").expect("3h parses")
        );
        assert_eq!(
            Interval::parse("2 months").expect("2 months parses"),
            Interval::parse("2mo").expect("2mo parses")
        );
    }

    #[test]
    fn tick_count_rounds_up_and_never_drops_below_one() {
        let interval = Interval::parse("5s").expect("5s parses");
        let start = at(2021, 1, 1, 0, 0, 0);
        assert_eq!(interval.tick_count(start, start), 1);
        assert_eq!(interval.tick_count(start, at(2021, 1, 1, 0, 0, 10)), 2);
        assert_eq!(interval.tick_count(start, at(2021, 1, 1, 0, 0, 11)), 3);
    }

    #[test]
    fn calendar_intervals_follow_month_lengths() {
        let interval = Interval::parse("monthly").expect("monthly parses");
        let start = at(2021, 1, 31, 0, 0, 0);
        assert_eq!(interval.advance(start, 1), at(2021, 2, 28, 0, 0, 0));
        assert_eq!(
            interval.tick_count(at(2021, 1, 1, 0, 0, 0), at(2021, 12, 31, 0, 0, 0)),
            12
        );
    }

    #[test]
    fn large_tick_offsets_are_exact_until_the_calendar_runs_out() {
        let secondly = Interval::parse("1s").expect("1s parses");
        let start = at(2000, 1, 1, 0, 0, 0);
        let beyond_i32 = 3_000_000_000_u64;
        assert_eq!(
            secondly.advance(start, beyond_i32),
            start + TimeDelta::seconds(3_000_000_000)
        );
        assert_eq!(secondly.advance(start, u64::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn datetime_format_presets_and_defaults() {
        let hourly = Interval::parse("hourly").expect("hourly parses");
        assert_eq!(resolve_datetime_format(None, &hourly), "YYYY-MM-DD HH:mm");
        assert_eq!(resolve_datetime_format(Some(""), &hourly), "YYYY-MM-DD HH:mm");
        assert_eq!(
            resolve_datetime_format(Some("human-time"), &hourly),
            "[at] HH:mm:ss"
        );
        assert_eq!(resolve_datetime_format(Some("YYYY"), &hourly), "YYYY");
        let yearly = Interval::parse("yearly").expect("yearly parses");
        assert_eq!(resolve_datetime_format(None, &yearly), "YYYY");
    }
}
