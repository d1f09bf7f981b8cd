//! Date range resolution
//!
//! Resolves `date_from` / `date_to` expressions against a reference "now"
//! in the team's timezone.
//!
//! Supported expressions:
//! - Relative: `-24h`, `-7d`, `-2w`, `-1m`, `-1q`, `-1y` (the leading `-` is optional)
//! - Anchored: `dStart`, `mStart`, `yStart`, `-1mStart`, `-1mEnd`, `-1yStart`
//! - Absolute: `2020-01-02`, `2020-6-7`, `2020-01-02 06:00:00`, RFC 3339
//! - `all` (date_from only): the team's first event

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use trendline_query::calendar::{
    Interval, bucket_start, first_of_month, localize, shift_months, start_of_local_day,
};

use crate::error::{Result, TrendsError};

/// `date_from` meaning "since the team's first event"
pub const ALL_TIME: &str = "all";

/// `date_from` used when the filter has none
pub const DEFAULT_DATE_FROM: &str = "-7d";

/// A resolved date expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    pub instant: DateTime<Utc>,
    /// The expression names a whole day rather than an instant
    pub day_granular: bool,
}

impl ResolvedDate {
    fn day(date: NaiveDate, tz: Tz) -> Self {
        Self {
            instant: start_of_local_day(date, tz),
            day_granular: true,
        }
    }

    fn instant(instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            day_granular: false,
        }
    }
}

/// A resolved date range, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(TrendsError::InvalidDateRange(format!(
                "date_from ({start}) is after date_to ({end})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Resolve filter date expressions
    ///
    /// `earliest` is the team's first event timestamp, only consulted for
    /// `date_from = "all"`. Returns `Ok(None)` when `all` has nothing to
    /// anchor to (no events, or the first event is after `date_to`).
    pub fn resolve(
        date_from: Option<&str>,
        date_to: Option<&str>,
        tz: Tz,
        now: DateTime<Utc>,
        earliest: Option<DateTime<Utc>>,
    ) -> Result<Option<Self>> {
        let end = match date_to {
            None => now,
            Some(expr) => {
                let resolved = parse_date(expr, tz, now)?;
                if resolved.day_granular {
                    end_of_local_day(resolved.instant, tz)
                } else {
                    resolved.instant
                }
            }
        };

        let from = date_from.unwrap_or(DEFAULT_DATE_FROM);
        if is_all_time(from) {
            return match earliest {
                Some(first) => {
                    let start = bucket_start(first, Interval::Day, tz);
                    if start > end {
                        Ok(None)
                    } else {
                        Self::new(start, end).map(Some)
                    }
                }
                None => Ok(None),
            };
        }

        let start = parse_date(from, tz, now)?.instant;
        Self::new(start, end).map(Some)
    }

    /// Get the duration of this range
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Whether a `date_from` expression means "since the first event"
pub fn is_all_time(expr: &str) -> bool {
    expr.trim().eq_ignore_ascii_case(ALL_TIME)
}

/// Parse a single date expression
pub fn parse_date(expr: &str, tz: Tz, now: DateTime<Utc>) -> Result<ResolvedDate> {
    let s = expr.trim();
    if let Some(resolved) = parse_relative(s, tz, now) {
        return Ok(resolved);
    }
    if let Some(resolved) = parse_absolute(s, tz) {
        return Ok(resolved);
    }
    Err(TrendsError::InvalidDateRange(format!(
        "unknown date format: {expr}"
    )))
}

/// Last instant of the local day containing `instant`
pub fn end_of_local_day(instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let date = instant.with_timezone(&tz).date_naive();
    start_of_local_day(date + Duration::days(1), tz) - Duration::microseconds(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    None,
    Start,
    End,
}

fn parse_relative(s: &str, tz: Tz, now: DateTime<Utc>) -> Option<ResolvedDate> {
    let body = s.strip_prefix('-').unwrap_or(s);
    let (body, anchor) = if let Some(rest) = body.strip_suffix("Start") {
        (rest, Anchor::Start)
    } else if let Some(rest) = body.strip_suffix("End") {
        (rest, Anchor::End)
    } else {
        (body, Anchor::None)
    };

    let unit = body.chars().last()?;
    let digits = &body[..body.len() - unit.len_utf8()];
    let n: i64 = if digits.is_empty() {
        0
    } else if digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok()?
    } else {
        return None;
    };
    let months = i32::try_from(n).ok()?;

    let today = now.with_timezone(&tz).date_naive();
    let date = match (unit, anchor) {
        ('h', Anchor::None) => {
            let instant = bucket_start(now - Duration::hours(n), Interval::Hour, tz);
            return Some(ResolvedDate::instant(instant));
        }
        ('d', _) => today - Duration::days(n),
        ('w', Anchor::None) => today - Duration::weeks(n),
        ('w', Anchor::Start) => week_start(today - Duration::weeks(n)),
        ('w', Anchor::End) => week_start(today - Duration::weeks(n)) + Duration::days(6),
        ('m', Anchor::None) => shift_months(today, -months),
        ('m', Anchor::Start) => first_of_month(shift_months(today, -months)),
        ('m', Anchor::End) => last_of_month(shift_months(today, -months)),
        ('q', Anchor::None) => shift_months(today, -3 * months),
        ('q', Anchor::Start) => quarter_start(shift_months(today, -3 * months)),
        ('q', Anchor::End) => {
            last_of_month(shift_months(quarter_start(shift_months(today, -3 * months)), 2))
        }
        ('y', Anchor::None) => shift_months(today, -12 * months),
        ('y', Anchor::Start) => shift_months(today, -12 * months).with_ordinal(1)?,
        ('y', Anchor::End) => {
            let year = shift_months(today, -12 * months).year();
            NaiveDate::from_ymd_opt(year, 12, 31)?
        }
        _ => return None,
    };

    Some(ResolvedDate::day(date, tz))
}

fn parse_absolute(s: &str, tz: Tz) -> Option<ResolvedDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(ResolvedDate::instant(dt.with_timezone(&Utc)));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(ResolvedDate::day(date, tz));
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| ResolvedDate::instant(localize(naive, tz)))
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_sunday()))
}

fn quarter_start(date: NaiveDate) -> NaiveDate {
    let month = ((date.month() - 1) / 3) * 3 + 1;
    NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
}

fn last_of_month(date: NaiveDate) -> NaiveDate {
    first_of_month(shift_months(first_of_month(date), 1)) - Duration::days(1)
}
