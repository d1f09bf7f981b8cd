//! Calendar interval arithmetic
//!
//! Buckets are aligned in the team's timezone: hours on the hour, days at
//! local midnight, weeks on Sunday and months on the 1st. Every instant is
//! carried as UTC; only truncation looks at the local wall clock.

use std::fmt;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, Months, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Bucket width of a trends axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

impl Interval {
    /// Parse from string, accepting the usual aliases
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "hour" | "hourly" | "h" => Some(Self::Hour),
            "day" | "daily" | "d" => Some(Self::Day),
            "week" | "weekly" | "w" => Some(Self::Week),
            "month" | "monthly" | "m" => Some(Self::Month),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Truncate an instant to the start of its bucket in `tz`
pub fn bucket_start(ts: DateTime<Utc>, interval: Interval, tz: Tz) -> DateTime<Utc> {
    let local = ts.with_timezone(&tz);
    match interval {
        // Subtracting the elapsed part of the hour keeps the UTC offset that
        // was in force, so the repeated hour of a DST fall-back stays distinct.
        Interval::Hour => {
            let into_hour = Duration::minutes(i64::from(local.minute()))
                + Duration::seconds(i64::from(local.second()))
                + Duration::nanoseconds(i64::from(local.nanosecond()));
            ts - into_hour
        }
        Interval::Day => start_of_local_day(local.date_naive(), tz),
        Interval::Week => {
            let date = local.date_naive();
            let back = i64::from(date.weekday().num_days_from_sunday());
            start_of_local_day(date - Duration::days(back), tz)
        }
        Interval::Month => start_of_local_day(first_of_month(local.date_naive()), tz),
    }
}

/// Move a bucket start `n` buckets forward (or backward for negative `n`)
///
/// `start` must already be a bucket start for `interval`.
pub fn step(start: DateTime<Utc>, interval: Interval, tz: Tz, n: i32) -> DateTime<Utc> {
    let date = start.with_timezone(&tz).date_naive();
    match interval {
        Interval::Hour => start + Duration::hours(i64::from(n)),
        Interval::Day => start_of_local_day(date + Duration::days(i64::from(n)), tz),
        Interval::Week => start_of_local_day(date + Duration::days(7 * i64::from(n)), tz),
        Interval::Month => start_of_local_day(shift_months(first_of_month(date), n), tz),
    }
}

/// Start of the bucket following `start`
pub fn next_bucket(start: DateTime<Utc>, interval: Interval, tz: Tz) -> DateTime<Utc> {
    step(start, interval, tz, 1)
}

/// Local midnight of `date` in `tz`, as UTC
pub fn start_of_local_day(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    localize(date.and_time(NaiveTime::MIN), tz)
}

/// Map a local wall-clock time to an instant
///
/// Ambiguous times (DST fall-back) resolve to the earlier instant. Times
/// inside a DST gap resolve to the first valid instant after the gap.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let mut probe = naive;
            for _ in 0..12 {
                probe += Duration::minutes(15);
                if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
                    return dt.with_timezone(&Utc);
                }
            }
            Utc.from_utc_datetime(&naive)
        }
    }
}

/// First day of the month containing `date`
pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Shift a date by whole months, clamping the day to the target month's length
pub fn shift_months(date: NaiveDate, n: i32) -> NaiveDate {
    let shifted = if n >= 0 {
        date.checked_add_months(Months::new(n.unsigned_abs()))
    } else {
        date.checked_sub_months(Months::new(n.unsigned_abs()))
    };
    shifted.unwrap_or(date)
}
