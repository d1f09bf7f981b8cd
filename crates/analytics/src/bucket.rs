//! Calendar bucketing
//!
//! [`CalendarBucketer`] turns a resolved date range into a [`BucketAxis`]:
//! the ordered bucket starts covering the range in the team's timezone,
//! with display labels and `days` strings per bucket.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use trendline_query::TimeWindow;
use trendline_query::calendar::{Interval, bucket_start, next_bucket, step};

use crate::error::{Result, TrendsError};
use crate::timerange::TimeRange;

/// Builds bucket axes, refusing ranges that would produce too many buckets
#[derive(Debug, Clone, Copy)]
pub struct CalendarBucketer {
    max_buckets: usize,
}

impl CalendarBucketer {
    pub fn new(max_buckets: usize) -> Self {
        Self { max_buckets }
    }

    /// Buckets covering `range`
    ///
    /// The first bucket contains `range.start`, the last contains
    /// `range.end`; a partial final bucket is kept whole.
    pub fn buckets(&self, range: &TimeRange, interval: Interval, tz: Tz) -> Result<BucketAxis> {
        let mut starts = Vec::new();
        let mut current = bucket_start(range.start, interval, tz);
        while current <= range.end {
            if starts.len() == self.max_buckets {
                return Err(TrendsError::OutOfRange(format!(
                    "date range needs more than {} {} buckets",
                    self.max_buckets, interval
                )));
            }
            starts.push(current);
            current = next_bucket(current, interval, tz);
        }
        Ok(BucketAxis {
            interval,
            timezone: tz,
            starts,
        })
    }
}

/// Ordered, contiguous bucket starts for one interval and timezone
#[derive(Debug, Clone, PartialEq)]
pub struct BucketAxis {
    interval: Interval,
    timezone: Tz,
    starts: Vec<DateTime<Utc>>,
}

impl BucketAxis {
    /// An axis with no buckets
    pub fn empty(interval: Interval, timezone: Tz) -> Self {
        Self {
            interval,
            timezone,
            starts: Vec::new(),
        }
    }

    /// `len` contiguous buckets from `first`, which must be a bucket start
    pub fn contiguous(first: DateTime<Utc>, len: usize, interval: Interval, timezone: Tz) -> Self {
        let mut starts = Vec::with_capacity(len);
        let mut current = first;
        for _ in 0..len {
            starts.push(current);
            current = next_bucket(current, interval, timezone);
        }
        Self {
            interval,
            timezone,
            starts,
        }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn starts(&self) -> &[DateTime<Utc>] {
        &self.starts
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn first(&self) -> Option<DateTime<Utc>> {
        self.starts.first().copied()
    }

    pub fn last(&self) -> Option<DateTime<Utc>> {
        self.starts.last().copied()
    }

    /// Position of a bucket start on this axis
    pub fn index_of(&self, bucket: DateTime<Utc>) -> Option<usize> {
        self.starts.binary_search(&bucket).ok()
    }

    /// Exclusive end of the bucket at `idx`
    pub fn bucket_end(&self, idx: usize) -> Option<DateTime<Utc>> {
        self.starts
            .get(idx)
            .map(|start| next_bucket(*start, self.interval, self.timezone))
    }

    /// Inclusive window spanning every bucket
    pub fn window(&self) -> Option<TimeWindow> {
        let first = self.first()?;
        let end = self.bucket_end(self.len() - 1)?;
        Some(TimeWindow {
            from: first,
            to: end - Duration::microseconds(1),
        })
    }

    /// The buckets from `idx` onwards
    pub fn tail(&self, idx: usize) -> Self {
        Self {
            interval: self.interval,
            timezone: self.timezone,
            starts: self.starts.get(idx..).map(<[_]>::to_vec).unwrap_or_default(),
        }
    }

    /// The equal-length axis shifted back by the range length
    ///
    /// The range spans `len - 1` bucket steps (at least one), so the
    /// previous axis ends on the bucket where this one starts.
    pub fn previous_period(&self) -> Self {
        match self.first() {
            Some(first) => {
                let span = i32::try_from(self.len().saturating_sub(1).max(1)).unwrap_or(i32::MAX);
                let start = step(first, self.interval, self.timezone, -span);
                Self::contiguous(start, self.len(), self.interval, self.timezone)
            }
            None => self.clone(),
        }
    }

    /// Display labels, e.g. `1-Jan-2020` or `24-Dec-2019 03:00`
    pub fn labels(&self) -> Vec<String> {
        self.starts
            .iter()
            .map(|s| format_label(*s, self.interval, self.timezone))
            .collect()
    }

    /// Ordinal labels used for comparison periods: `day 0`, `day 1`, ...
    pub fn ordinal_labels(&self) -> Vec<String> {
        (0..self.len()).map(|i| format!("day {i}")).collect()
    }

    /// Machine-readable bucket starts, e.g. `2020-01-02` or `2020-01-09 06:00:00`
    pub fn days(&self) -> Vec<String> {
        self.starts
            .iter()
            .map(|s| format_day(*s, self.interval, self.timezone))
            .collect()
    }
}

/// Display label for a bucket start
pub fn format_label(start: DateTime<Utc>, interval: Interval, tz: Tz) -> String {
    let local = start.with_timezone(&tz);
    match interval {
        Interval::Hour => local.format("%-d-%b-%Y %H:%M").to_string(),
        _ => local.format("%-d-%b-%Y").to_string(),
    }
}

/// `days` entry for a bucket start
pub fn format_day(start: DateTime<Utc>, interval: Interval, tz: Tz) -> String {
    let local = start.with_timezone(&tz);
    match interval {
        Interval::Hour => local.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => local.format("%Y-%m-%d").to_string(),
    }
}

#[cfg(test)]
#[path = "bucket_test.rs"]
mod tests;
