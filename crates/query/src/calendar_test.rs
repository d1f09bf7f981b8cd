//! Tests for calendar interval arithmetic

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::calendar::{Interval, bucket_start, localize, next_bucket, step};

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

#[test]
fn test_interval_parse() {
    assert_eq!(Interval::parse("hour"), Some(Interval::Hour));
    assert_eq!(Interval::parse("Daily"), Some(Interval::Day));
    assert_eq!(Interval::parse("week"), Some(Interval::Week));
    assert_eq!(Interval::parse("MONTH"), Some(Interval::Month));
    assert_eq!(Interval::parse("fortnight"), None);
}

#[test]
fn test_week_starts_on_sunday() {
    // 2020-01-08 is a Wednesday
    let ts = utc("2020-01-08T15:00:00Z");
    assert_eq!(
        bucket_start(ts, Interval::Week, chrono_tz::UTC),
        utc("2020-01-05T00:00:00Z")
    );

    // A Sunday is its own week start
    let sunday = utc("2020-01-05T23:59:59Z");
    assert_eq!(
        bucket_start(sunday, Interval::Week, chrono_tz::UTC),
        utc("2020-01-05T00:00:00Z")
    );
}

#[test]
fn test_month_start() {
    let ts = utc("2020-01-31T12:00:00Z");
    assert_eq!(
        bucket_start(ts, Interval::Month, chrono_tz::UTC),
        utc("2020-01-01T00:00:00Z")
    );
}

#[test]
fn test_day_uses_team_timezone() {
    let tz: Tz = "America/Los_Angeles".parse().unwrap();
    // 03:00 UTC is still Dec 31 in Los Angeles
    let ts = utc("2020-01-01T03:00:00Z");
    assert_eq!(
        bucket_start(ts, Interval::Day, tz),
        utc("2019-12-31T08:00:00Z")
    );
}

#[test]
fn test_hour_with_half_hour_offset() {
    let tz: Tz = "Asia/Kolkata".parse().unwrap();
    // 10:10 UTC is 15:40 IST, which truncates to 15:00 IST (09:30 UTC)
    let ts = utc("2020-01-01T10:10:00Z");
    assert_eq!(
        bucket_start(ts, Interval::Hour, tz),
        utc("2020-01-01T09:30:00Z")
    );
}

#[test]
fn test_hour_fall_back_keeps_repeated_hour_distinct() {
    let tz: Tz = "America/New_York".parse().unwrap();
    // 01:30 EDT and 01:30 EST on 2020-11-01
    let first = utc("2020-11-01T05:30:00Z");
    let second = utc("2020-11-01T06:30:00Z");
    assert_eq!(
        bucket_start(first, Interval::Hour, tz),
        utc("2020-11-01T05:00:00Z")
    );
    assert_eq!(
        bucket_start(second, Interval::Hour, tz),
        utc("2020-11-01T06:00:00Z")
    );
}

#[test]
fn test_day_step_across_spring_forward() {
    let tz: Tz = "America/New_York".parse().unwrap();
    let start = utc("2020-03-08T05:00:00Z");
    let next = next_bucket(start, Interval::Day, tz);
    assert_eq!(next, utc("2020-03-09T04:00:00Z"));
    assert_eq!((next - start).num_hours(), 23);
}

#[test]
fn test_step_backwards_by_months() {
    let start = utc("2020-03-01T00:00:00Z");
    assert_eq!(
        step(start, Interval::Month, chrono_tz::UTC, -2),
        utc("2020-01-01T00:00:00Z")
    );
    assert_eq!(
        step(start, Interval::Month, chrono_tz::UTC, 10),
        utc("2021-01-01T00:00:00Z")
    );
}

#[test]
fn test_step_weeks_and_hours() {
    let start = utc("2020-01-05T00:00:00Z");
    assert_eq!(
        step(start, Interval::Week, chrono_tz::UTC, -1),
        utc("2019-12-29T00:00:00Z")
    );
    assert_eq!(
        step(start, Interval::Hour, chrono_tz::UTC, 30),
        utc("2020-01-06T06:00:00Z")
    );
}

#[test]
fn test_localize_gap_moves_forward() {
    let tz: Tz = "America/New_York".parse().unwrap();
    // 02:30 does not exist on 2020-03-08
    let naive = chrono::NaiveDate::from_ymd_opt(2020, 3, 8)
        .unwrap()
        .and_hms_opt(2, 30, 0)
        .unwrap();
    let resolved = localize(naive, tz);
    assert_eq!(resolved, Utc.with_ymd_and_hms(2020, 3, 8, 7, 0, 0).unwrap());
}
