use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use trendline_query::calendar::Interval;

use super::*;
use crate::timerange::TimeRange;

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn range(from: &str, to: &str) -> TimeRange {
    TimeRange::new(utc(from), utc(to)).unwrap()
}

fn bucketer() -> CalendarBucketer {
    CalendarBucketer::new(10_000)
}

#[test]
fn test_day_axis_covers_range_inclusive() {
    let axis = bucketer()
        .buckets(
            &range("2020-11-01T00:00:00Z", "2020-11-07T23:59:59Z"),
            Interval::Day,
            chrono_tz::UTC,
        )
        .unwrap();

    assert_eq!(axis.len(), 7);
    assert_eq!(
        axis.labels(),
        vec![
            "1-Nov-2020",
            "2-Nov-2020",
            "3-Nov-2020",
            "4-Nov-2020",
            "5-Nov-2020",
            "6-Nov-2020",
            "7-Nov-2020"
        ]
    );
    assert_eq!(axis.days()[0], "2020-11-01");
}

#[test]
fn test_week_axis_anchors_on_sunday() {
    // 2020-11-04 is a Wednesday
    let axis = bucketer()
        .buckets(
            &range("2020-11-04T00:00:00Z", "2020-11-20T00:00:00Z"),
            Interval::Week,
            chrono_tz::UTC,
        )
        .unwrap();

    assert_eq!(axis.labels(), vec!["1-Nov-2020", "8-Nov-2020", "15-Nov-2020"]);
}

#[test]
fn test_month_axis_rounds_down_to_first() {
    let axis = bucketer()
        .buckets(
            &range("2020-06-07T00:00:00Z", "2020-08-02T00:00:00Z"),
            Interval::Month,
            chrono_tz::UTC,
        )
        .unwrap();

    assert_eq!(axis.days(), vec!["2020-06-01", "2020-07-01", "2020-08-01"]);
    assert_eq!(axis.labels()[0], "1-Jun-2020");
}

#[test]
fn test_hour_labels_and_days() {
    let axis = bucketer()
        .buckets(
            &range("2019-12-24T03:25:00Z", "2019-12-24T05:00:00Z"),
            Interval::Hour,
            chrono_tz::UTC,
        )
        .unwrap();

    assert_eq!(
        axis.labels(),
        vec!["24-Dec-2019 03:00", "24-Dec-2019 04:00", "24-Dec-2019 05:00"]
    );
    assert_eq!(axis.days()[0], "2019-12-24 03:00:00");
}

#[test]
fn test_axis_in_team_timezone() {
    let tz: Tz = "America/Phoenix".parse().unwrap();
    let axis = bucketer()
        .buckets(
            &range("2020-01-01T07:00:00Z", "2020-01-03T06:59:59Z"),
            Interval::Day,
            tz,
        )
        .unwrap();

    assert_eq!(axis.days(), vec!["2020-01-01", "2020-01-02"]);
    assert_eq!(axis.first(), Some(utc("2020-01-01T07:00:00Z")));
}

#[test]
fn test_max_buckets() {
    let err = CalendarBucketer::new(24)
        .buckets(
            &range("2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z"),
            Interval::Hour,
            chrono_tz::UTC,
        )
        .unwrap_err();
    assert!(matches!(err, TrendsError::OutOfRange(_)));
}

#[test]
fn test_window_and_index() {
    let axis = BucketAxis::contiguous(utc("2020-01-01T00:00:00Z"), 3, Interval::Day, chrono_tz::UTC);
    let window = axis.window().unwrap();
    assert_eq!(window.from, utc("2020-01-01T00:00:00Z"));
    assert_eq!(window.to, utc("2020-01-03T23:59:59.999999Z"));
    assert_eq!(axis.index_of(utc("2020-01-02T00:00:00Z")), Some(1));
    assert_eq!(axis.index_of(utc("2020-01-02T01:00:00Z")), None);
    assert!(BucketAxis::empty(Interval::Day, chrono_tz::UTC).window().is_none());
}

#[test]
fn test_previous_period_and_tail() {
    let axis = BucketAxis::contiguous(utc("2020-01-08T00:00:00Z"), 7, Interval::Day, chrono_tz::UTC);
    let previous = axis.previous_period();
    assert_eq!(previous.len(), 7);
    assert_eq!(previous.first(), Some(utc("2020-01-02T00:00:00Z")));
    assert_eq!(previous.last(), Some(utc("2020-01-08T00:00:00Z")));

    let single = BucketAxis::contiguous(utc("2020-01-08T00:00:00Z"), 1, Interval::Day, chrono_tz::UTC);
    assert_eq!(single.previous_period().first(), Some(utc("2020-01-07T00:00:00Z")));
    assert_eq!(axis.ordinal_labels()[3], "day 3");

    let tail = axis.tail(5);
    assert_eq!(tail.days(), vec!["2020-01-13", "2020-01-14"]);
    assert!(axis.tail(9).is_empty());
}
