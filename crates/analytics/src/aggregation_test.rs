//! Tests for aggregation strategies

use chrono::{DateTime, Utc};
use trendline_query::RawRow;
use trendline_query::calendar::Interval;

use crate::aggregation::{Aggregation, reduce_numeric, rolling_bounds};
use crate::bucket::{BucketAxis, CalendarBucketer};
use crate::filter::{MathSpec, PerActorMath, PropertyMath};
use crate::timerange::TimeRange;

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn axis(from: &str, to: &str, interval: Interval) -> BucketAxis {
    let range = TimeRange::new(utc(from), utc(to)).unwrap();
    CalendarBucketer::new(10_000)
        .buckets(&range, interval, chrono_tz::UTC)
        .unwrap()
}

fn event(ts: &str, actor: &str) -> RawRow {
    RawRow::at(utc(ts)).with_actor(actor)
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-9, "{actual:?} vs {expected:?}");
    }
}

// ============================================================================
// Counting
// ============================================================================

#[test]
fn test_total_counts_per_bucket() {
    let rows = vec![
        event("2020-01-01T10:00:00Z", "p1"),
        event("2020-01-01T11:00:00Z", "p1"),
        event("2020-01-01T12:00:00Z", "p2"),
        event("2020-01-02T12:00:00Z", "p2"),
        // outside the axis
        event("2020-01-09T12:00:00Z", "p2"),
    ];
    let axis = axis("2020-01-01T00:00:00Z", "2020-01-03T00:00:00Z", Interval::Day);

    assert_eq!(Aggregation::Total.series(&rows, &axis), vec![3.0, 1.0, 0.0]);
}

#[test]
fn test_total_honours_row_count_and_bucket() {
    let mut row = RawRow::at(utc("2020-01-02T23:00:00Z")).with_bucket(utc("2020-01-01T00:00:00Z"));
    row.count = 5;
    let axis = axis("2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z", Interval::Day);

    assert_eq!(Aggregation::Total.series(&[row], &axis), vec![5.0, 0.0]);
}

#[test]
fn test_unique_actors() {
    let rows = vec![
        event("2020-01-01T10:00:00Z", "p1"),
        event("2020-01-01T11:00:00Z", "p1"),
        event("2020-01-01T12:00:00Z", "p2"),
        event("2020-01-02T12:00:00Z", "p2"),
        event("2020-01-02T13:00:00Z", "p3"),
    ];
    let axis = axis("2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z", Interval::Day);
    let dau = Aggregation::UniqueActors;

    assert_eq!(dau.series(&rows, &axis), vec![2.0, 2.0]);
    assert_eq!(dau.single(&rows, &axis), 3.0);
}

#[test]
fn test_unique_sessions_skip_rows_without_session() {
    let rows = vec![
        RawRow::at(utc("2020-01-01T10:00:00Z")).with_session("s1"),
        RawRow::at(utc("2020-01-01T10:05:00Z")).with_session("s1"),
        RawRow::at(utc("2020-01-01T11:00:00Z")).with_session("s2"),
        RawRow::at(utc("2020-01-01T12:00:00Z")),
    ];
    let axis = axis("2020-01-01T00:00:00Z", "2020-01-01T00:00:00Z", Interval::Day);

    assert_eq!(Aggregation::UniqueSessions.series(&rows, &axis), vec![2.0]);
}

// ============================================================================
// Rolling active actors
// ============================================================================

fn rolling_rows() -> Vec<RawRow> {
    vec![
        event("2020-01-03T12:00:00Z", "p0"),
        event("2020-01-09T12:00:00Z", "p1"),
        event("2020-01-09T12:00:00Z", "p2"),
        event("2020-01-10T12:00:00Z", "p1"),
        event("2020-01-11T12:00:00Z", "p1"),
        event("2020-01-11T12:00:00Z", "p2"),
        event("2020-01-12T12:00:00Z", "p0"),
    ]
}

const WEEKLY: Aggregation = Aggregation::RollingActive { days: 7 };

#[test]
fn test_weekly_active_daily() {
    let axis = axis("2020-01-08T00:00:00Z", "2020-01-19T00:00:00Z", Interval::Day);

    assert_eq!(
        WEEKLY.series(&rolling_rows(), &axis),
        vec![1.0, 3.0, 2.0, 2.0, 3.0, 3.0, 3.0, 3.0, 3.0, 3.0, 1.0, 0.0]
    );
}

#[test]
fn test_weekly_active_hourly_window_is_day_anchored() {
    let axis = axis("2020-01-09T06:00:00Z", "2020-01-09T17:00:00Z", Interval::Hour);

    let mut expected = vec![3.0; 6];
    expected.extend([2.0; 6]);
    assert_eq!(WEEKLY.series(&rolling_rows(), &axis), expected);
}

#[test]
fn test_weekly_active_weekly_and_monthly_intervals() {
    let weeks = axis("2020-01-01T00:00:00Z", "2020-01-12T00:00:00Z", Interval::Week);
    assert_eq!(WEEKLY.series(&rolling_rows(), &weeks), vec![0.0, 1.0, 3.0]);

    let months = axis("2019-11-15T00:00:00Z", "2020-01-10T00:00:00Z", Interval::Month);
    assert_eq!(WEEKLY.series(&rolling_rows(), &months), vec![0.0, 0.0, 0.0]);
}

#[test]
fn test_rolling_single_uses_last_window() {
    let axis = axis("2020-01-08T00:00:00Z", "2020-01-12T00:00:00Z", Interval::Day);
    assert_eq!(WEEKLY.single(&rolling_rows(), &axis), 3.0);
}

#[test]
fn test_rolling_bounds_cover_every_window() {
    let axis = axis("2020-01-08T00:00:00Z", "2020-01-19T00:00:00Z", Interval::Day);
    let (from, to) = rolling_bounds(&axis, 7).unwrap();

    assert_eq!(from, utc("2020-01-02T00:00:00Z"));
    assert_eq!(to, utc("2020-01-20T00:00:00Z"));
}

// ============================================================================
// Numeric math
// ============================================================================

#[test]
fn test_numeric_reductions() {
    let values = vec![2.0, 3.0, 5.5, 7.5];

    assert_eq!(reduce_numeric(PropertyMath::Sum, values.clone()), 18.0);
    assert_eq!(reduce_numeric(PropertyMath::Avg, values.clone()), 4.5);
    assert_eq!(reduce_numeric(PropertyMath::Min, values.clone()), 2.0);
    assert_eq!(reduce_numeric(PropertyMath::Max, values), 7.5);
    assert_eq!(reduce_numeric(PropertyMath::Sum, Vec::new()), 0.0);
}

#[test]
fn test_percentiles_over_whole_range() {
    let rows: Vec<RawRow> = (101..201)
        .map(|v| RawRow::at(utc("2020-01-01T12:00:00Z")).with_value(f64::from(v)))
        .collect();
    let axis = axis("2020-01-01T00:00:00Z", "2020-01-01T00:00:00Z", Interval::Day);

    let single = |op| Aggregation::NumericReduce { op, per_session: false }.single(&rows, &axis);
    assert!((single(PropertyMath::Median) - 150.0).abs() <= 0.5);
    assert!((single(PropertyMath::Percentile(90)) - 190.0).abs() <= 0.5);
    assert!((single(PropertyMath::Percentile(95)) - 195.0).abs() <= 0.5);
    assert!((single(PropertyMath::Percentile(99)) - 199.0).abs() <= 0.5);
}

#[test]
fn test_non_numeric_values_ignored() {
    let rows = vec![
        RawRow::at(utc("2020-01-01T12:00:00Z")).with_value(4.0),
        RawRow::at(utc("2020-01-01T13:00:00Z")),
        RawRow::at(utc("2020-01-01T14:00:00Z")).with_value(8.0),
    ];
    let axis = axis("2020-01-01T00:00:00Z", "2020-01-01T00:00:00Z", Interval::Day);
    let avg = Aggregation::NumericReduce {
        op: PropertyMath::Avg,
        per_session: false,
    };

    assert_eq!(avg.series(&rows, &axis), vec![6.0]);
}

#[test]
fn test_session_duration_counted_once_per_bucket() {
    let rows = vec![
        RawRow::at(utc("2020-01-01T23:50:00Z")).with_session("s1").with_value(600.0),
        RawRow::at(utc("2020-01-01T23:55:00Z")).with_session("s1").with_value(600.0),
        RawRow::at(utc("2020-01-02T00:00:00Z")).with_session("s1").with_value(600.0),
        RawRow::at(utc("2020-01-01T08:00:00Z")).with_session("s2").with_value(60.0),
    ];
    let axis = axis("2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z", Interval::Day);
    let sum = Aggregation::for_math(&MathSpec::Property {
        op: PropertyMath::Sum,
        property: "$session_duration".into(),
    });

    assert!(sum.needs_sessions());
    assert_eq!(sum.series(&rows, &axis), vec![660.0, 600.0]);
}

// ============================================================================
// Per-actor math
// ============================================================================

fn per_actor_rows() -> Vec<RawRow> {
    vec![
        event("2020-01-01T10:00:00Z", "p1"),
        event("2020-01-01T11:00:00Z", "p1"),
        event("2020-01-01T12:00:00Z", "p2"),
        event("2020-01-04T12:00:00Z", "p3"),
        event("2020-01-05T09:00:00Z", "p1"),
        event("2020-01-05T10:00:00Z", "p1"),
        event("2020-01-05T11:00:00Z", "p1"),
        event("2020-01-05T12:00:00Z", "p3"),
    ]
}

#[test]
fn test_avg_count_per_actor() {
    let avg = Aggregation::PerActor(PerActorMath::Avg);
    let days = axis("2020-01-01T00:00:00Z", "2020-01-07T00:00:00Z", Interval::Day);
    let weeks = axis("2020-01-01T00:00:00Z", "2020-01-07T00:00:00Z", Interval::Week);

    assert_close(
        &avg.series(&per_actor_rows(), &days),
        &[1.5, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0],
    );
    assert_close(&avg.series(&per_actor_rows(), &weeks), &[4.0 / 3.0, 2.0]);
    assert_close(&[avg.single(&per_actor_rows(), &days)], &[8.0 / 3.0]);
}

#[test]
fn test_max_count_per_actor() {
    let max = Aggregation::PerActor(PerActorMath::Max);
    let days = axis("2020-01-01T00:00:00Z", "2020-01-07T00:00:00Z", Interval::Day);

    assert_eq!(
        max.series(&per_actor_rows(), &days),
        vec![2.0, 0.0, 0.0, 1.0, 3.0, 0.0, 0.0]
    );
}

// ============================================================================
// Cumulative
// ============================================================================

#[test]
fn test_cumulative_total() {
    let rows = vec![
        event("2020-01-01T10:00:00Z", "p1"),
        event("2020-01-01T11:00:00Z", "p1"),
        event("2020-01-01T12:00:00Z", "p2"),
        event("2020-01-02T12:00:00Z", "p2"),
    ];
    let axis = axis("2020-01-01T00:00:00Z", "2020-01-03T00:00:00Z", Interval::Day);

    assert_eq!(Aggregation::Total.cumulative(&rows, &axis), vec![3.0, 4.0, 4.0]);
}

#[test]
fn test_cumulative_unique_actors_count_first_appearance() {
    let rows = vec![
        event("2020-01-01T10:00:00Z", "p1"),
        event("2020-01-02T10:00:00Z", "p1"),
        event("2020-01-02T11:00:00Z", "p2"),
        event("2020-01-03T11:00:00Z", "p2"),
        event("2020-01-03T12:00:00Z", "p3"),
    ];
    let axis = axis("2020-01-01T00:00:00Z", "2020-01-03T00:00:00Z", Interval::Day);

    assert_eq!(
        Aggregation::UniqueActors.cumulative(&rows, &axis),
        vec![1.0, 2.0, 3.0]
    );
}

#[test]
fn test_actor_kind_for_math() {
    use trendline_query::ActorKind;

    assert_eq!(Aggregation::actor_kind(&MathSpec::Total, false), None);
    assert_eq!(
        Aggregation::actor_kind(&MathSpec::UniqueActors, false),
        Some(ActorKind::Person)
    );
    assert_eq!(
        Aggregation::actor_kind(&MathSpec::UniqueActors, true),
        Some(ActorKind::DistinctId)
    );
    assert_eq!(
        Aggregation::actor_kind(&MathSpec::UniqueGroup { group_type_index: 1 }, true),
        Some(ActorKind::Group(1))
    );
}
