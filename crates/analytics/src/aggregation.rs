//! Aggregation strategies
//!
//! Reduces the raw rows returned by the executor into per-bucket values
//! aligned to a [`BucketAxis`], or into one scalar for aggregate displays.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use trendline_query::calendar::{bucket_start, localize};
use trendline_query::{ActorKind, RawRow, ValueSource};

use crate::bucket::BucketAxis;
use crate::filter::{MathSpec, PerActorMath, PropertyMath, SESSION_DURATION};

/// How raw rows reduce to a value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    /// Number of events
    Total,
    /// Distinct actors
    UniqueActors,
    /// Distinct sessions
    UniqueSessions,
    /// Distinct actors over the trailing `days` ending one day after each bucket start
    RollingActive { days: i64 },
    /// Numeric reduction; `per_session` counts each session's value once per bucket
    NumericReduce { op: PropertyMath, per_session: bool },
    /// Events per actor, over actors with at least one event
    PerActor(PerActorMath),
}

impl Aggregation {
    pub fn for_math(math: &MathSpec) -> Self {
        match math {
            MathSpec::Total => Self::Total,
            MathSpec::UniqueActors | MathSpec::UniqueGroup { .. } => Self::UniqueActors,
            MathSpec::UniqueSessions => Self::UniqueSessions,
            MathSpec::RollingActive(window) => Self::RollingActive {
                days: window.days(),
            },
            MathSpec::Property { op, property } => Self::NumericReduce {
                op: *op,
                per_session: property == SESSION_DURATION,
            },
            MathSpec::PerActor(op) => Self::PerActor(*op),
        }
    }

    /// Actor identity the executor must attach to each row
    pub fn actor_kind(math: &MathSpec, by_distinct_id: bool) -> Option<ActorKind> {
        match math {
            MathSpec::UniqueGroup { group_type_index } => Some(ActorKind::Group(*group_type_index)),
            MathSpec::UniqueActors | MathSpec::RollingActive(_) | MathSpec::PerActor(_) => {
                Some(if by_distinct_id {
                    ActorKind::DistinctId
                } else {
                    ActorKind::Person
                })
            }
            _ => None,
        }
    }

    /// Numeric value the executor must attach to each row
    pub fn value_source(math: &MathSpec) -> Option<ValueSource> {
        match math {
            MathSpec::Property { property, .. } if property == SESSION_DURATION => {
                Some(ValueSource::SessionDuration)
            }
            MathSpec::Property { property, .. } => {
                Some(ValueSource::EventProperty(property.clone()))
            }
            _ => None,
        }
    }

    /// Whether rows need their session id
    pub fn needs_sessions(&self) -> bool {
        matches!(
            self,
            Self::UniqueSessions
                | Self::NumericReduce {
                    per_session: true,
                    ..
                }
        )
    }

    /// Trailing window in days, for rolling math
    pub fn lookback_days(&self) -> Option<i64> {
        match self {
            Self::RollingActive { days } => Some(*days),
            _ => None,
        }
    }

    /// One value per bucket of `axis`; rows outside the axis are ignored
    pub fn series(&self, rows: &[RawRow], axis: &BucketAxis) -> Vec<f64> {
        if let Self::RollingActive { days } = self {
            return rolling_active(rows, axis, *days);
        }

        let mut buckets: Vec<Vec<&RawRow>> = vec![Vec::new(); axis.len()];
        for row in rows {
            if let Some(idx) = bucket_index(row, axis) {
                buckets[idx].push(row);
            }
        }
        buckets.iter().map(|bucket| self.reduce(bucket)).collect()
    }

    /// One value over every row
    ///
    /// Rolling math reports the window ending with the last bucket of `axis`.
    pub fn single(&self, rows: &[RawRow], axis: &BucketAxis) -> f64 {
        if let Self::RollingActive { days } = self {
            return axis
                .last()
                .map(|last| {
                    let tail = BucketAxis::contiguous(last, 1, axis.interval(), axis.timezone());
                    rolling_active(rows, &tail, *days)[0]
                })
                .unwrap_or(0.0);
        }
        let all: Vec<&RawRow> = rows.iter().collect();
        self.reduce(&all)
    }

    /// Running totals; unique actors count only in their first bucket
    pub fn cumulative(&self, rows: &[RawRow], axis: &BucketAxis) -> Vec<f64> {
        let per_bucket = match self {
            Self::UniqueActors => first_appearances(rows, axis),
            _ => self.series(rows, axis),
        };
        per_bucket
            .iter()
            .scan(0.0, |acc, value| {
                *acc += value;
                Some(*acc)
            })
            .collect()
    }

    fn reduce(&self, rows: &[&RawRow]) -> f64 {
        match self {
            Self::Total => rows.iter().map(|r| r.count).sum::<u64>() as f64,
            Self::UniqueActors => distinct(rows.iter().filter_map(|r| r.actor_id.as_deref())),
            Self::UniqueSessions => distinct(rows.iter().filter_map(|r| r.session_id.as_deref())),
            Self::RollingActive { .. } => {
                distinct(rows.iter().filter_map(|r| r.actor_id.as_deref()))
            }
            Self::NumericReduce { op, per_session } => {
                let values = if *per_session {
                    per_session_values(rows)
                } else {
                    rows.iter().filter_map(|r| r.value).collect()
                };
                reduce_numeric(*op, values)
            }
            Self::PerActor(op) => per_actor(*op, rows),
        }
    }
}

fn bucket_index(row: &RawRow, axis: &BucketAxis) -> Option<usize> {
    let bucket = row
        .bucket
        .unwrap_or_else(|| bucket_start(row.timestamp, axis.interval(), axis.timezone()));
    axis.index_of(bucket)
}

fn distinct<'a>(ids: impl Iterator<Item = &'a str>) -> f64 {
    ids.collect::<HashSet<_>>().len() as f64
}

/// First row's value per session, ignoring rows without a session
fn per_session_values(rows: &[&RawRow]) -> Vec<f64> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|r| {
            let session = r.session_id.as_deref()?;
            let value = r.value?;
            seen.insert(session).then_some(value)
        })
        .collect()
}

fn per_actor(op: PerActorMath, rows: &[&RawRow]) -> f64 {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for row in rows {
        if let Some(actor) = row.actor_id.as_deref() {
            *counts.entry(actor).or_default() += row.count;
        }
    }
    if counts.is_empty() {
        return 0.0;
    }
    match op {
        PerActorMath::Avg => counts.values().sum::<u64>() as f64 / counts.len() as f64,
        PerActorMath::Max => counts.values().copied().max().unwrap_or(0) as f64,
    }
}

/// Apply a numeric reduction; empty input reduces to 0
pub fn reduce_numeric(op: PropertyMath, mut values: Vec<f64>) -> f64 {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return 0.0;
    }
    match op {
        PropertyMath::Sum => values.iter().sum(),
        PropertyMath::Avg => values.iter().sum::<f64>() / values.len() as f64,
        PropertyMath::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        PropertyMath::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        PropertyMath::Median => percentile(&mut values, 50.0),
        PropertyMath::Percentile(p) => percentile(&mut values, f64::from(p)),
    }
}

/// Linear interpolation between closest ranks
fn percentile(values: &mut [f64], p: f64) -> f64 {
    values.sort_by(f64::total_cmp);
    let rank = (p / 100.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (rank - lo as f64)
}

/// Distinct actors per bucket where each actor counts only once, in the first bucket it appears
fn first_appearances(rows: &[RawRow], axis: &BucketAxis) -> Vec<f64> {
    let mut first: HashMap<&str, usize> = HashMap::new();
    for row in rows {
        let (Some(actor), Some(idx)) = (row.actor_id.as_deref(), bucket_index(row, axis)) else {
            continue;
        };
        first
            .entry(actor)
            .and_modify(|seen| *seen = (*seen).min(idx))
            .or_insert(idx);
    }
    let mut out = vec![0.0; axis.len()];
    for idx in first.into_values() {
        out[idx] += 1.0;
    }
    out
}

/// Shift an instant by whole local days
pub(crate) fn shift_days(ts: DateTime<Utc>, days: i64, tz: Tz) -> DateTime<Utc> {
    localize(ts.with_timezone(&tz).naive_local() + Duration::days(days), tz)
}

/// Inclusive instant range the executor must cover for rolling math on `axis`
pub(crate) fn rolling_bounds(axis: &BucketAxis, days: i64) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let tz = axis.timezone();
    let first = axis.first()?;
    let last = axis.last()?;
    Some((shift_days(first, 1 - days, tz), shift_days(last, 1, tz)))
}

fn rolling_active(rows: &[RawRow], axis: &BucketAxis, days: i64) -> Vec<f64> {
    let tz = axis.timezone();
    let mut events: Vec<(DateTime<Utc>, &str)> = rows
        .iter()
        .filter_map(|r| r.actor_id.as_deref().map(|actor| (r.timestamp, actor)))
        .collect();
    events.sort_unstable_by_key(|(ts, _)| *ts);

    axis.starts()
        .iter()
        .map(|start| {
            let end = shift_days(*start, 1, tz);
            let from = shift_days(end, -days, tz);
            let lo = events.partition_point(|(ts, _)| *ts <= from);
            let hi = events.partition_point(|(ts, _)| *ts <= end);
            distinct(events[lo..hi.max(lo)].iter().map(|(_, actor)| *actor))
        })
        .collect()
}
