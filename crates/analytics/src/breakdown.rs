//! Breakdown resolution
//!
//! Turns a [`Breakdown`] into the ordered list of values an entity is split
//! by, each with the predicate fragment that selects its events. Property
//! values are discovered from the data (top N by volume); histogram bins are
//! computed from the observed numeric values; cohorts come from the
//! [`CohortResolver`].

use serde::{Serialize, Serializer};
use serde_json::Value;
use trendline_query::predicate::{value_as_f64, value_to_string};
use trendline_query::{
    EventExecutor, Operator, Predicate, PropertyCondition, PropertyRef, PropertyScope,
    PropertyValuesQuery, TimeWindow,
};

use crate::config::{DEFAULT_BREAKDOWN_LIMIT, DEFAULT_HISTOGRAM_BIN_COUNT};
use crate::error::Result;
use crate::filter::{Breakdown, CohortRef};
use crate::resolver::{CohortResolver, cohort_predicate};

/// Label used for events without the breakdown property
pub const NONE_LABEL: &str = "none";

/// Label of the `all` cohort entry
pub const ALL_USERS_LABEL: &str = "all users";

/// One breakdown dimension value
#[derive(Debug, Clone, PartialEq)]
pub enum BreakdownValue {
    /// A property value as observed
    Value(Value),
    /// Property not set
    Missing,
    Cohort(u64),
    /// The `all` cohort entry
    AllUsers,
    /// Histogram bin `[lo, hi)`; the last bin includes `hi - 0.01`
    Bin { lo: f64, hi: f64 },
}

impl BreakdownValue {
    /// Label suffix for values that need no outside lookup
    pub fn label(&self) -> String {
        match self {
            Self::Value(value) => value_to_string(value),
            Self::Missing => NONE_LABEL.to_string(),
            Self::Cohort(id) => id.to_string(),
            Self::AllUsers => ALL_USERS_LABEL.to_string(),
            Self::Bin { lo, hi } => format!("[{},{}]", format_edge(*lo), format_edge(*hi)),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Missing => Value::Null,
            Self::Cohort(id) => Value::from(*id),
            Self::AllUsers => Value::from("all"),
            Self::Bin { .. } => Value::String(self.label()),
        }
    }
}

impl Serialize for BreakdownValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// A breakdown value ready to query
#[derive(Debug, Clone)]
pub struct ResolvedBreakdown {
    pub value: BreakdownValue,
    /// Appended to the entity name: `"<entity> - <label>"`
    pub label: String,
    /// ANDed into the entity's predicate
    pub predicate: Predicate,
    /// Fixed output position; `None` orders by volume
    pub rank: Option<usize>,
}

/// Discovers breakdown values for one request
pub struct BreakdownResolver<'a> {
    executor: &'a dyn EventExecutor,
    cohorts: &'a dyn CohortResolver,
    limit: usize,
    histogram_bins: usize,
}

impl<'a> BreakdownResolver<'a> {
    pub fn new(executor: &'a dyn EventExecutor, cohorts: &'a dyn CohortResolver) -> Self {
        Self {
            executor,
            cohorts,
            limit: DEFAULT_BREAKDOWN_LIMIT,
            histogram_bins: DEFAULT_HISTOGRAM_BIN_COUNT,
        }
    }

    /// Maximum number of discovered property values
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Bin count for session breakdowns without an explicit count
    pub fn with_histogram_bins(mut self, bins: usize) -> Self {
        self.histogram_bins = bins;
        self
    }

    /// Resolve the values of `breakdown` among events matching `scope` in `window`
    pub async fn resolve(
        &self,
        breakdown: &Breakdown,
        team_id: u64,
        scope: &Predicate,
        window: TimeWindow,
    ) -> Result<Vec<ResolvedBreakdown>> {
        match breakdown {
            Breakdown::Cohorts(refs) => self.resolve_cohorts(refs, team_id).await,
            Breakdown::Property {
                scope: property_scope,
                key,
                histogram_bin_count,
            } => {
                let property = PropertyRef::new(property_scope.clone(), key.clone());
                let bins = match (property_scope, histogram_bin_count) {
                    (_, Some(bins)) => Some(*bins),
                    (PropertyScope::Session, None) => Some(self.histogram_bins),
                    _ => None,
                };
                match bins {
                    Some(bins) => {
                        self.resolve_histogram(property, bins, team_id, scope, window)
                            .await
                    }
                    None => self.resolve_values(property, team_id, scope, window).await,
                }
            }
        }
    }

    async fn resolve_values(
        &self,
        property: PropertyRef,
        team_id: u64,
        scope: &Predicate,
        window: TimeWindow,
    ) -> Result<Vec<ResolvedBreakdown>> {
        let query = PropertyValuesQuery::new(team_id, scope.clone(), window, property.clone())
            .with_limit(self.limit);
        let values = self.executor.property_values(&query).await?;
        tracing::debug!(
            team_id,
            property = %property.key,
            values = values.len(),
            limit = self.limit,
            "discovered breakdown values"
        );

        Ok(values
            .into_iter()
            .map(|counted| {
                let (value, operator, expected) = match counted.value {
                    Some(v) => (BreakdownValue::Value(v.clone()), Operator::Exact, v),
                    None => (BreakdownValue::Missing, Operator::IsNotSet, Value::Null),
                };
                let condition =
                    PropertyCondition::new(&property.key, property.scope.clone(), operator, expected);
                ResolvedBreakdown {
                    label: value.label(),
                    value,
                    predicate: Predicate::property(condition),
                    rank: None,
                }
            })
            .collect())
    }

    async fn resolve_histogram(
        &self,
        property: PropertyRef,
        bins: usize,
        team_id: u64,
        scope: &Predicate,
        window: TimeWindow,
    ) -> Result<Vec<ResolvedBreakdown>> {
        let query = PropertyValuesQuery::new(team_id, scope.clone(), window, property.clone());
        let samples: Vec<(f64, u64)> = self
            .executor
            .property_values(&query)
            .await?
            .into_iter()
            .filter_map(|counted| Some((value_as_f64(counted.value.as_ref()?)?, counted.count)))
            .collect();

        let edges = histogram_edges(samples, bins);
        tracing::debug!(team_id, property = %property.key, bins, edges = ?edges, "computed histogram edges");

        Ok(histogram_bins(&edges)
            .into_iter()
            .enumerate()
            .map(|(rank, (lo, hi))| {
                let bound = |operator, edge: f64| {
                    Predicate::property(PropertyCondition::new(
                        &property.key,
                        property.scope.clone(),
                        operator,
                        Value::from(edge),
                    ))
                };
                let value = BreakdownValue::Bin { lo, hi };
                ResolvedBreakdown {
                    label: value.label(),
                    value,
                    predicate: Predicate::and([bound(Operator::Gte, lo), bound(Operator::Lt, hi)]),
                    rank: Some(rank),
                }
            })
            .collect())
    }

    async fn resolve_cohorts(
        &self,
        refs: &[CohortRef],
        team_id: u64,
    ) -> Result<Vec<ResolvedBreakdown>> {
        let mut resolved = Vec::with_capacity(refs.len());
        for (position, cohort) in refs.iter().enumerate() {
            match cohort {
                CohortRef::All => resolved.push(ResolvedBreakdown {
                    value: BreakdownValue::AllUsers,
                    label: ALL_USERS_LABEL.to_string(),
                    predicate: Predicate::All,
                    rank: Some(position),
                }),
                CohortRef::Id(id) => {
                    let (definition, predicate) =
                        cohort_predicate(self.cohorts, team_id, *id).await?;
                    resolved.push(ResolvedBreakdown {
                        value: BreakdownValue::Cohort(*id),
                        label: definition.name,
                        predicate,
                        rank: Some(position),
                    });
                }
            }
        }
        Ok(resolved)
    }
}

fn floor_cents(v: f64) -> f64 {
    ((v * 100.0) + 1e-9).floor() / 100.0
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Quantile edges `0, 1/n, ..., 1` over weighted samples, floored to cents and de-duplicated
pub fn histogram_edges(mut samples: Vec<(f64, u64)>, bins: usize) -> Vec<f64> {
    samples.retain(|(_, count)| *count > 0);
    samples.sort_by(|a, b| a.0.total_cmp(&b.0));
    let total: u64 = samples.iter().map(|(_, count)| count).sum();
    if total == 0 || bins == 0 {
        return Vec::new();
    }

    let nth = |k: u64| -> f64 {
        let mut seen = 0;
        for (value, count) in &samples {
            seen += count;
            if k < seen {
                return *value;
            }
        }
        samples.last().map(|(value, _)| *value).unwrap_or_default()
    };

    let mut edges: Vec<f64> = Vec::with_capacity(bins + 1);
    for i in 0..=bins {
        let position = (i as f64 / bins as f64) * (total - 1) as f64;
        let lo = position.floor() as u64;
        let hi = position.ceil() as u64;
        let edge = floor_cents(nth(lo) + (nth(hi) - nth(lo)) * (position - lo as f64));
        if edges.last() != Some(&edge) {
            edges.push(edge);
        }
    }
    edges
}

/// Bins between consecutive edges; the last upper bound is extended by 0.01
pub fn histogram_bins(edges: &[f64]) -> Vec<(f64, f64)> {
    let edges: Vec<f64> = match edges {
        [] => return Vec::new(),
        [single] => vec![*single, *single],
        many => many.to_vec(),
    };
    let last = edges.len() - 2;
    edges
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let hi = if i == last {
                round_cents(pair[1] + 0.01)
            } else {
                pair[1]
            };
            (pair[0], hi)
        })
        .collect()
}

/// Edge formatting: whole numbers keep one decimal (`4.0`)
fn format_edge(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// Label and breakdown value in the legacy response format
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegacyLabel {
    pub label: String,
    pub breakdown_value: Value,
}

/// Build a legacy series label from a raw breakdown value
///
/// Missing, empty, `"None"` and `"nan"` values read `Other`; `cohort_all`
/// reads `all users`; `cohort_<id>` reads the cohort's name.
pub fn breakdown_label(
    entity_name: &str,
    raw: &Value,
    cohort_name: impl Fn(u64) -> Option<String>,
) -> LegacyLabel {
    if let Value::String(s) = raw
        && let Some(rest) = s.strip_prefix("cohort_")
    {
        if rest == "all" {
            return LegacyLabel {
                label: format!("{entity_name} - {ALL_USERS_LABEL}"),
                breakdown_value: Value::from("all"),
            };
        }
        if let Ok(id) = rest.parse::<u64>() {
            let name = cohort_name(id).unwrap_or_else(|| s.clone());
            return LegacyLabel {
                label: format!("{entity_name} - {name}"),
                breakdown_value: Value::from(id),
            };
        }
    }

    let missing = match raw {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == "None" || s == "nan",
        Value::Number(n) => n.as_f64().is_some_and(f64::is_nan),
        _ => false,
    };
    if missing {
        return LegacyLabel {
            label: format!("{entity_name} - Other"),
            breakdown_value: Value::from("Other"),
        };
    }
    LegacyLabel {
        label: format!("{entity_name} - {}", value_to_string(raw)),
        breakdown_value: raw.clone(),
    }
}

#[cfg(test)]
#[path = "breakdown_test.rs"]
mod tests;
