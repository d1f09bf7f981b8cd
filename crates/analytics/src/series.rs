//! Trends result types
//!
//! One [`SeriesResult`] per (entity × breakdown value × period), either a
//! per-bucket series aligned to the bucket axis or a single aggregated value.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bucket::BucketAxis;
use crate::filter::{Entity, EntitySelector};

/// Which period of a comparison a series belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareLabel {
    Current,
    Previous,
}

/// Echo of the entity a series was computed for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub id: Value,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub order: usize,
    pub math: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub math_property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub math_group_type_index: Option<u8>,
}

impl ActionSummary {
    /// Summary of `entity` under its resolved display name
    pub fn new(entity: &Entity, name: impl Into<String>) -> Self {
        Self {
            id: match &entity.selector {
                EntitySelector::Event(event) => Value::String(event.clone()),
                EntitySelector::AllEvents => Value::Null,
                EntitySelector::Action(id) => Value::from(*id),
            },
            kind: entity.kind().to_string(),
            name: name.into(),
            order: entity.order,
            math: entity.math.as_str(),
            math_property: entity.math.property().map(str::to_string),
            math_group_type_index: entity.math.group_type_index(),
        }
    }
}

/// Enough of a result cell for an actor-listing endpoint to rebuild its query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorsSelector {
    pub entity_id: Value,
    pub entity_type: String,
    pub entity_math: String,
    /// Inclusive start of the cell (RFC 3339)
    pub date_from: String,
    /// Exclusive end of the cell (RFC 3339)
    pub date_to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown_value: Option<Value>,
}

impl ActorsSelector {
    pub fn new(entity: &Entity, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        let summary = ActionSummary::new(entity, String::new());
        Self {
            entity_id: summary.id,
            entity_type: summary.kind,
            entity_math: summary.math,
            date_from: from.to_rfc3339_opts(SecondsFormat::Secs, true),
            date_to: to.to_rfc3339_opts(SecondsFormat::Secs, true),
            breakdown_type: None,
            breakdown_value: None,
        }
    }

    pub fn with_breakdown(mut self, breakdown_type: &str, value: Value) -> Self {
        self.breakdown_type = Some(breakdown_type.to_string());
        self.breakdown_value = Some(value);
        self
    }

    /// One selector per bucket of `axis`
    pub fn per_bucket(entity: &Entity, axis: &BucketAxis) -> Vec<Self> {
        axis.starts()
            .iter()
            .enumerate()
            .filter_map(|(idx, start)| Some(Self::new(entity, *start, axis.bucket_end(idx)?)))
            .collect()
    }
}

/// One output series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesResult {
    /// `"<entity>"` or `"<entity> - <breakdown label>"`
    pub label: String,
    /// Sum of `data`, or the aggregated value
    pub count: f64,
    /// Per-bucket values; empty for aggregate displays
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days: Vec<String>,
    /// Single value for aggregate displays
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregated_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_label: Option<CompareLabel>,
    pub action: ActionSummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub persons: Vec<ActorsSelector>,
}

impl SeriesResult {
    /// Per-bucket series over `axis`
    ///
    /// `count` is the sum of `counts`, which differ from `data` only for
    /// cumulative displays. Ordinal axes label buckets `day N`.
    pub fn time_series(
        label: impl Into<String>,
        action: ActionSummary,
        data: Vec<f64>,
        counts: &[f64],
        axis: &BucketAxis,
        ordinal: bool,
    ) -> Self {
        Self {
            label: label.into(),
            count: counts.iter().sum(),
            data,
            labels: if ordinal {
                axis.ordinal_labels()
            } else {
                axis.labels()
            },
            days: axis.days(),
            aggregated_value: None,
            breakdown_value: None,
            compare_label: None,
            action,
            persons: Vec::new(),
        }
    }

    /// Single aggregated value
    pub fn aggregate(label: impl Into<String>, action: ActionSummary, value: f64) -> Self {
        Self {
            label: label.into(),
            count: value,
            data: Vec::new(),
            labels: Vec::new(),
            days: Vec::new(),
            aggregated_value: Some(value),
            breakdown_value: None,
            compare_label: None,
            action,
            persons: Vec::new(),
        }
    }

    pub fn with_breakdown_value(mut self, value: Value) -> Self {
        self.breakdown_value = Some(value);
        self
    }

    pub fn with_compare_label(mut self, compare: CompareLabel) -> Self {
        self.compare_label = Some(compare);
        self
    }

    pub fn with_persons(mut self, persons: Vec<ActorsSelector>) -> Self {
        self.persons = persons;
        self
    }

    pub fn is_aggregate(&self) -> bool {
        self.aggregated_value.is_some()
    }
}
