//! Property filters
//!
//! User-facing property filters as they appear in filter params (a flat
//! list, or nested `{"type": "AND"|"OR", "values": [...]}` groups) and their
//! translation into executor predicates.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value, json};
use trendline_query::{Operator, Predicate, PropertyCondition, PropertyScope};

use crate::error::{Result, TrendsError};

/// What a property filter targets
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    Event,
    Person,
    Session,
    Group(u8),
    /// Person belongs to a cohort; the filter's value is the cohort id
    Cohort,
}

impl PropertyKind {
    /// Parse a filter `type`, with the group type index for `group`
    pub fn parse(kind: &str, group_type_index: Option<u8>) -> Result<Self> {
        match kind.to_lowercase().as_str() {
            "event" => Ok(Self::Event),
            "person" => Ok(Self::Person),
            "session" => Ok(Self::Session),
            "cohort" | "precalculated-cohort" | "static-cohort" => Ok(Self::Cohort),
            "group" => group_type_index.map(Self::Group).ok_or_else(|| {
                TrendsError::MissingField("group_type_index for group property filter".into())
            }),
            other => Err(TrendsError::InvalidFilter(format!(
                "unknown property type: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Person => "person",
            Self::Session => "session",
            Self::Group(_) => "group",
            Self::Cohort => "cohort",
        }
    }

    /// Executor scope, for everything but cohort filters
    pub fn scope(&self) -> Option<PropertyScope> {
        match self {
            Self::Event => Some(PropertyScope::Event),
            Self::Person => Some(PropertyScope::Person),
            Self::Session => Some(PropertyScope::Session),
            Self::Group(idx) => Some(PropertyScope::Group(*idx)),
            Self::Cohort => None,
        }
    }
}

/// A single property filter
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyFilter {
    pub key: String,
    pub value: Value,
    pub operator: Operator,
    pub kind: PropertyKind,
}

impl PropertyFilter {
    pub fn new(key: impl Into<String>, value: Value, operator: Operator, kind: PropertyKind) -> Self {
        Self {
            key: key.into(),
            value,
            operator,
            kind,
        }
    }

    /// Event property equals value
    pub fn event(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(key, value.into(), Operator::Exact, PropertyKind::Event)
    }

    /// Person property equals value
    pub fn person(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(key, value.into(), Operator::Exact, PropertyKind::Person)
    }

    /// Person is in cohort
    pub fn cohort(cohort_id: u64) -> Self {
        Self::new("id", Value::from(cohort_id), Operator::Exact, PropertyKind::Cohort)
    }

    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    /// Parse from a JSON object `{key, value, operator, type, group_type_index}`
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            TrendsError::InvalidFilter(format!("property filter must be an object: {value}"))
        })?;

        let key = obj
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| TrendsError::MissingField("property filter key".into()))?;

        let operator = match obj.get("operator").and_then(Value::as_str) {
            None => Operator::Exact,
            Some(op) => Operator::parse(op)
                .ok_or_else(|| TrendsError::InvalidOperator(op.to_string()))?,
        };

        let group_type_index = obj
            .get("group_type_index")
            .and_then(Value::as_u64)
            .and_then(|idx| u8::try_from(idx).ok());
        let kind = PropertyKind::parse(
            obj.get("type").and_then(Value::as_str).unwrap_or("event"),
            group_type_index,
        )?;

        let value = obj.get("value").cloned().unwrap_or(Value::Null);
        let filter = Self::new(key, value, operator, kind);
        if filter.kind == PropertyKind::Cohort && filter.cohort_id().is_none() {
            return Err(TrendsError::InvalidFilter(format!(
                "cohort filter needs a numeric cohort id, got {}",
                filter.value
            )));
        }
        Ok(filter)
    }

    /// Canonical JSON form
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("key".into(), Value::String(self.key.clone()));
        obj.insert("value".into(), self.value.clone());
        obj.insert("operator".into(), Value::String(self.operator.as_str().into()));
        obj.insert("type".into(), Value::String(self.kind.as_str().into()));
        if let PropertyKind::Group(idx) = self.kind {
            obj.insert("group_type_index".into(), Value::from(idx));
        }
        Value::Object(obj)
    }

    /// Cohort id of a cohort filter
    pub fn cohort_id(&self) -> Option<u64> {
        if self.kind != PropertyKind::Cohort {
            return None;
        }
        match &self.value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn to_predicate(&self, cohorts: &HashMap<u64, Predicate>) -> Result<Predicate> {
        match self.kind.scope() {
            Some(scope) => Ok(Predicate::property(PropertyCondition::new(
                self.key.clone(),
                scope,
                self.operator,
                self.value.clone(),
            ))),
            None => {
                let id = self.cohort_id().ok_or_else(|| {
                    TrendsError::InvalidFilter(format!("bad cohort id: {}", self.value))
                })?;
                let predicate = cohorts
                    .get(&id)
                    .cloned()
                    .ok_or(TrendsError::UnknownCohort(id))?;
                Ok(match self.operator {
                    Operator::IsNot => predicate.negate(),
                    _ => predicate,
                })
            }
        }
    }
}

/// How the members of a property group combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupOperator {
    #[default]
    And,
    Or,
}

impl GroupOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// A member of a property group
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyNode {
    Filter(PropertyFilter),
    Group(PropertyGroup),
}

/// Nested property filters
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyGroup {
    pub operator: GroupOperator,
    pub values: Vec<PropertyNode>,
}

impl PropertyGroup {
    /// AND of the given filters
    pub fn and(filters: impl IntoIterator<Item = PropertyFilter>) -> Self {
        Self {
            operator: GroupOperator::And,
            values: filters.into_iter().map(PropertyNode::Filter).collect(),
        }
    }

    /// OR of the given filters
    pub fn or(filters: impl IntoIterator<Item = PropertyFilter>) -> Self {
        Self {
            operator: GroupOperator::Or,
            values: filters.into_iter().map(PropertyNode::Filter).collect(),
        }
    }

    /// True when the group holds no filters at any depth
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(|node| match node {
            PropertyNode::Filter(_) => false,
            PropertyNode::Group(group) => group.is_empty(),
        })
    }

    /// Parse from params: null, a flat list (ANDed) or a typed group
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Array(items) => Ok(Self {
                operator: GroupOperator::And,
                values: items.iter().map(parse_node).collect::<Result<_>>()?,
            }),
            Value::Object(obj) if obj.contains_key("values") => {
                let operator = match obj.get("type").and_then(Value::as_str) {
                    None => GroupOperator::And,
                    Some(t) if t.eq_ignore_ascii_case("and") => GroupOperator::And,
                    Some(t) if t.eq_ignore_ascii_case("or") => GroupOperator::Or,
                    Some(other) => {
                        return Err(TrendsError::InvalidFilter(format!(
                            "unknown property group type: {other}"
                        )));
                    }
                };
                let values = match obj.get("values") {
                    Some(Value::Array(items)) => {
                        items.iter().map(parse_node).collect::<Result<_>>()?
                    }
                    _ => {
                        return Err(TrendsError::InvalidFilter(
                            "property group values must be a list".into(),
                        ));
                    }
                };
                Ok(Self { operator, values })
            }
            other => Err(TrendsError::InvalidFilter(format!(
                "properties must be a list or a group: {other}"
            ))),
        }
    }

    /// Canonical JSON form: members sorted, so ordering never changes the result
    pub fn to_value(&self) -> Value {
        let mut values: Vec<Value> = self
            .values
            .iter()
            .map(|node| match node {
                PropertyNode::Filter(filter) => filter.to_value(),
                PropertyNode::Group(group) => group.to_value(),
            })
            .collect();
        values.sort_by_key(|v| v.to_string());
        json!({ "type": self.operator.as_str(), "values": values })
    }

    /// Every cohort id referenced at any depth
    pub fn cohort_ids(&self) -> Vec<u64> {
        let mut ids = Vec::new();
        self.collect_cohort_ids(&mut ids);
        ids
    }

    fn collect_cohort_ids(&self, ids: &mut Vec<u64>) {
        for node in &self.values {
            match node {
                PropertyNode::Filter(filter) => {
                    if let Some(id) = filter.cohort_id()
                        && !ids.contains(&id)
                    {
                        ids.push(id);
                    }
                }
                PropertyNode::Group(group) => group.collect_cohort_ids(ids),
            }
        }
    }

    /// Translate into an executor predicate
    ///
    /// `cohorts` must hold a predicate for every id in [`cohort_ids`](Self::cohort_ids).
    pub fn to_predicate(&self, cohorts: &HashMap<u64, Predicate>) -> Result<Predicate> {
        if self.is_empty() {
            return Ok(Predicate::All);
        }
        let parts = self
            .values
            .iter()
            .filter(|node| !matches!(node, PropertyNode::Group(g) if g.is_empty()))
            .map(|node| match node {
                PropertyNode::Filter(filter) => filter.to_predicate(cohorts),
                PropertyNode::Group(group) => group.to_predicate(cohorts),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(match self.operator {
            GroupOperator::And => Predicate::and(parts),
            GroupOperator::Or => Predicate::or(parts),
        })
    }
}

fn parse_node(value: &Value) -> Result<PropertyNode> {
    match value {
        Value::Object(obj) if obj.contains_key("values") => {
            PropertyGroup::from_value(value).map(PropertyNode::Group)
        }
        _ => PropertyFilter::from_value(value).map(PropertyNode::Filter),
    }
}

impl<'de> Deserialize<'de> for PropertyGroup {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(serde::de::Error::custom)
    }
}
