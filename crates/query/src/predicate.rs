//! Event predicates
//!
//! A [`Predicate`] is the boolean expression an executor applies to each
//! event: event-name matches, property comparisons across scopes and
//! explicit person membership, composed with AND / OR / NOT.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a property value is looked up
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyScope {
    /// Properties recorded on the event itself
    Event,
    /// Properties of the person behind the event
    Person,
    /// Derived per-session values (only `$session_duration`)
    Session,
    /// Properties of the group the event belongs to, by group type index
    Group(u8),
}

/// Property comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Equal to the value (or any value in a list)
    #[default]
    Exact,
    /// Not equal to the value (nor any value in a list)
    IsNot,
    /// Case-insensitive substring
    #[serde(rename = "icontains")]
    IContains,
    /// Case-insensitive substring absent
    #[serde(rename = "not_icontains")]
    NotIContains,
    /// Regex match
    Regex,
    /// Regex does not match
    NotRegex,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// Property is present and not null
    IsSet,
    /// Property is absent or null
    IsNotSet,
}

impl Operator {
    /// Parse operator from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exact" | "eq" | "=" => Some(Self::Exact),
            "is_not" | "ne" | "!=" => Some(Self::IsNot),
            "icontains" => Some(Self::IContains),
            "not_icontains" => Some(Self::NotIContains),
            "regex" => Some(Self::Regex),
            "not_regex" => Some(Self::NotRegex),
            "gt" | ">" => Some(Self::Gt),
            "gte" | ">=" => Some(Self::Gte),
            "lt" | "<" => Some(Self::Lt),
            "lte" | "<=" => Some(Self::Lte),
            "is_set" => Some(Self::IsSet),
            "is_not_set" => Some(Self::IsNotSet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::IsNot => "is_not",
            Self::IContains => "icontains",
            Self::NotIContains => "not_icontains",
            Self::Regex => "regex",
            Self::NotRegex => "not_regex",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::IsSet => "is_set",
            Self::IsNotSet => "is_not_set",
        }
    }
}

/// A single property comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyCondition {
    pub key: String,
    pub scope: PropertyScope,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,

    /// Compiled `value` for regex operators (on first match); `None` when invalid
    #[serde(skip)]
    pattern: OnceLock<Option<Regex>>,
}

impl PartialEq for PropertyCondition {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.scope == other.scope
            && self.operator == other.operator
            && self.value == other.value
    }
}

impl PropertyCondition {
    pub fn new(
        key: impl Into<String>,
        scope: PropertyScope,
        operator: Operator,
        value: Value,
    ) -> Self {
        Self {
            key: key.into(),
            scope,
            operator,
            value,
            pattern: OnceLock::new(),
        }
    }

    /// Equality on an event property
    pub fn exact(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(key, PropertyScope::Event, Operator::Exact, value.into())
    }

    /// Test an actual property value against this condition
    ///
    /// `None` and JSON null both mean the property is not set.
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        let actual = actual.filter(|v| !v.is_null());
        match self.operator {
            Operator::IsSet => actual.is_some(),
            Operator::IsNotSet => actual.is_none(),
            Operator::Exact => actual.is_some_and(|a| self.any_expected(|e| values_equal(a, e))),
            Operator::IsNot => !actual.is_some_and(|a| self.any_expected(|e| values_equal(a, e))),
            Operator::IContains => actual.is_some_and(|a| self.contains_ci(a)),
            Operator::NotIContains => !actual.is_some_and(|a| self.contains_ci(a)),
            Operator::Regex => actual.is_some_and(|a| self.regex_matches(a)),
            Operator::NotRegex => !actual.is_some_and(|a| self.regex_matches(a)),
            Operator::Gt => self.compare_numeric(actual, |a, e| a > e),
            Operator::Gte => self.compare_numeric(actual, |a, e| a >= e),
            Operator::Lt => self.compare_numeric(actual, |a, e| a < e),
            Operator::Lte => self.compare_numeric(actual, |a, e| a <= e),
        }
    }

    fn any_expected(&self, mut f: impl FnMut(&Value) -> bool) -> bool {
        match &self.value {
            Value::Array(items) => items.iter().any(f),
            single => f(single),
        }
    }

    fn contains_ci(&self, actual: &Value) -> bool {
        let haystack = value_to_string(actual).to_lowercase();
        let needle = value_to_string(&self.value).to_lowercase();
        haystack.contains(&needle)
    }

    fn regex_matches(&self, actual: &Value) -> bool {
        self.compiled_pattern()
            .is_some_and(|re| re.is_match(&value_to_string(actual)))
    }

    /// The regex for `value`, compiled once per condition
    pub fn compiled_pattern(&self) -> Option<&Regex> {
        self.pattern
            .get_or_init(|| Regex::new(&value_to_string(&self.value)).ok())
            .as_ref()
    }

    fn compare_numeric(&self, actual: Option<&Value>, cmp: impl Fn(f64, f64) -> bool) -> bool {
        match (actual.and_then(value_as_f64), value_as_f64(&self.value)) {
            (Some(a), Some(e)) => cmp(a, e),
            _ => false,
        }
    }
}

/// Read access to one event's properties, used to evaluate predicates
pub trait PropertyLookup {
    /// Event name
    fn event_name(&self) -> &str;

    /// Property value in the given scope, if present
    fn property(&self, scope: &PropertyScope, key: &str) -> Option<Value>;

    /// Resolved person id for the event, if any
    fn person_id(&self) -> Option<&str>;
}

/// Boolean predicate over events
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Predicate {
    /// Matches every event
    #[default]
    All,
    /// Event name equals
    Event(String),
    /// Property comparison
    Property(PropertyCondition),
    /// Event's person is in the set
    PersonIn(Arc<HashSet<String>>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn event(name: impl Into<String>) -> Self {
        Self::Event(name.into())
    }

    pub fn property(condition: PropertyCondition) -> Self {
        Self::Property(condition)
    }

    /// Predicate that matches nothing
    pub fn none() -> Self {
        Self::Or(Vec::new())
    }

    /// Conjunction, flattening nested ANDs and dropping `All`
    pub fn and(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flat = Vec::new();
        for part in parts {
            match part {
                Self::All => {}
                Self::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::All,
            1 => flat.pop().unwrap_or_default(),
            _ => Self::And(flat),
        }
    }

    /// Disjunction; an empty disjunction matches nothing
    pub fn or(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flat: Vec<Predicate> = parts.into_iter().collect();
        if flat.iter().any(|p| matches!(p, Self::All)) {
            return Self::All;
        }
        if flat.len() == 1 {
            return flat.pop().unwrap_or_default();
        }
        Self::Or(flat)
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Evaluate against one event
    pub fn evaluate(&self, event: &dyn PropertyLookup) -> bool {
        match self {
            Self::All => true,
            Self::Event(name) => event.event_name() == name,
            Self::Property(cond) => cond.matches(event.property(&cond.scope, &cond.key).as_ref()),
            Self::PersonIn(members) => event.person_id().is_some_and(|id| members.contains(id)),
            Self::And(parts) => parts.iter().all(|p| p.evaluate(event)),
            Self::Or(parts) => parts.iter().any(|p| p.evaluate(event)),
            Self::Not(inner) => !inner.evaluate(event),
        }
    }

    /// Whether any property condition reads the given scope
    pub fn references_scope(&self, scope: &PropertyScope) -> bool {
        match self {
            Self::Property(cond) => &cond.scope == scope,
            Self::And(parts) | Self::Or(parts) => parts.iter().any(|p| p.references_scope(scope)),
            Self::Not(inner) => inner.references_scope(scope),
            _ => false,
        }
    }
}

/// Render a property value the way comparisons and breakdown keys see it
///
/// Numbers use their shortest display form, booleans are `true`/`false`,
/// null is the empty string.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Numeric reading of a property value
///
/// Numeric strings count; everything else that is not a number is ignored.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    value_to_string(actual) == value_to_string(expected)
}
