//! Trends filter model
//!
//! [`Filter`] is the validated, immutable form of a trends request: which
//! entities to count, over which dates and interval, split by which
//! breakdown, reduced with which math. It is built from [`FilterParams`]
//! (the JSON request shape) or with the `with_*` builders, and serialises
//! back to canonical params for fingerprinting.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trendline_query::PropertyScope;
use trendline_query::calendar::Interval;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Result, TrendsError};
use crate::properties::PropertyGroup;
use crate::timerange::{is_all_time, parse_date};

/// Synthetic session property used by session breakdowns and session math
pub const SESSION_DURATION: &str = "$session_duration";

// =============================================================================
// Display
// =============================================================================

/// Output shape of a trends request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Display {
    #[default]
    ActionsLineGraph,
    ActionsLineGraphCumulative,
    ActionsBar,
    ActionsAreaGraph,
    ActionsTable,
    ActionsPie,
    ActionsBarValue,
    WorldMap,
    BoldNumber,
}

impl Display {
    const ALL: [Display; 9] = [
        Self::ActionsLineGraph,
        Self::ActionsLineGraphCumulative,
        Self::ActionsBar,
        Self::ActionsAreaGraph,
        Self::ActionsTable,
        Self::ActionsPie,
        Self::ActionsBarValue,
        Self::WorldMap,
        Self::BoldNumber,
    ];

    /// Parse display from string
    pub fn parse(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TrendsError::InvalidFilter(format!("unknown display: {s}")))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActionsLineGraph => "ActionsLineGraph",
            Self::ActionsLineGraphCumulative => "ActionsLineGraphCumulative",
            Self::ActionsBar => "ActionsBar",
            Self::ActionsAreaGraph => "ActionsAreaGraph",
            Self::ActionsTable => "ActionsTable",
            Self::ActionsPie => "ActionsPie",
            Self::ActionsBarValue => "ActionsBarValue",
            Self::WorldMap => "WorldMap",
            Self::BoldNumber => "BoldNumber",
        }
    }

    /// Per-bucket series rather than one aggregated value
    pub fn is_time_series(&self) -> bool {
        matches!(
            self,
            Self::ActionsLineGraph
                | Self::ActionsLineGraphCumulative
                | Self::ActionsBar
                | Self::ActionsAreaGraph
        )
    }

    pub fn is_cumulative(&self) -> bool {
        matches!(self, Self::ActionsLineGraphCumulative)
    }
}

// =============================================================================
// Math
// =============================================================================

/// Reduction over a numeric property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyMath {
    Sum,
    Avg,
    Min,
    Max,
    Median,
    /// Linear-interpolated percentile, 0..=100
    Percentile(u8),
}

impl PropertyMath {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "median" => Some(Self::Median),
            _ => s
                .strip_prefix('p')
                .filter(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
                .and_then(|digits| digits.parse::<u8>().ok())
                .filter(|p| *p <= 100)
                .map(Self::Percentile),
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            Self::Sum => "sum".into(),
            Self::Avg => "avg".into(),
            Self::Min => "min".into(),
            Self::Max => "max".into(),
            Self::Median => "median".into(),
            Self::Percentile(p) => format!("p{p}"),
        }
    }
}

/// Rolling active-actor window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollingWindow {
    Weekly,
    Monthly,
}

impl RollingWindow {
    /// Window length in days
    pub fn days(&self) -> i64 {
        match self {
            Self::Weekly => 7,
            Self::Monthly => 30,
        }
    }
}

/// Per-actor event count reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PerActorMath {
    Avg,
    Max,
}

/// What to compute per bucket for an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum MathSpec {
    /// Number of events
    #[default]
    Total,
    /// Distinct actors (`dau`)
    UniqueActors,
    /// Distinct groups of one group type
    UniqueGroup { group_type_index: u8 },
    /// Distinct sessions
    UniqueSessions,
    /// Distinct actors over a trailing window (`weekly_active`, `monthly_active`)
    RollingActive(RollingWindow),
    /// Numeric reduction over a property
    Property { op: PropertyMath, property: String },
    /// Events per actor (`avg_count_per_actor`, `max_count_per_actor`)
    PerActor(PerActorMath),
}

impl MathSpec {
    /// Parse math params, requiring the property or group index where needed
    pub fn parse(
        math: Option<&str>,
        math_property: Option<&str>,
        group_type_index: Option<u8>,
    ) -> Result<Self> {
        let math = math.map(str::trim).filter(|m| !m.is_empty());
        let Some(math) = math else {
            return Ok(Self::Total);
        };

        match math {
            "total" => Ok(Self::Total),
            "dau" => Ok(Self::UniqueActors),
            "weekly_active" => Ok(Self::RollingActive(RollingWindow::Weekly)),
            "monthly_active" => Ok(Self::RollingActive(RollingWindow::Monthly)),
            "unique_session" => Ok(Self::UniqueSessions),
            "avg_count_per_actor" => Ok(Self::PerActor(PerActorMath::Avg)),
            "max_count_per_actor" => Ok(Self::PerActor(PerActorMath::Max)),
            "unique_group" => group_type_index
                .map(|idx| Self::UniqueGroup {
                    group_type_index: idx,
                })
                .ok_or_else(|| {
                    TrendsError::InvalidMath("unique_group requires math_group_type_index".into())
                }),
            other => {
                let op = PropertyMath::parse(other)
                    .ok_or_else(|| TrendsError::InvalidMath(format!("unknown math: {other}")))?;
                let property = math_property
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        TrendsError::InvalidMath(format!("{other} requires math_property"))
                    })?;
                Ok(Self::Property {
                    op,
                    property: property.to_string(),
                })
            }
        }
    }

    /// Math string as it appears in params
    pub fn as_str(&self) -> String {
        match self {
            Self::Total => "total".into(),
            Self::UniqueActors => "dau".into(),
            Self::UniqueGroup { .. } => "unique_group".into(),
            Self::UniqueSessions => "unique_session".into(),
            Self::RollingActive(RollingWindow::Weekly) => "weekly_active".into(),
            Self::RollingActive(RollingWindow::Monthly) => "monthly_active".into(),
            Self::Property { op, .. } => op.as_str(),
            Self::PerActor(PerActorMath::Avg) => "avg_count_per_actor".into(),
            Self::PerActor(PerActorMath::Max) => "max_count_per_actor".into(),
        }
    }

    pub fn property(&self) -> Option<&str> {
        match self {
            Self::Property { property, .. } => Some(property),
            _ => None,
        }
    }

    pub fn group_type_index(&self) -> Option<u8> {
        match self {
            Self::UniqueGroup { group_type_index } => Some(*group_type_index),
            _ => None,
        }
    }
}

// =============================================================================
// Entities
// =============================================================================

/// What an entity selects
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntitySelector {
    /// Events with this name
    Event(String),
    /// Every event
    AllEvents,
    /// Events matching a stored action
    Action(u64),
}

/// One event or action series request
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub selector: EntitySelector,
    /// Display name; defaults to the event name or the action's name
    pub name: Option<String>,
    /// Position in the request
    pub order: usize,
    pub math: MathSpec,
    pub properties: PropertyGroup,
}

impl Entity {
    fn new(selector: EntitySelector) -> Self {
        Self {
            selector,
            name: None,
            order: 0,
            math: MathSpec::Total,
            properties: PropertyGroup::default(),
        }
    }

    pub fn event(name: impl Into<String>) -> Self {
        Self::new(EntitySelector::Event(name.into()))
    }

    pub fn all_events() -> Self {
        Self::new(EntitySelector::AllEvents)
    }

    pub fn action(id: u64) -> Self {
        Self::new(EntitySelector::Action(id))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_math(mut self, math: MathSpec) -> Self {
        self.math = math;
        self
    }

    pub fn with_properties(mut self, properties: PropertyGroup) -> Self {
        self.properties = properties;
        self
    }

    /// `events` or `actions`
    pub fn kind(&self) -> &'static str {
        match self.selector {
            EntitySelector::Action(_) => "actions",
            _ => "events",
        }
    }

    /// Entity id as a string (event name, action id, or empty for all events)
    pub fn id_string(&self) -> String {
        match &self.selector {
            EntitySelector::Event(name) => name.clone(),
            EntitySelector::AllEvents => String::new(),
            EntitySelector::Action(id) => id.to_string(),
        }
    }

    /// Name used in labels when no action name is available
    pub fn default_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.selector {
            EntitySelector::Event(name) => name.clone(),
            EntitySelector::AllEvents => "All events".into(),
            EntitySelector::Action(id) => format!("action {id}"),
        }
    }

    fn from_params(params: EntityParams, is_action: bool) -> Result<Self> {
        let selector = if is_action {
            let id = match &params.id {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
            .ok_or_else(|| TrendsError::InvalidFilter(format!("invalid action id: {}", params.id)))?;
            EntitySelector::Action(id)
        } else {
            match &params.id {
                Value::Null => EntitySelector::AllEvents,
                Value::String(s) => EntitySelector::Event(s.clone()),
                Value::Number(n) => EntitySelector::Event(n.to_string()),
                other => {
                    return Err(TrendsError::InvalidFilter(format!("invalid event id: {other}")));
                }
            }
        };

        let math = MathSpec::parse(
            params.math.as_deref(),
            params.math_property.as_deref(),
            params.math_group_type_index,
        )?;
        let properties = match &params.properties {
            Some(value) => PropertyGroup::from_value(value)?,
            None => PropertyGroup::default(),
        };

        Ok(Self {
            selector,
            name: params.name,
            order: params.order.unwrap_or(0),
            math,
            properties,
        })
    }

    fn to_params(&self) -> EntityParams {
        EntityParams {
            id: match &self.selector {
                EntitySelector::Event(name) => Value::String(name.clone()),
                EntitySelector::AllEvents => Value::Null,
                EntitySelector::Action(id) => Value::from(*id),
            },
            kind: Some(self.kind().to_string()),
            name: self.name.clone(),
            order: Some(self.order),
            math: (self.math != MathSpec::Total).then(|| self.math.as_str()),
            math_property: self.math.property().map(str::to_string),
            math_group_type_index: self.math.group_type_index(),
            properties: (!self.properties.is_empty()).then(|| self.properties.to_value()),
        }
    }
}

// =============================================================================
// Breakdown
// =============================================================================

/// One entry of a cohort breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CohortRef {
    /// Every actor, no membership filter
    All,
    Id(u64),
}

/// Secondary dimension splitting an entity into several series
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Breakdown {
    /// Event, person, group or session property
    Property {
        scope: PropertyScope,
        key: String,
        /// Bucket numeric values into this many quantile bins
        histogram_bin_count: Option<usize>,
    },
    /// Cohort membership, in input order
    Cohorts(Vec<CohortRef>),
}

impl Breakdown {
    pub fn event(key: impl Into<String>) -> Self {
        Self::Property {
            scope: PropertyScope::Event,
            key: key.into(),
            histogram_bin_count: None,
        }
    }

    pub fn person(key: impl Into<String>) -> Self {
        Self::Property {
            scope: PropertyScope::Person,
            key: key.into(),
            histogram_bin_count: None,
        }
    }

    pub fn session_duration() -> Self {
        Self::Property {
            scope: PropertyScope::Session,
            key: SESSION_DURATION.into(),
            histogram_bin_count: None,
        }
    }

    pub fn with_histogram(self, bins: usize) -> Self {
        match self {
            Self::Property { scope, key, .. } => Self::Property {
                scope,
                key,
                histogram_bin_count: Some(bins),
            },
            cohorts => cohorts,
        }
    }

    /// `breakdown_type` as it appears in params
    pub fn breakdown_type(&self) -> &'static str {
        match self {
            Self::Property { scope, .. } => match scope {
                PropertyScope::Event => "event",
                PropertyScope::Person => "person",
                PropertyScope::Session => "session",
                PropertyScope::Group(_) => "group",
            },
            Self::Cohorts(_) => "cohort",
        }
    }

    fn from_params(params: &FilterParams) -> Result<Option<Self>> {
        let Some(raw) = params.breakdown.as_ref().filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        let kind = params.breakdown_type.as_deref().unwrap_or("event");

        if kind.eq_ignore_ascii_case("cohort") {
            let items = match raw {
                Value::Array(items) => items.clone(),
                single => vec![single.clone()],
            };
            let refs = items
                .iter()
                .map(parse_cohort_ref)
                .collect::<Result<Vec<_>>>()?;
            if refs.is_empty() {
                return Err(TrendsError::InvalidBreakdown("empty cohort list".into()));
            }
            return Ok(Some(Self::Cohorts(refs)));
        }

        let key = match raw {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Array(items) if items.len() == 1 && items[0].is_string() => {
                items[0].as_str().unwrap_or_default().to_string()
            }
            other => {
                return Err(TrendsError::InvalidBreakdown(format!(
                    "property breakdown needs a property key, got {other}"
                )));
            }
        };

        let scope = match kind.to_lowercase().as_str() {
            "event" => PropertyScope::Event,
            "person" => PropertyScope::Person,
            "session" => {
                if key != SESSION_DURATION {
                    return Err(TrendsError::InvalidBreakdown(format!(
                        "session breakdown only supports {SESSION_DURATION}, got {key}"
                    )));
                }
                PropertyScope::Session
            }
            "group" => PropertyScope::Group(params.breakdown_group_type_index.ok_or_else(|| {
                TrendsError::MissingField("breakdown_group_type_index".into())
            })?),
            other => {
                return Err(TrendsError::InvalidBreakdown(format!(
                    "unknown breakdown_type: {other}"
                )));
            }
        };

        Ok(Some(Self::Property {
            scope,
            key,
            histogram_bin_count: params.breakdown_histogram_bin_count,
        }))
    }
}

fn parse_cohort_ref(value: &Value) -> Result<CohortRef> {
    match value {
        Value::String(s) if s == "all" || s == "cohort_all" => Ok(CohortRef::All),
        Value::String(s) => s
            .trim_start_matches("cohort_")
            .parse()
            .map(CohortRef::Id)
            .map_err(|_| TrendsError::InvalidBreakdown(format!("invalid cohort id: {s}"))),
        Value::Number(n) => n
            .as_u64()
            .map(CohortRef::Id)
            .ok_or_else(|| TrendsError::InvalidBreakdown(format!("invalid cohort id: {n}"))),
        other => Err(TrendsError::InvalidBreakdown(format!(
            "invalid cohort id: {other}"
        ))),
    }
}

// =============================================================================
// Params
// =============================================================================

/// Entity as it appears in the `events` / `actions` lists
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityParams {
    #[serde(default)]
    pub id: Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math_property: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math_group_type_index: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

/// Trends request params, in their JSON shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EntityParams>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<EntityParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown_group_type_index: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown_histogram_bin_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub compare: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub filter_test_accounts: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

// =============================================================================
// Filter
// =============================================================================

/// A validated trends request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    /// Relative or absolute expression; `None` means the default lookback
    pub date_from: Option<String>,
    /// Relative or absolute expression; `None` means now
    pub date_to: Option<String>,
    pub interval: Interval,
    /// Entities in output order
    pub entities: Vec<Entity>,
    pub breakdown: Option<Breakdown>,
    /// Overrides the engine's breakdown limit
    pub breakdown_limit: Option<usize>,
    pub display: Display,
    /// Also compute the preceding period of equal length
    pub compare: bool,
    /// Apply the team's test-account filters
    pub filter_test_accounts: bool,
    /// Global property filters, ANDed with every entity's own
    pub properties: PropertyGroup,
}

impl Filter {
    /// Create an empty filter (add entities with [`with_entity`](Self::with_entity))
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entity; its order is its position
    pub fn with_entity(mut self, mut entity: Entity) -> Self {
        entity.order = self.entities.len();
        self.entities.push(entity);
        self
    }

    pub fn with_date_from(mut self, date_from: impl Into<String>) -> Self {
        self.date_from = Some(date_from.into());
        self
    }

    pub fn with_date_to(mut self, date_to: impl Into<String>) -> Self {
        self.date_to = Some(date_to.into());
        self
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_breakdown(mut self, breakdown: Breakdown) -> Self {
        self.breakdown = Some(breakdown);
        self
    }

    pub fn with_breakdown_limit(mut self, limit: usize) -> Self {
        self.breakdown_limit = Some(limit);
        self
    }

    pub fn with_display(mut self, display: Display) -> Self {
        self.display = display;
        self
    }

    pub fn with_compare(mut self, compare: bool) -> Self {
        self.compare = compare;
        self
    }

    pub fn with_test_account_filtering(mut self, enabled: bool) -> Self {
        self.filter_test_accounts = enabled;
        self
    }

    pub fn with_properties(mut self, properties: PropertyGroup) -> Self {
        self.properties = properties;
        self
    }

    /// Parse a JSON request body
    pub fn from_json(s: &str) -> Result<Self> {
        let params: FilterParams = serde_json::from_str(s)
            .map_err(|e| TrendsError::InvalidFilter(format!("malformed filter JSON: {e}")))?;
        Self::from_params(params)
    }

    /// Build and validate from request params
    ///
    /// `events` and `actions` merge into one list ordered by `order`
    /// (events first on ties).
    pub fn from_params(params: FilterParams) -> Result<Self> {
        let interval = match params.interval.as_deref() {
            None => Interval::Day,
            Some(s) => Interval::parse(s).ok_or_else(|| TrendsError::InvalidInterval(s.into()))?,
        };
        let display = match params.display.as_deref() {
            None => Display::default(),
            Some(s) => Display::parse(s)?,
        };
        let breakdown = Breakdown::from_params(&params)?;
        let properties = match &params.properties {
            Some(value) => PropertyGroup::from_value(value)?,
            None => PropertyGroup::default(),
        };

        let mut entities = Vec::with_capacity(params.events.len() + params.actions.len());
        for p in params.events {
            entities.push(Entity::from_params(p, false)?);
        }
        for p in params.actions {
            entities.push(Entity::from_params(p, true)?);
        }
        entities.sort_by_key(|e| e.order);
        for (position, entity) in entities.iter_mut().enumerate() {
            entity.order = position;
        }

        let filter = Self {
            date_from: params.date_from,
            date_to: params.date_to,
            interval,
            entities,
            breakdown,
            breakdown_limit: params.breakdown_limit,
            display,
            compare: params.compare,
            filter_test_accounts: params.filter_test_accounts,
            properties,
        };
        filter.validate()?;
        Ok(filter)
    }

    /// Check everything that can be checked without a team context
    pub fn validate(&self) -> Result<()> {
        if self.entities.is_empty() {
            return Err(TrendsError::MissingField("events or actions".into()));
        }
        if self.breakdown_limit == Some(0) {
            return Err(TrendsError::OutOfRange("breakdown_limit must be > 0".into()));
        }
        if let Some(Breakdown::Property {
            histogram_bin_count: Some(0),
            ..
        }) = &self.breakdown
        {
            return Err(TrendsError::OutOfRange(
                "breakdown_histogram_bin_count must be > 0".into(),
            ));
        }
        if let Some(Breakdown::Property {
            scope: PropertyScope::Session,
            key,
            ..
        }) = &self.breakdown
            && key != SESSION_DURATION
        {
            return Err(TrendsError::InvalidBreakdown(format!(
                "session breakdown only supports {SESSION_DURATION}, got {key}"
            )));
        }
        for entity in &self.entities {
            if let MathSpec::Property { property, .. } = &entity.math
                && property.trim().is_empty()
            {
                return Err(TrendsError::InvalidMath("empty math_property".into()));
            }
        }

        // Syntax only; the real resolution needs the team timezone
        let now = Utc::now();
        if let Some(from) = &self.date_from
            && !is_all_time(from)
        {
            parse_date(from, chrono_tz::UTC, now)?;
        }
        if let Some(to) = &self.date_to {
            parse_date(to, chrono_tz::UTC, now)?;
        }
        Ok(())
    }

    /// Canonical params: defaults omitted, property lists sorted
    pub fn to_params(&self) -> FilterParams {
        let (actions, events): (Vec<&Entity>, Vec<&Entity>) = self
            .entities
            .iter()
            .partition(|e| matches!(e.selector, EntitySelector::Action(_)));

        let (breakdown, breakdown_type, group_index, bins) = match &self.breakdown {
            None => (None, None, None, None),
            Some(Breakdown::Cohorts(refs)) => {
                let values = refs
                    .iter()
                    .map(|r| match r {
                        CohortRef::All => Value::from("all"),
                        CohortRef::Id(id) => Value::from(*id),
                    })
                    .collect();
                (Some(Value::Array(values)), Some("cohort".to_string()), None, None)
            }
            Some(b @ Breakdown::Property {
                scope,
                key,
                histogram_bin_count,
            }) => {
                let group_index = match scope {
                    PropertyScope::Group(idx) => Some(*idx),
                    _ => None,
                };
                (
                    Some(Value::String(key.clone())),
                    Some(b.breakdown_type().to_string()),
                    group_index,
                    *histogram_bin_count,
                )
            }
        };

        FilterParams {
            date_from: self.date_from.clone(),
            date_to: self.date_to.clone(),
            interval: Some(self.interval.as_str().to_string()),
            events: events.into_iter().map(Entity::to_params).collect(),
            actions: actions.into_iter().map(Entity::to_params).collect(),
            breakdown,
            breakdown_type,
            breakdown_group_type_index: group_index,
            breakdown_histogram_bin_count: bins,
            breakdown_limit: self.breakdown_limit,
            display: (self.display != Display::default()).then(|| self.display.as_str().into()),
            compare: self.compare,
            filter_test_accounts: self.filter_test_accounts,
            properties: (!self.properties.is_empty()).then(|| self.properties.to_value()),
        }
    }

    /// Canonical JSON serialisation
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(&self.to_params()).unwrap_or_default()
    }

    /// Stable hash of the canonical serialisation
    pub fn fingerprint(&self) -> u64 {
        xxh3_64(self.canonical_json().as_bytes())
    }
}
