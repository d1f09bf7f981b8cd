//! Query descriptions handed to an executor

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::calendar::Interval;
use crate::error::QueryError;
use crate::predicate::{Predicate, PropertyScope};

/// Inclusive time window `[from, to]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window, validating that `from <= to`
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, QueryError> {
        if from > to {
            return Err(QueryError::InvalidWindow(format!(
                "from ({from}) is after to ({to})"
            )));
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts <= self.to
    }
}

/// Who an event is attributed to when counting distinct actors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ActorKind {
    /// Resolved person id (falls back to the distinct id for unknown persons)
    #[default]
    Person,
    /// Raw distinct id
    DistinctId,
    /// Group key for the given group type index
    Group(u8),
}

/// Numeric value extracted per event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueSource {
    /// A numeric event property; non-numeric values are dropped
    EventProperty(String),
    /// Duration in seconds of the event's session
    SessionDuration,
}

/// A property addressed by scope and key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyRef {
    pub scope: PropertyScope,
    pub key: String,
}

impl PropertyRef {
    pub fn new(scope: PropertyScope, key: impl Into<String>) -> Self {
        Self {
            scope,
            key: key.into(),
        }
    }
}

/// Request for the events matching a predicate in a window
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub team_id: u64,
    pub predicate: Predicate,
    pub window: TimeWindow,
    /// Timezone used to assign buckets
    pub timezone: Tz,
    /// Bucket width; `None` leaves [`RawRow::bucket`](crate::RawRow::bucket) empty
    pub interval: Option<Interval>,
    /// Actor attribution; `None` leaves `actor_id` empty
    pub actor: Option<ActorKind>,
    /// Numeric value to extract; `None` leaves `value` empty
    pub value: Option<ValueSource>,
    /// Populate `session_id` on each row
    pub sessions: bool,
}

impl EventQuery {
    pub fn new(team_id: u64, predicate: Predicate, window: TimeWindow, timezone: Tz) -> Self {
        Self {
            team_id,
            predicate,
            window,
            timezone,
            interval: None,
            actor: None,
            value: None,
            sessions: false,
        }
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_actor(mut self, actor: ActorKind) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_value(mut self, value: ValueSource) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_sessions(mut self) -> Self {
        self.sessions = true;
        self
    }
}

/// Request for the distinct values of a property among matching events
#[derive(Debug, Clone)]
pub struct PropertyValuesQuery {
    pub team_id: u64,
    pub predicate: Predicate,
    pub window: TimeWindow,
    pub property: PropertyRef,
    /// Keep only the top values by event count
    pub limit: Option<usize>,
}

impl PropertyValuesQuery {
    pub fn new(team_id: u64, predicate: Predicate, window: TimeWindow, property: PropertyRef) -> Self {
        Self {
            team_id,
            predicate,
            window,
            property,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
