//! Executor result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One matching event, as seen by the aggregation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub timestamp: DateTime<Utc>,
    /// Bucket start, when the query asked for an interval
    pub bucket: Option<DateTime<Utc>>,
    pub actor_id: Option<String>,
    pub session_id: Option<String>,
    pub value: Option<f64>,
    /// Number of events this row stands for
    pub count: u64,
}

impl RawRow {
    /// A single-event row with nothing but a timestamp
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            bucket: None,
            actor_id: None,
            session_id: None,
            value: None,
            count: 1,
        }
    }

    pub fn with_bucket(mut self, bucket: DateTime<Utc>) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor_id = Some(actor.into());
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session_id = Some(session.into());
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// A distinct property value and how many matching events carry it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValueCount {
    /// `None` when the property is missing on the counted events
    pub value: Option<Value>,
    pub count: u64,
}
