//! Event executor trait and implementations

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QueryError;
use crate::query::{EventQuery, PropertyValuesQuery};
use crate::result::{PropertyValueCount, RawRow};

/// Event executor trait
///
/// Storage-agnostic boundary between the trends engine and wherever events
/// live. Implementations must be safe to call concurrently.
#[async_trait]
pub trait EventExecutor: Send + Sync {
    /// Return one row per event matching the query's predicate and window
    async fn execute(&self, query: &EventQuery) -> Result<Vec<RawRow>, QueryError>;

    /// Distinct values of a property among matching events
    ///
    /// Ranked by event count descending, ties broken by the value's text.
    /// Events missing the property contribute a single `None` entry.
    async fn property_values(
        &self,
        query: &PropertyValuesQuery,
    ) -> Result<Vec<PropertyValueCount>, QueryError>;

    /// Timestamp of the team's earliest event, if it has any
    async fn earliest_timestamp(&self, team_id: u64) -> Result<Option<DateTime<Utc>>, QueryError>;

    /// Check if executor is available
    async fn health_check(&self) -> Result<(), QueryError>;

    /// Executor name for logging
    fn name(&self) -> &'static str;
}
