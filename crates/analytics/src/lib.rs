//! Trendline Trends Engine
//!
//! Computes per-bucket time series (or single aggregated values) of event
//! activity from a declarative [`Filter`], built on top of `trendline-query`.
//!
//! # Overview
//!
//! - **Filters**: entities, math, breakdowns, date expressions and display
//! - **Bucketing**: calendar-aware bucket axes in the team's timezone
//! - **Breakdowns**: value discovery, histogram bins and cohort splits
//! - **Aggregation**: counts, unique actors, rolling windows, property math
//! - **Caching**: results keyed by filter fingerprint, refreshed incrementally
//!
//! # Usage
//!
//! ```ignore
//! use trendline_analytics::{EngineConfig, Entity, Filter, QueryContext, TrendsEngine};
//!
//! let engine = TrendsEngine::new(executor, EngineConfig::default())?;
//!
//! let filter = Filter::new()
//!     .with_date_from("-7d")
//!     .with_entity(Entity::event("sign up"));
//!
//! let ctx = QueryContext::new(team_id, chrono_tz::UTC);
//! let series = engine.run(&filter, &ctx).await?;
//! ```
//!
//! # Comparison Support
//!
//! ```ignore
//! // Each series is followed by its previous-period counterpart
//! let series = engine.run(&filter.with_compare(true), &ctx).await?;
//! ```

pub mod aggregation;
pub mod breakdown;
pub mod bucket;
pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod properties;
pub mod resolver;
pub mod series;
pub mod timerange;
pub mod trends;

#[cfg(test)]
mod aggregation_test;

// Re-exports for convenience
pub use aggregation::Aggregation;
pub use breakdown::{BreakdownResolver, BreakdownValue, ResolvedBreakdown, breakdown_label};
pub use bucket::{BucketAxis, CalendarBucketer};
pub use cache::{CacheEntry, CacheStats, ResultCache};
pub use config::{CacheConfig, CachingTeams, EngineConfig, QueryContext};
pub use error::{ErrorKind, Result, TrendsError};
pub use filter::{
    Breakdown, CohortRef, Display, Entity, EntitySelector, Filter, FilterParams, MathSpec,
    PerActorMath, PropertyMath, RollingWindow,
};
pub use properties::{GroupOperator, PropertyFilter, PropertyGroup, PropertyKind};
pub use resolver::{
    ActionDefinition, ActionResolver, ActionStep, CohortDefinition, CohortResolver, StaticCatalog,
};
pub use series::{ActionSummary, ActorsSelector, CompareLabel, SeriesResult};
pub use timerange::TimeRange;
pub use trends::TrendsEngine;
