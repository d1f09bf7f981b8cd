//! Trendline Query - event query execution for trends analytics
//!
//! The analytics engine never touches storage directly. It describes the
//! events it needs as an [`EventQuery`] and hands it to an [`EventExecutor`],
//! which returns one [`RawRow`] per matching event.
//!
//! - [`calendar`]: interval truncation shared by executors and the engine
//! - [`predicate`]: boolean event predicates (event names, property tests, cohorts)
//! - [`backend`]: the executor trait and the in-memory reference backend
//!
//! # Usage
//!
//! ```ignore
//! use trendline_query::{EventExecutor, EventQuery, MemoryBackend, Predicate, TimeWindow};
//!
//! let backend = MemoryBackend::new();
//! backend.load_events_file("events.jsonl")?;
//!
//! let query = EventQuery::new(1, Predicate::event("$pageview"), window, chrono_tz::UTC)
//!     .with_interval(Interval::Day);
//! let rows = backend.execute(&query).await?;
//! ```

pub mod backend;
pub mod calendar;
pub mod error;
pub mod predicate;
pub mod query;
pub mod result;

#[cfg(test)]
mod calendar_test;
#[cfg(test)]
mod predicate_test;

// Re-exports
pub use backend::EventExecutor;
pub use backend::memory::{EventRecord, GroupRecord, MemoryBackend, PersonRecord};
pub use calendar::Interval;
pub use error::QueryError;
pub use predicate::{Operator, Predicate, PropertyCondition, PropertyLookup, PropertyScope};
pub use query::{ActorKind, EventQuery, PropertyRef, PropertyValuesQuery, TimeWindow, ValueSource};
pub use result::{PropertyValueCount, RawRow};
