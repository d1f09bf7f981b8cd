//! Trends error types

use thiserror::Error;
use trendline_query::QueryError;

/// Trends engine errors
#[derive(Debug, Error)]
pub enum TrendsError {
    /// Malformed filter
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Unparseable or inverted date range
    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    /// Unknown interval
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    /// Unsupported breakdown specification
    #[error("invalid breakdown: {0}")]
    InvalidBreakdown(String),

    /// Unknown property operator
    #[error("invalid operator: {0}")]
    InvalidOperator(String),

    /// Unknown math or math without its property
    #[error("invalid math: {0}")]
    InvalidMath(String),

    /// Missing required field
    #[error("missing required field: {0}")]
    MissingField(String),

    /// Value out of range
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// Action id not known to the resolver
    #[error("action not found: {0}")]
    UnknownAction(u64),

    /// Cohort id not known to the resolver
    #[error("cohort not found: {0}")]
    UnknownCohort(u64),

    /// Collaborator could not resolve a reference
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// Executor failure, propagated unmodified
    #[error("executor error: {0}")]
    Executor(#[from] QueryError),

    /// A spawned query task panicked or was aborted
    #[error("query task failed: {0}")]
    Task(String),

    /// Request cancelled by the caller
    #[error("request cancelled")]
    Cancelled,

    /// Engine configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse error category, for callers that map errors to responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is invalid
    Validation,
    /// A referenced action or cohort could not be resolved
    Resolution,
    /// The computation failed
    Executor,
    Cancelled,
    Config,
}

impl TrendsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidFilter(_)
            | Self::InvalidDateRange(_)
            | Self::InvalidInterval(_)
            | Self::InvalidBreakdown(_)
            | Self::InvalidOperator(_)
            | Self::InvalidMath(_)
            | Self::MissingField(_)
            | Self::OutOfRange(_) => ErrorKind::Validation,
            Self::UnknownAction(_) | Self::UnknownCohort(_) | Self::Resolution(_) => {
                ErrorKind::Resolution
            }
            Self::Executor(_) | Self::Task(_) => ErrorKind::Executor,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the error is scoped to one entity and may be isolated
    pub fn is_entity_scoped(&self) -> bool {
        matches!(self.kind(), ErrorKind::Resolution | ErrorKind::Executor)
    }
}

/// Result type for trends operations
pub type Result<T> = std::result::Result<T, TrendsError>;
