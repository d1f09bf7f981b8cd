//! Engine configuration and per-request context
//!
//! [`EngineConfig`] is operator configuration, loaded once (usually from the
//! `[engine]` table of a TOML file). [`QueryContext`] is the team snapshot
//! passed with every request: timezone, test-account filters, caching
//! eligibility and actor attribution.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer};

use crate::error::{Result, TrendsError};
use crate::properties::PropertyGroup;

/// Default number of breakdown values discovered per entity
pub const DEFAULT_BREAKDOWN_LIMIT: usize = 25;

/// Default number of histogram bins
pub const DEFAULT_HISTOGRAM_BIN_COUNT: usize = 10;

/// Default cap on bucket axis length
pub const DEFAULT_MAX_BUCKETS: usize = 50_000;

/// Default number of executor queries in flight per request
pub const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 8;

/// Default result cache capacity (entries)
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Trends engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Breakdown values kept per entity when the filter does not say
    pub breakdown_limit: usize,

    /// Histogram bins when the filter enables histograms without a count
    pub histogram_bin_count: usize,

    /// Requests whose axis would exceed this many buckets are rejected
    pub max_buckets: usize,

    /// Executor queries in flight per request
    pub max_concurrent_queries: usize,

    /// Drop failing entities (with a warning) instead of failing the request
    pub isolate_entity_failures: bool,

    /// Result cache settings
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            breakdown_limit: DEFAULT_BREAKDOWN_LIMIT,
            histogram_bin_count: DEFAULT_HISTOGRAM_BIN_COUNT,
            max_buckets: DEFAULT_MAX_BUCKETS,
            max_concurrent_queries: DEFAULT_MAX_CONCURRENT_QUERIES,
            isolate_entity_failures: false,
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.breakdown_limit == 0 {
            return Err(TrendsError::Config("breakdown_limit must be > 0".into()));
        }
        if self.histogram_bin_count == 0 {
            return Err(TrendsError::Config("histogram_bin_count must be > 0".into()));
        }
        if self.max_buckets == 0 {
            return Err(TrendsError::Config("max_buckets must be > 0".into()));
        }
        if self.max_concurrent_queries == 0 {
            return Err(TrendsError::Config(
                "max_concurrent_queries must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn with_breakdown_limit(mut self, limit: usize) -> Self {
        self.breakdown_limit = limit;
        self
    }

    pub fn with_max_buckets(mut self, max_buckets: usize) -> Self {
        self.max_buckets = max_buckets;
        self
    }

    pub fn with_isolated_entity_failures(mut self, isolate: bool) -> Self {
        self.isolate_entity_failures = isolate;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

/// Result cache settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Teams whose results are cached
    pub teams: CachingTeams,

    /// Maximum number of cached entries
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            teams: CachingTeams::None,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn all_teams() -> Self {
        Self {
            teams: CachingTeams::All,
            ..Self::default()
        }
    }
}

/// Which teams participate in result caching
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CachingTeams {
    #[default]
    None,
    All,
    Only(Vec<u64>),
}

impl CachingTeams {
    /// Parse `"all"`, `"none"` or a comma-separated list of team ids
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" | "*" => Ok(Self::All),
            "none" | "" => Ok(Self::None),
            list => list
                .split(',')
                .map(|id| {
                    id.trim().parse::<u64>().map_err(|_| {
                        TrendsError::Config(format!("invalid team id in cache teams: {id}"))
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map(Self::Only),
        }
    }

    pub fn includes(&self, team_id: u64) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Only(ids) => ids.contains(&team_id),
        }
    }
}

impl<'de> Deserialize<'de> for CachingTeams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Ids(Vec<u64>),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self::parse(&s).map_err(serde::de::Error::custom),
            Raw::Ids(ids) => Ok(Self::Only(ids)),
        }
    }
}

/// Team snapshot passed with every request
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub team_id: u64,
    /// Team timezone; bucketing and relative dates use it
    pub timezone: Tz,
    /// Reference instant for relative dates
    pub now: DateTime<Utc>,
    /// Applied when the filter sets `filter_test_accounts`
    pub test_account_filters: PropertyGroup,
    /// Team-level opt-in to result caching (combined with the engine's team list)
    pub caching_enabled: bool,
    /// Count raw distinct ids instead of resolved persons
    pub aggregate_users_by_distinct_id: bool,
}

impl QueryContext {
    /// Context for a team, evaluated at the current instant
    pub fn new(team_id: u64, timezone: Tz) -> Self {
        Self {
            team_id,
            timezone,
            now: Utc::now(),
            test_account_filters: PropertyGroup::default(),
            caching_enabled: true,
            aggregate_users_by_distinct_id: false,
        }
    }

    /// Pin the reference instant
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn with_test_account_filters(mut self, filters: PropertyGroup) -> Self {
        self.test_account_filters = filters;
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching_enabled = enabled;
        self
    }

    pub fn with_aggregate_by_distinct_id(mut self, enabled: bool) -> Self {
        self.aggregate_users_by_distinct_id = enabled;
        self
    }

    /// Whether this team's requests may use the result cache
    pub fn caching_allowed(&self, config: &CacheConfig) -> bool {
        self.caching_enabled && config.teams.includes(self.team_id)
    }
}
