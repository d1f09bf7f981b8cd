//! Trends orchestration
//!
//! [`TrendsEngine::run`] takes a validated [`Filter`] and a [`QueryContext`]
//! through these steps:
//!
//! 1. resolve the date range and bucket axis
//! 2. resolve each entity's predicate (actions, cohorts, global and
//!    test-account filters) and its breakdown values
//! 3. issue one executor query per (entity × breakdown value × period),
//!    concurrently and bounded by `max_concurrent_queries`
//! 4. aggregate, label and order the series; splice with the result cache
//!    when a usable entry exists
//!
//! Output order never depends on query completion order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use trendline_query::calendar::bucket_start;
use trendline_query::{EventExecutor, EventQuery, Predicate, TimeWindow};

use crate::aggregation::{Aggregation, rolling_bounds};
use crate::breakdown::{BreakdownResolver, ResolvedBreakdown};
use crate::bucket::{BucketAxis, CalendarBucketer};
use crate::cache::{CacheEntry, ResultCache, cache_key, series_key};
use crate::config::{EngineConfig, QueryContext};
use crate::error::{Result, TrendsError};
use crate::filter::{Entity, EntitySelector, Filter};
use crate::properties::PropertyGroup;
use crate::resolver::{ActionResolver, CohortResolver, StaticCatalog, cohort_predicates};
use crate::series::{ActionSummary, ActorsSelector, CompareLabel, SeriesResult};
use crate::timerange::{TimeRange, is_all_time};

/// Which period a query covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Period {
    Current,
    Previous,
}

/// What each query reduces to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Series,
    Cumulative,
    Single,
}

enum JobOutput {
    /// `counts` is the non-cumulative form of `data`
    Series { data: Vec<f64>, counts: Vec<f64> },
    Single(f64),
}

impl JobOutput {
    fn zero(mode: OutputMode, len: usize) -> Self {
        match mode {
            OutputMode::Single => Self::Single(0.0),
            _ => Self::Series {
                data: vec![0.0; len],
                counts: vec![0.0; len],
            },
        }
    }
}

/// One executor query and how to reduce it
struct Job {
    query: EventQuery,
    aggregation: Aggregation,
    axis: BucketAxis,
}

impl Job {
    async fn run(self, executor: &dyn EventExecutor, mode: OutputMode) -> Result<JobOutput> {
        let rows = executor.execute(&self.query).await?;
        tracing::debug!(
            team_id = self.query.team_id,
            rows = rows.len(),
            buckets = self.axis.len(),
            "aggregating query rows"
        );
        Ok(match mode {
            OutputMode::Series => {
                let data = self.aggregation.series(&rows, &self.axis);
                JobOutput::Series {
                    counts: data.clone(),
                    data,
                }
            }
            OutputMode::Cumulative => JobOutput::Series {
                data: self.aggregation.cumulative(&rows, &self.axis),
                counts: self.aggregation.series(&rows, &self.axis),
            },
            OutputMode::Single => JobOutput::Single(self.aggregation.single(&rows, &self.axis)),
        })
    }
}

/// A resolved entity, ready to query
struct EntityPlan {
    entity: Entity,
    name: String,
    predicate: Predicate,
    /// `None` queries the whole entity
    splits: Vec<Option<ResolvedBreakdown>>,
    /// A breakdown was requested but no values exist: emit zeros without querying
    empty_breakdown: bool,
}

/// Assembled series plus how many entities were dropped as isolated failures
#[derive(Default)]
struct Computed {
    series: Vec<SeriesResult>,
    dropped: usize,
}

/// Everything fixed for one request once dates are resolved
struct RequestScope<'a> {
    filter: &'a Filter,
    ctx: &'a QueryContext,
    range: TimeRange,
    axis: BucketAxis,
    mode: OutputMode,
}

impl RequestScope<'_> {
    fn periods(&self) -> &'static [Period] {
        if self.filter.compare {
            &[Period::Current, Period::Previous]
        } else {
            &[Period::Current]
        }
    }

    /// Axis a period's values align to; `resume` trims the current axis to its tail
    fn period_axis(&self, period: Period, resume: usize) -> BucketAxis {
        match period {
            Period::Current if resume > 0 => self.axis.tail(resume),
            Period::Current => self.axis.clone(),
            Period::Previous => self.axis.previous_period(),
        }
    }

    /// Executor window for a period axis
    fn window(&self, period: Period, axis: &BucketAxis, aggregation: &Aggregation) -> Option<TimeWindow> {
        if let Some(days) = aggregation.lookback_days() {
            let (from, to) = rolling_bounds(axis, days)?;
            return Some(TimeWindow { from, to });
        }
        match period {
            Period::Current => Some(TimeWindow {
                from: axis.first()?,
                to: self.range.end,
            }),
            Period::Previous => axis.window(),
        }
    }

    fn breakdown_window(&self) -> Option<TimeWindow> {
        Some(TimeWindow {
            from: self.axis.first()?,
            to: self.range.end,
        })
    }
}

/// Trends computation engine
#[derive(Clone)]
pub struct TrendsEngine {
    executor: Arc<dyn EventExecutor>,
    cohorts: Arc<dyn CohortResolver>,
    actions: Arc<dyn ActionResolver>,
    cache: Arc<ResultCache>,
    config: Arc<EngineConfig>,
}

impl TrendsEngine {
    /// Create an engine with an empty cohort/action catalog
    pub fn new(executor: Arc<dyn EventExecutor>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(StaticCatalog::new());
        Ok(Self {
            executor,
            cohorts: catalog.clone(),
            actions: catalog,
            cache: Arc::new(ResultCache::new(config.cache.capacity)),
            config: Arc::new(config),
        })
    }

    /// Use one catalog for both cohorts and actions
    pub fn with_catalog<C>(mut self, catalog: Arc<C>) -> Self
    where
        C: CohortResolver + ActionResolver + 'static,
    {
        self.cohorts = catalog.clone();
        self.actions = catalog;
        self
    }

    pub fn with_cohort_resolver(mut self, cohorts: Arc<dyn CohortResolver>) -> Self {
        self.cohorts = cohorts;
        self
    }

    pub fn with_action_resolver(mut self, actions: Arc<dyn ActionResolver>) -> Self {
        self.actions = actions;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Check the executor is reachable before serving requests
    pub async fn health_check(&self) -> Result<()> {
        self.executor.health_check().await.inspect_err(|e| {
            tracing::error!(
                executor = self.executor.name(),
                error = %e,
                "executor health check failed"
            );
        })?;
        tracing::debug!(executor = self.executor.name(), "executor healthy");
        Ok(())
    }

    /// Compute a trends result
    pub async fn run(&self, filter: &Filter, ctx: &QueryContext) -> Result<Vec<SeriesResult>> {
        self.run_cancellable(filter, ctx, CancellationToken::new())
            .await
    }

    /// Compute a trends result, aborting in-flight queries when `token` is cancelled
    pub async fn run_cancellable(
        &self,
        filter: &Filter,
        ctx: &QueryContext,
        token: CancellationToken,
    ) -> Result<Vec<SeriesResult>> {
        let start = Instant::now();
        filter.validate()?;

        let earliest = match filter.date_from.as_deref() {
            Some(from) if is_all_time(from) => self.executor.earliest_timestamp(ctx.team_id).await?,
            _ => None,
        };
        let Some(range) = TimeRange::resolve(
            filter.date_from.as_deref(),
            filter.date_to.as_deref(),
            ctx.timezone,
            ctx.now,
            earliest,
        )?
        else {
            tracing::info!(team_id = ctx.team_id, "no events to anchor date range, empty result");
            return Ok(Vec::new());
        };

        let axis = CalendarBucketer::new(self.config.max_buckets).buckets(
            &range,
            filter.interval,
            ctx.timezone,
        )?;
        if axis.is_empty() {
            return Ok(Vec::new());
        }

        let mode = if !filter.display.is_time_series() {
            OutputMode::Single
        } else if filter.display.is_cumulative() {
            OutputMode::Cumulative
        } else {
            OutputMode::Series
        };
        let scope = RequestScope {
            filter,
            ctx,
            range,
            axis,
            mode,
        };

        let cacheable = mode == OutputMode::Series
            && !filter.compare
            && ctx.caching_allowed(&self.config.cache);
        let key = cacheable.then(|| {
            let until = bucket_start(range.end, filter.interval, ctx.timezone);
            cache_key(filter.fingerprint(), ctx.team_id, until)
        });
        let cached = key.and_then(|key| self.cache.get_usable(key, &scope.axis));

        if let Some((entry, resume)) = &cached
            && *resume >= scope.axis.len()
        {
            tracing::info!(
                team_id = ctx.team_id,
                series = entry.series.len(),
                "served trends from cache"
            );
            return Ok(entry.series.clone());
        }

        let computed = match self.compute(&scope, cached.as_ref(), &token).await? {
            Some(computed) => computed,
            None => {
                tracing::debug!(team_id = ctx.team_id, "cached series do not match, recomputing");
                self.compute(&scope, None, &token)
                    .await?
                    .unwrap_or_default()
            }
        };
        let Computed { series: results, dropped } = computed;

        // A partial result must not outlive the failure that caused it
        match key {
            Some(key) if dropped == 0 => self.cache.put(
                key,
                CacheEntry::new(filter.interval, ctx.now, scope.axis.days(), results.clone()),
            ),
            Some(_) => {
                tracing::debug!(team_id = ctx.team_id, dropped, "not caching partial result");
            }
            None => {}
        }

        tracing::info!(
            team_id = ctx.team_id,
            entities = filter.entities.len(),
            series = results.len(),
            buckets = scope.axis.len(),
            resumed = cached.is_some(),
            executor = self.executor.name(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "computed trends"
        );
        Ok(results)
    }

    /// Plan, query and assemble; `None` when a cached entry could not be spliced
    async fn compute(
        &self,
        scope: &RequestScope<'_>,
        cached: Option<&(CacheEntry, usize)>,
        token: &CancellationToken,
    ) -> Result<Option<Computed>> {
        let resume = cached.map(|(_, resume)| *resume).unwrap_or(0);
        let mut failed = vec![false; scope.filter.entities.len()];

        // Resolve entities and breakdowns
        let mut plans = Vec::with_capacity(scope.filter.entities.len());
        for (idx, entity) in scope.filter.entities.iter().enumerate() {
            match self.plan_entity(entity, scope).await {
                Ok(plan) => plans.push(Some(plan)),
                Err(e) => {
                    self.isolate(e, entity, scope.ctx)?;
                    failed[idx] = true;
                    plans.push(None);
                }
            }
        }

        // One job per entity × split × period
        let mut keys = Vec::new();
        let mut jobs = Vec::new();
        for (entity_idx, plan) in plans.iter().enumerate() {
            let Some(plan) = plan else { continue };
            if plan.empty_breakdown {
                continue;
            }
            for (split_idx, split) in plan.splits.iter().enumerate() {
                for &period in scope.periods() {
                    let axis = scope.period_axis(period, resume);
                    let aggregation = Aggregation::for_math(&plan.entity.math);
                    let Some(window) = scope.window(period, &axis, &aggregation) else {
                        continue;
                    };
                    let query = self.build_query(plan, split.as_ref(), &aggregation, window, scope);
                    keys.push((entity_idx, split_idx, period));
                    jobs.push(Job {
                        query,
                        aggregation,
                        axis,
                    });
                }
            }
        }

        let outputs = self.execute_jobs(jobs, scope.mode, token).await?;
        let mut by_key = HashMap::with_capacity(outputs.len());
        for (key, output) in keys.into_iter().zip(outputs) {
            match output {
                Ok(output) => {
                    by_key.insert(key, output);
                }
                Err(e) => {
                    let entity_idx = key.0;
                    if failed[entity_idx] {
                        continue;
                    }
                    self.isolate(e, &scope.filter.entities[entity_idx], scope.ctx)?;
                    failed[entity_idx] = true;
                }
            }
        }

        // Assemble in entity order
        let mut results = Vec::new();
        for (entity_idx, plan) in plans.iter().enumerate() {
            let Some(plan) = plan else { continue };
            if failed[entity_idx] {
                continue;
            }
            let mut groups = Vec::with_capacity(plan.splits.len());
            for (split_idx, split) in plan.splits.iter().enumerate() {
                let mut group = Vec::with_capacity(scope.periods().len());
                for &period in scope.periods() {
                    let axis = scope.period_axis(period, resume);
                    let output = by_key
                        .remove(&(entity_idx, split_idx, period))
                        .unwrap_or_else(|| JobOutput::zero(scope.mode, axis.len()));
                    let series = match cached {
                        Some((entry, resume)) if period == Period::Current => {
                            let Some(series) =
                                self.splice(plan, split.as_ref(), output, entry, *resume, &axis, scope)
                            else {
                                return Ok(None);
                            };
                            series
                        }
                        _ => self.build_series(plan, split.as_ref(), period, output, &axis, scope),
                    };
                    group.push(series);
                }
                groups.push((split.as_ref().and_then(|s| s.rank), group));
            }
            sort_groups(&mut groups);
            results.extend(groups.into_iter().flat_map(|(_, group)| group));
        }
        Ok(Some(Computed {
            series: results,
            dropped: failed.iter().filter(|f| **f).count(),
        }))
    }

    /// Propagate `error` unless entity failures are isolated and it is entity scoped
    fn isolate(&self, error: TrendsError, entity: &Entity, ctx: &QueryContext) -> Result<()> {
        if self.config.isolate_entity_failures && error.is_entity_scoped() {
            tracing::warn!(
                team_id = ctx.team_id,
                entity = %entity.default_name(),
                order = entity.order,
                error = %error,
                "dropping failed entity"
            );
            return Ok(());
        }
        Err(error)
    }

    async fn plan_entity(&self, entity: &Entity, scope: &RequestScope<'_>) -> Result<EntityPlan> {
        let (filter, ctx) = (scope.filter, scope.ctx);
        let action = match entity.selector {
            EntitySelector::Action(id) => Some(
                self.actions
                    .action(ctx.team_id, id)
                    .await?
                    .ok_or(TrendsError::UnknownAction(id))?,
            ),
            _ => None,
        };

        let mut groups: Vec<&PropertyGroup> = vec![&entity.properties, &filter.properties];
        if filter.filter_test_accounts {
            groups.push(&ctx.test_account_filters);
        }
        let mut cohort_ids = action.as_ref().map(|a| a.cohort_ids()).unwrap_or_default();
        for group in &groups {
            for id in group.cohort_ids() {
                if !cohort_ids.contains(&id) {
                    cohort_ids.push(id);
                }
            }
        }
        let cohorts = cohort_predicates(self.cohorts.as_ref(), ctx.team_id, &cohort_ids).await?;

        let mut parts = vec![match (&entity.selector, &action) {
            (EntitySelector::Event(name), _) => Predicate::event(name.clone()),
            (_, Some(action)) => action.to_predicate(&cohorts)?,
            _ => Predicate::All,
        }];
        for group in groups {
            parts.push(group.to_predicate(&cohorts)?);
        }
        let predicate = Predicate::and(parts);

        let name = entity
            .name
            .clone()
            .or_else(|| action.map(|a| a.name))
            .unwrap_or_else(|| entity.default_name());

        let (splits, empty_breakdown) = match &filter.breakdown {
            None => (vec![None], false),
            Some(breakdown) => {
                let window = scope.breakdown_window().ok_or_else(|| {
                    TrendsError::InvalidDateRange("empty bucket axis".into())
                })?;
                let resolver = BreakdownResolver::new(self.executor.as_ref(), self.cohorts.as_ref())
                    .with_limit(filter.breakdown_limit.unwrap_or(self.config.breakdown_limit))
                    .with_histogram_bins(self.config.histogram_bin_count);
                let values = resolver
                    .resolve(breakdown, ctx.team_id, &predicate, window)
                    .await?;
                if values.is_empty() {
                    (vec![None], true)
                } else {
                    (values.into_iter().map(Some).collect(), false)
                }
            }
        };

        Ok(EntityPlan {
            entity: entity.clone(),
            name,
            predicate,
            splits,
            empty_breakdown,
        })
    }

    fn build_query(
        &self,
        plan: &EntityPlan,
        split: Option<&ResolvedBreakdown>,
        aggregation: &Aggregation,
        window: TimeWindow,
        scope: &RequestScope<'_>,
    ) -> EventQuery {
        let predicate = match split {
            Some(split) => Predicate::and([plan.predicate.clone(), split.predicate.clone()]),
            None => plan.predicate.clone(),
        };
        let mut query = EventQuery::new(scope.ctx.team_id, predicate, window, scope.ctx.timezone)
            .with_interval(scope.filter.interval);
        if let Some(actor) =
            Aggregation::actor_kind(&plan.entity.math, scope.ctx.aggregate_users_by_distinct_id)
        {
            query = query.with_actor(actor);
        }
        if let Some(value) = Aggregation::value_source(&plan.entity.math) {
            query = query.with_value(value);
        }
        if aggregation.needs_sessions() {
            query = query.with_sessions();
        }
        query
    }

    /// Run every job, returning outputs in job order
    async fn execute_jobs(
        &self,
        jobs: Vec<Job>,
        mode: OutputMode,
        token: &CancellationToken,
    ) -> Result<Vec<Result<JobOutput>>> {
        let total = jobs.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_queries));
        let mut set = JoinSet::new();

        for (idx, job) in jobs.into_iter().enumerate() {
            let executor = Arc::clone(&self.executor);
            let semaphore = Arc::clone(&semaphore);
            let token = token.clone();
            set.spawn(async move {
                let outcome = tokio::select! {
                    _ = token.cancelled() => Err(TrendsError::Cancelled),
                    outcome = async {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .map_err(|e| TrendsError::Task(e.to_string()))?;
                        job.run(executor.as_ref(), mode).await
                    } => outcome,
                };
                (idx, outcome)
            });
        }

        let mut outputs: Vec<Option<Result<JobOutput>>> = (0..total).map(|_| None).collect();
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    set.abort_all();
                    tracing::debug!(pending = set.len(), "trends request cancelled");
                    return Err(TrendsError::Cancelled);
                }
                next = set.join_next() => match next {
                    None => break,
                    Some(Ok((idx, outcome))) => outputs[idx] = Some(outcome),
                    Some(Err(e)) => {
                        set.abort_all();
                        return Err(TrendsError::Task(e.to_string()));
                    }
                },
            }
        }

        Ok(outputs
            .into_iter()
            .map(|output| {
                output.unwrap_or_else(|| Err(TrendsError::Task("query task did not report".into())))
            })
            .collect())
    }

    fn label(plan: &EntityPlan, split: Option<&ResolvedBreakdown>) -> String {
        match split {
            Some(split) => format!("{} - {}", plan.name, split.label),
            None => plan.name.clone(),
        }
    }

    fn build_series(
        &self,
        plan: &EntityPlan,
        split: Option<&ResolvedBreakdown>,
        period: Period,
        output: JobOutput,
        axis: &BucketAxis,
        scope: &RequestScope<'_>,
    ) -> SeriesResult {
        let label = Self::label(plan, split);
        let action = ActionSummary::new(&plan.entity, plan.name.clone());
        let (series, persons) = match output {
            JobOutput::Series { data, counts } => (
                SeriesResult::time_series(label, action, data, &counts, axis, scope.filter.compare),
                ActorsSelector::per_bucket(&plan.entity, axis),
            ),
            JobOutput::Single(value) => {
                let (from, to) = match period {
                    Period::Current => (scope.range.start, scope.range.end),
                    Period::Previous => period_bounds(axis),
                };
                (
                    SeriesResult::aggregate(label, action, value),
                    vec![ActorsSelector::new(&plan.entity, from, to)],
                )
            }
        };
        decorate(series, persons, split, period, scope)
    }

    /// Current-period series from cached buckets plus freshly computed tail buckets
    #[allow(clippy::too_many_arguments)]
    fn splice(
        &self,
        plan: &EntityPlan,
        split: Option<&ResolvedBreakdown>,
        output: JobOutput,
        entry: &CacheEntry,
        resume: usize,
        tail: &BucketAxis,
        scope: &RequestScope<'_>,
    ) -> Option<SeriesResult> {
        let JobOutput::Series { data: fresh, .. } = output else {
            return None;
        };
        let label = Self::label(plan, split);
        let key = series_key(&label, plan.entity.order);
        let data = entry.merge(&key, &scope.axis, resume, &tail.days(), &fresh)?;
        let action = ActionSummary::new(&plan.entity, plan.name.clone());
        let series = SeriesResult::time_series(label, action, data.clone(), &data, &scope.axis, false);
        let persons = ActorsSelector::per_bucket(&plan.entity, &scope.axis);
        Some(decorate(series, persons, split, Period::Current, scope))
    }
}

fn decorate(
    mut series: SeriesResult,
    persons: Vec<ActorsSelector>,
    split: Option<&ResolvedBreakdown>,
    period: Period,
    scope: &RequestScope<'_>,
) -> SeriesResult {
    let persons = match (split, &scope.filter.breakdown) {
        (Some(split), Some(breakdown)) => {
            let value = split.value.to_value();
            persons
                .into_iter()
                .map(|p| p.with_breakdown(breakdown.breakdown_type(), value.clone()))
                .collect()
        }
        _ => persons,
    };
    series = series.with_persons(persons);
    if let Some(split) = split {
        series = series.with_breakdown_value(split.value.to_value());
    }
    if scope.filter.compare {
        series = series.with_compare_label(match period {
            Period::Current => CompareLabel::Current,
            Period::Previous => CompareLabel::Previous,
        });
    }
    series
}

fn period_bounds(axis: &BucketAxis) -> (DateTime<Utc>, DateTime<Utc>) {
    match axis.window() {
        Some(window) => (window.from, window.to),
        None => (DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MIN_UTC),
    }
}

/// Ranked splits by rank; others by current-period count descending, then label
fn sort_groups(groups: &mut [(Option<usize>, Vec<SeriesResult>)]) {
    groups.sort_by(|(rank_a, a), (rank_b, b)| match (rank_a, rank_b) {
        (Some(x), Some(y)) => x.cmp(y),
        _ => {
            let (Some(a), Some(b)) = (a.first(), b.first()) else {
                return Ordering::Equal;
            };
            b.count
                .total_cmp(&a.count)
                .then_with(|| a.label.cmp(&b.label))
        }
    });
}

#[cfg(test)]
#[path = "trends_test.rs"]
mod tests;
