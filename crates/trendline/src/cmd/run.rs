//! Run command - Compute trends from local event files
//!
//! # Usage
//!
//! ```bash
//! trendline run --events events.jsonl --filter filter.json
//! trendline run -e events.jsonl -p persons.jsonl --catalog catalog.json -f filter.json --format json
//! ```
//!
//! # Inputs
//!
//! - events, persons and groups: JSON lines, one record per line
//! - catalog: `{"cohorts": [...], "actions": [...]}`
//! - test account filters: property filters (a list or a typed group) applied
//!   when the filter sets `filter_test_accounts`
//! - filter: trends filter params, e.g.
//!   `{"events": [{"id": "sign up", "math": "dau"}], "date_from": "-7d"}`

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::Args;
use trendline_analytics::{
    Filter, PropertyGroup, QueryContext, SeriesResult, StaticCatalog, TrendsEngine,
};
use trendline_query::{EventExecutor, MemoryBackend};

use crate::config::Config;

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Events file (JSON lines)
    #[arg(short, long)]
    pub events: PathBuf,

    /// Persons file (JSON lines)
    #[arg(short, long)]
    pub persons: Option<PathBuf>,

    /// Groups file (JSON lines)
    #[arg(short, long)]
    pub groups: Option<PathBuf>,

    /// Cohort and action definitions (JSON)
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Filter params (JSON)
    #[arg(short, long)]
    pub filter: PathBuf,

    /// Team's test account property filters (JSON)
    #[arg(long)]
    pub test_account_filters: Option<PathBuf>,

    /// Team ID
    #[arg(short, long, default_value = "1")]
    pub team: u64,

    /// Team timezone (IANA name)
    #[arg(long, default_value = "UTC")]
    pub timezone: String,

    /// Reference instant for relative dates (RFC 3339); defaults to now
    #[arg(long)]
    pub now: Option<String>,

    /// Output format (table, json)
    #[arg(long, default_value = "table")]
    pub format: String,
}

/// Run the trends command
pub async fn run(args: RunArgs, config: Config) -> Result<()> {
    let format = args.format.to_lowercase();
    if format != "table" && format != "json" {
        bail!("invalid format: {} (expected table or json)", args.format);
    }

    let start = Instant::now();
    let results = compute(&args, config).await?;
    output_results(&results, &format)?;

    eprintln!(
        "\n{} series in {}ms",
        results.len(),
        start.elapsed().as_millis()
    );
    Ok(())
}

/// Load inputs and run the engine
pub async fn compute(args: &RunArgs, config: Config) -> Result<Vec<SeriesResult>> {
    let backend = load_backend(args)?;

    let filter_json = read(&args.filter)?;
    let filter = Filter::from_json(&filter_json)
        .with_context(|| format!("invalid filter: {}", args.filter.display()))?;

    let timezone: Tz = args
        .timezone
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid timezone '{}': {}", args.timezone, e))?;
    let mut ctx = QueryContext::new(args.team, timezone);
    if let Some(now) = &args.now {
        let now = DateTime::parse_from_rfc3339(now)
            .with_context(|| format!("invalid --now: {now}"))?
            .with_timezone(&Utc);
        ctx = ctx.with_now(now);
    }
    if let Some(path) = &args.test_account_filters {
        let filters: PropertyGroup = serde_json::from_str(&read(path)?)
            .with_context(|| format!("invalid test account filters: {}", path.display()))?;
        ctx = ctx.with_test_account_filters(filters);
    } else if filter.filter_test_accounts {
        tracing::warn!("filter_test_accounts is set but no --test-account-filters were given");
    }

    let executor: Arc<dyn EventExecutor> = Arc::new(backend);
    let mut engine =
        TrendsEngine::new(executor, config.engine).context("invalid engine configuration")?;
    if let Some(path) = &args.catalog {
        let catalog = StaticCatalog::from_json(&read(path)?)
            .with_context(|| format!("invalid catalog: {}", path.display()))?;
        engine = engine.with_catalog(Arc::new(catalog));
    }
    engine
        .health_check()
        .await
        .context("executor unavailable")?;

    engine
        .run(&filter, &ctx)
        .await
        .context("trends computation failed")
}

fn load_backend(args: &RunArgs) -> Result<MemoryBackend> {
    let backend = MemoryBackend::new();
    let events = backend
        .load_events_file(&args.events)
        .with_context(|| format!("failed to load events: {}", args.events.display()))?;
    tracing::info!(events, path = %args.events.display(), "loaded events");

    if let Some(path) = &args.persons {
        backend
            .load_persons_file(path)
            .with_context(|| format!("failed to load persons: {}", path.display()))?;
    }
    if let Some(path) = &args.groups {
        backend
            .load_groups_file(path)
            .with_context(|| format!("failed to load groups: {}", path.display()))?;
    }
    Ok(backend)
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Output results in the requested format
fn output_results(results: &[SeriesResult], format: &str) -> Result<()> {
    if format == "json" {
        let json = serde_json::to_string_pretty(results)?;
        println!("{}", json);
        return Ok(());
    }

    if results.is_empty() {
        println!("(no data)");
        return Ok(());
    }

    for series in results {
        let title = match &series.compare_label {
            Some(period) => format!("{} ({})", series.label, serde_json::to_value(period)?),
            None => series.label.clone(),
        };

        if let Some(value) = series.aggregated_value {
            println!("{:<40} {:>15.2}", title, value);
            continue;
        }

        println!("{}", title);
        println!("{:<20} {:<20} {:>15}", "Date", "Label", "Value");
        println!("{}", "-".repeat(58));
        for ((day, label), value) in series.days.iter().zip(&series.labels).zip(&series.data) {
            println!("{:<20} {:<20} {:>15.2}", day, label, value);
        }
        println!("{}", "-".repeat(58));
        println!("{:<41} {:>15.2}\n", "Total", series.count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    fn args(events: &NamedTempFile, filter: &NamedTempFile) -> RunArgs {
        RunArgs {
            events: events.path().to_path_buf(),
            persons: None,
            groups: None,
            catalog: None,
            filter: filter.path().to_path_buf(),
            test_account_filters: None,
            team: 1,
            timezone: "UTC".into(),
            now: Some("2020-01-04T13:00:01Z".into()),
            format: "json".into(),
        }
    }

    const EVENTS: &str = r#"{"event": "sign up", "distinct_id": "u1", "timestamp": "2020-01-01T00:06:34Z"}
{"event": "sign up", "distinct_id": "u2", "timestamp": "2020-01-01T10:00:00Z"}
{"event": "sign up", "distinct_id": "u1", "timestamp": "2020-01-02T00:06:45Z"}
"#;

    #[tokio::test]
    async fn test_compute_from_files() {
        let events = file(EVENTS);
        let filter = file(r#"{"events": [{"id": "sign up"}], "date_from": "-7d"}"#);

        let results = compute(&args(&events, &filter), Config::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].data[4], 2.0);
        assert_eq!(results[0].data[5], 1.0);
        assert_eq!(results[0].count, 3.0);
    }

    #[tokio::test]
    async fn test_catalog_action() {
        let events = file(EVENTS);
        let filter = file(r#"{"actions": [{"id": 3}], "date_from": "-7d"}"#);
        let catalog = file(r#"{"actions": [{"id": 3, "name": "signed up", "steps": [{"event": "sign up"}]}]}"#);

        let mut args = args(&events, &filter);
        args.catalog = Some(catalog.path().to_path_buf());
        let results = compute(&args, Config::default()).await.unwrap();

        assert_eq!(results[0].label, "signed up");
        assert_eq!(results[0].count, 3.0);
    }

    #[tokio::test]
    async fn test_test_account_filters() {
        let events = file(&format!(
            "{EVENTS}{}\n",
            r#"{"event": "sign up", "distinct_id": "qa", "timestamp": "2020-01-02T09:00:00Z", "properties": {"$host": "localhost"}}"#
        ));
        let filter = file(
            r#"{"events": [{"id": "sign up"}], "date_from": "-7d", "filter_test_accounts": true}"#,
        );
        let test_accounts =
            file(r#"[{"key": "$host", "value": "localhost", "operator": "is_not"}]"#);

        let unfiltered = compute(&args(&events, &filter), Config::default())
            .await
            .unwrap();
        assert_eq!(unfiltered[0].count, 4.0);

        let mut args = args(&events, &filter);
        args.test_account_filters = Some(test_accounts.path().to_path_buf());
        let results = compute(&args, Config::default()).await.unwrap();
        assert_eq!(results[0].count, 3.0);

        let broken = file("{\"values\": 3}");
        args.test_account_filters = Some(broken.path().to_path_buf());
        assert!(compute(&args, Config::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_inputs() {
        let events = file(EVENTS);
        let filter = file(r#"{"events": [{"id": "sign up"}]}"#);

        let mut bad_tz = args(&events, &filter);
        bad_tz.timezone = "Mars/Olympus".into();
        assert!(compute(&bad_tz, Config::default()).await.is_err());

        let broken = file("{not json");
        assert!(compute(&args(&events, &broken), Config::default()).await.is_err());

        let mut missing = args(&events, &filter);
        missing.events = PathBuf::from("/nonexistent/events.jsonl");
        assert!(compute(&missing, Config::default()).await.is_err());
    }
}
