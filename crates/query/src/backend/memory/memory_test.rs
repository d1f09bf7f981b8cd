//! Tests for the in-memory backend

use super::*;
use std::fs;

use crate::calendar::Interval;
use crate::predicate::{Operator, PropertyCondition};
use crate::query::{PropertyRef, TimeWindow};
use tempfile::tempdir;

// =============================================================================
// Test Helpers
// =============================================================================

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn window(from: &str, to: &str) -> TimeWindow {
    TimeWindow::new(ts(from), ts(to)).unwrap()
}

fn sample_backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.insert_person(
        PersonRecord::new("p1")
            .with_distinct_id("blabla")
            .with_distinct_id("anonymous_id")
            .with_property("$os", "Mac"),
    );
    backend.insert_person(PersonRecord::new("p2").with_distinct_id("tintin"));
    backend.insert_events([
        EventRecord::new("sign up", "blabla", ts("2020-01-01T12:00:00Z"))
            .with_property("$browser", "Safari")
            .with_property("$session_id", "s1"),
        EventRecord::new("sign up", "anonymous_id", ts("2020-01-01T12:10:00Z"))
            .with_property("$browser", "Chrome")
            .with_property("$session_id", "s1"),
        EventRecord::new("sign up", "tintin", ts("2020-01-02T09:00:00Z"))
            .with_property("$browser", "Safari")
            .with_property("price", "12.5"),
        EventRecord::new("$pageview", "nobody", ts("2020-01-03T09:00:00Z")),
        EventRecord::new("sign up", "tintin", ts("2020-01-03T09:00:00Z")).with_team(2),
    ]);
    backend
}

// =============================================================================
// Execute
// =============================================================================

#[tokio::test]
async fn test_execute_filters_by_team_window_and_event() {
    let backend = sample_backend();
    let query = EventQuery::new(
        1,
        Predicate::event("sign up"),
        window("2020-01-01T00:00:00Z", "2020-01-05T00:00:00Z"),
        chrono_tz::UTC,
    );

    let rows = backend.execute(&query).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.bucket.is_none() && r.actor_id.is_none()));
}

#[tokio::test]
async fn test_execute_assigns_buckets_and_persons() {
    let backend = sample_backend();
    let query = EventQuery::new(
        1,
        Predicate::event("sign up"),
        window("2020-01-01T00:00:00Z", "2020-01-05T00:00:00Z"),
        chrono_tz::UTC,
    )
    .with_interval(Interval::Day)
    .with_actor(ActorKind::Person);

    let rows = backend.execute(&query).await.unwrap();
    let actors: Vec<_> = rows.iter().filter_map(|r| r.actor_id.as_deref()).collect();
    assert_eq!(actors, vec!["p1", "p1", "p2"]);
    assert_eq!(rows[0].bucket, Some(ts("2020-01-01T00:00:00Z")));
    assert_eq!(rows[2].bucket, Some(ts("2020-01-02T00:00:00Z")));
}

#[tokio::test]
async fn test_execute_unknown_person_falls_back_to_distinct_id() {
    let backend = sample_backend();
    let query = EventQuery::new(
        1,
        Predicate::event("$pageview"),
        window("2020-01-01T00:00:00Z", "2020-01-05T00:00:00Z"),
        chrono_tz::UTC,
    )
    .with_actor(ActorKind::Person);

    let rows = backend.execute(&query).await.unwrap();
    assert_eq!(rows[0].actor_id.as_deref(), Some("nobody"));
}

#[tokio::test]
async fn test_execute_extracts_numeric_values() {
    let backend = sample_backend();
    let query = EventQuery::new(
        1,
        Predicate::event("sign up"),
        window("2020-01-01T00:00:00Z", "2020-01-05T00:00:00Z"),
        chrono_tz::UTC,
    )
    .with_value(ValueSource::EventProperty("price".into()));

    let rows = backend.execute(&query).await.unwrap();
    let values: Vec<_> = rows.iter().filter_map(|r| r.value).collect();
    assert_eq!(values, vec![12.5]);
}

#[tokio::test]
async fn test_session_duration_is_span_of_session() {
    let backend = sample_backend();
    let query = EventQuery::new(
        1,
        Predicate::event("sign up"),
        window("2020-01-01T00:00:00Z", "2020-01-01T23:59:59Z"),
        chrono_tz::UTC,
    )
    .with_sessions()
    .with_value(ValueSource::SessionDuration);

    let rows = backend.execute(&query).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.session_id.as_deref() == Some("s1")));
    assert!(rows.iter().all(|r| r.value == Some(600.0)));
}

#[tokio::test]
async fn test_person_property_predicate() {
    let backend = sample_backend();
    let predicate = Predicate::and([
        Predicate::event("sign up"),
        Predicate::property(PropertyCondition::new(
            "$os",
            PropertyScope::Person,
            Operator::Exact,
            "Mac".into(),
        )),
    ]);
    let query = EventQuery::new(
        1,
        predicate,
        window("2020-01-01T00:00:00Z", "2020-01-05T00:00:00Z"),
        chrono_tz::UTC,
    );

    assert_eq!(backend.execute(&query).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_group_property_predicate() {
    let backend = MemoryBackend::new();
    backend.insert_group(GroupRecord::new(0, "org:5").with_property("industry", "finance"));
    backend.insert_group(GroupRecord::new(0, "org:6").with_property("industry", "tech"));
    backend.insert_events([
        EventRecord::new("paid", "u1", ts("2020-01-01T12:00:00Z")).with_property("$group_0", "org:5"),
        EventRecord::new("paid", "u2", ts("2020-01-01T12:00:00Z")).with_property("$group_0", "org:6"),
        EventRecord::new("paid", "u3", ts("2020-01-01T12:00:00Z")),
    ]);

    let query = EventQuery::new(
        1,
        Predicate::property(PropertyCondition::new(
            "industry",
            PropertyScope::Group(0),
            Operator::Exact,
            "finance".into(),
        )),
        window("2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z"),
        chrono_tz::UTC,
    )
    .with_actor(ActorKind::Group(0));

    let rows = backend.execute(&query).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].actor_id.as_deref(), Some("org:5"));
}

// =============================================================================
// Property values
// =============================================================================

#[tokio::test]
async fn test_property_values_ranked_by_count() {
    let backend = sample_backend();
    let query = PropertyValuesQuery::new(
        1,
        Predicate::All,
        window("2020-01-01T00:00:00Z", "2020-01-05T00:00:00Z"),
        PropertyRef::new(PropertyScope::Event, "$browser"),
    );

    let values = backend.property_values(&query).await.unwrap();
    assert_eq!(values.len(), 3);
    assert_eq!(values[0].value, Some(Value::from("Safari")));
    assert_eq!(values[0].count, 2);
    // One pageview lacks the property; ties break by text with missing first
    assert_eq!(values[1].value, None);
    assert_eq!(values[2].value, Some(Value::from("Chrome")));
}

#[tokio::test]
async fn test_property_values_limit() {
    let backend = sample_backend();
    let query = PropertyValuesQuery::new(
        1,
        Predicate::event("sign up"),
        window("2020-01-01T00:00:00Z", "2020-01-05T00:00:00Z"),
        PropertyRef::new(PropertyScope::Event, "$browser"),
    )
    .with_limit(1);

    let values = backend.property_values(&query).await.unwrap();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].value, Some(Value::from("Safari")));
}

// =============================================================================
// Loading
// =============================================================================

#[tokio::test]
async fn test_load_json_lines() {
    let dir = tempdir().unwrap();
    let events = dir.path().join("events.jsonl");
    let persons = dir.path().join("persons.jsonl");
    fs::write(
        &events,
        concat!(
            r#"{"event": "$pageview", "distinct_id": "a", "timestamp": "2020-01-02T00:00:00Z"}"#,
            "\n\n",
            r#"{"team_id": 3, "event": "$pageview", "distinct_id": "b", "timestamp": "2020-01-01T00:00:00Z", "properties": {"x": 1}}"#,
            "\n",
        ),
    )
    .unwrap();
    fs::write(&persons, r#"{"id": "p", "distinct_ids": ["a"]}"#).unwrap();

    let backend = MemoryBackend::new();
    assert_eq!(backend.load_events_file(&events).unwrap(), 2);
    assert_eq!(backend.load_persons_file(&persons).unwrap(), 1);
    assert_eq!(backend.event_count(), 2);
    assert_eq!(
        backend.earliest_timestamp(3).await.unwrap(),
        Some(ts("2020-01-01T00:00:00Z"))
    );
    assert_eq!(backend.earliest_timestamp(9).await.unwrap(), None);
}

#[test]
fn test_load_reports_bad_line() {
    let dir = tempdir().unwrap();
    let events = dir.path().join("events.jsonl");
    fs::write(&events, "{\"event\": 1}\n").unwrap();

    let err = MemoryBackend::new().load_events_file(&events).unwrap_err();
    assert!(matches!(err, QueryError::Serialization(msg) if msg.contains(":1:")));
}
