//! In-memory event store
//!
//! Reference executor backed by plain vectors. Events, persons and groups
//! are loaded from JSON lines (one object per line) or inserted directly,
//! and every query is a full scan that evaluates the predicate per event.
//!
//! # Record Format
//!
//! ```text
//! {"team_id": 1, "event": "$pageview", "distinct_id": "u1", "timestamp": "2020-01-01T12:00:00Z", "properties": {"$browser": "Safari"}}
//! {"team_id": 1, "id": "p1", "distinct_ids": ["u1", "anon-1"], "properties": {"email": "a@b.c"}}
//! {"team_id": 1, "group_type_index": 0, "group_key": "org:5", "properties": {"industry": "finance"}}
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backend::EventExecutor;
use crate::calendar::bucket_start;
use crate::error::QueryError;
use crate::predicate::{Predicate, PropertyLookup, PropertyScope, value_as_f64, value_to_string};
use crate::query::{ActorKind, EventQuery, PropertyValuesQuery, ValueSource};
use crate::result::{PropertyValueCount, RawRow};

/// Event property carrying the session id
pub const SESSION_ID_PROPERTY: &str = "$session_id";

/// The only session-scoped property
pub const SESSION_DURATION_PROPERTY: &str = "$session_duration";

fn default_team_id() -> u64 {
    1
}

/// A stored event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default = "default_team_id")]
    pub team_id: u64,
    pub event: String,
    pub distinct_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl EventRecord {
    pub fn new(event: impl Into<String>, distinct_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            team_id: default_team_id(),
            event: event.into(),
            distinct_id: distinct_id.into(),
            timestamp,
            properties: Map::new(),
        }
    }

    pub fn with_team(mut self, team_id: u64) -> Self {
        self.team_id = team_id;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    fn text_property(&self, key: &str) -> Option<String> {
        self.properties
            .get(key)
            .filter(|v| !v.is_null())
            .map(value_to_string)
            .filter(|s| !s.is_empty())
    }

    fn session_id(&self) -> Option<String> {
        self.text_property(SESSION_ID_PROPERTY)
    }

    fn group_key(&self, group_type_index: u8) -> Option<String> {
        self.text_property(&format!("$group_{group_type_index}"))
    }
}

/// A stored person and the distinct ids that resolve to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonRecord {
    #[serde(default = "default_team_id")]
    pub team_id: u64,
    pub id: String,
    #[serde(default)]
    pub distinct_ids: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl PersonRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            team_id: default_team_id(),
            id: id.into(),
            distinct_ids: Vec::new(),
            properties: Map::new(),
        }
    }

    pub fn with_team(mut self, team_id: u64) -> Self {
        self.team_id = team_id;
        self
    }

    pub fn with_distinct_id(mut self, distinct_id: impl Into<String>) -> Self {
        self.distinct_ids.push(distinct_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A stored group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    #[serde(default = "default_team_id")]
    pub team_id: u64,
    pub group_type_index: u8,
    pub group_key: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl GroupRecord {
    pub fn new(group_type_index: u8, group_key: impl Into<String>) -> Self {
        Self {
            team_id: default_team_id(),
            group_type_index,
            group_key: group_key.into(),
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Default)]
struct Store {
    events: Vec<EventRecord>,
    persons: Vec<PersonRecord>,
    /// (team, distinct id) -> index into `persons`
    person_index: HashMap<(u64, String), usize>,
    groups: HashMap<(u64, u8, String), GroupRecord>,
}

impl Store {
    fn person_for(&self, event: &EventRecord) -> Option<&PersonRecord> {
        self.person_index
            .get(&(event.team_id, event.distinct_id.clone()))
            .and_then(|&idx| self.persons.get(idx))
    }

    /// Session duration in seconds: last event minus first event per session
    fn session_durations(&self, team_id: u64) -> HashMap<String, f64> {
        let mut bounds: HashMap<String, (DateTime<Utc>, DateTime<Utc>)> = HashMap::new();
        for event in self.events.iter().filter(|e| e.team_id == team_id) {
            let Some(session) = event.session_id() else {
                continue;
            };
            bounds
                .entry(session)
                .and_modify(|(first, last)| {
                    *first = (*first).min(event.timestamp);
                    *last = (*last).max(event.timestamp);
                })
                .or_insert((event.timestamp, event.timestamp));
        }
        bounds
            .into_iter()
            .map(|(session, (first, last))| {
                let millis = (last - first).num_milliseconds();
                (session, millis as f64 / 1000.0)
            })
            .collect()
    }

    fn matching<'a>(
        &'a self,
        team_id: u64,
        predicate: &'a Predicate,
        window: crate::query::TimeWindow,
        sessions: &'a HashMap<String, f64>,
    ) -> impl Iterator<Item = EventView<'a>> + 'a {
        self.events
            .iter()
            .filter(move |e| e.team_id == team_id && window.contains(e.timestamp))
            .map(move |event| EventView {
                event,
                person: self.person_for(event),
                sessions,
                groups: &self.groups,
            })
            .filter(move |view| predicate.evaluate(view))
    }
}

/// One event with everything needed to evaluate predicates against it
struct EventView<'a> {
    event: &'a EventRecord,
    person: Option<&'a PersonRecord>,
    sessions: &'a HashMap<String, f64>,
    groups: &'a HashMap<(u64, u8, String), GroupRecord>,
}

impl EventView<'_> {
    fn actor(&self, kind: ActorKind) -> Option<String> {
        match kind {
            ActorKind::Person => Some(
                self.person
                    .map(|p| p.id.clone())
                    .unwrap_or_else(|| self.event.distinct_id.clone()),
            ),
            ActorKind::DistinctId => Some(self.event.distinct_id.clone()),
            ActorKind::Group(idx) => self.event.group_key(idx),
        }
    }

    fn session_duration(&self) -> Option<f64> {
        self.event
            .session_id()
            .and_then(|s| self.sessions.get(&s).copied())
    }
}

impl PropertyLookup for EventView<'_> {
    fn event_name(&self) -> &str {
        &self.event.event
    }

    fn property(&self, scope: &PropertyScope, key: &str) -> Option<Value> {
        match scope {
            PropertyScope::Event => self.event.properties.get(key).cloned(),
            PropertyScope::Person => self.person?.properties.get(key).cloned(),
            PropertyScope::Session if key == SESSION_DURATION_PROPERTY => {
                self.session_duration().map(Value::from)
            }
            PropertyScope::Session => None,
            PropertyScope::Group(idx) => {
                let group_key = self.event.group_key(*idx)?;
                self.groups
                    .get(&(self.event.team_id, *idx, group_key))?
                    .properties
                    .get(key)
                    .cloned()
            }
        }
    }

    fn person_id(&self) -> Option<&str> {
        self.person.map(|p| p.id.as_str())
    }
}

/// In-memory executor
#[derive(Debug, Default)]
pub struct MemoryBackend {
    store: RwLock<Store>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_event(&self, event: EventRecord) {
        self.store.write().events.push(event);
    }

    pub fn insert_events(&self, events: impl IntoIterator<Item = EventRecord>) {
        self.store.write().events.extend(events);
    }

    /// Insert a person, indexing each of its distinct ids
    pub fn insert_person(&self, person: PersonRecord) {
        let mut store = self.store.write();
        let idx = store.persons.len();
        for distinct_id in &person.distinct_ids {
            store
                .person_index
                .insert((person.team_id, distinct_id.clone()), idx);
        }
        store.persons.push(person);
    }

    pub fn insert_group(&self, group: GroupRecord) {
        let key = (group.team_id, group.group_type_index, group.group_key.clone());
        self.store.write().groups.insert(key, group);
    }

    /// Number of stored events across all teams
    pub fn event_count(&self) -> usize {
        self.store.read().events.len()
    }

    /// Load events from a JSON lines file, returning how many were read
    pub fn load_events_file(&self, path: impl AsRef<Path>) -> Result<usize, QueryError> {
        let events: Vec<EventRecord> = read_json_lines(path.as_ref())?;
        let count = events.len();
        self.insert_events(events);
        tracing::debug!(path = %path.as_ref().display(), count, "loaded events");
        Ok(count)
    }

    /// Load persons from a JSON lines file, returning how many were read
    pub fn load_persons_file(&self, path: impl AsRef<Path>) -> Result<usize, QueryError> {
        let persons: Vec<PersonRecord> = read_json_lines(path.as_ref())?;
        let count = persons.len();
        for person in persons {
            self.insert_person(person);
        }
        tracing::debug!(path = %path.as_ref().display(), count, "loaded persons");
        Ok(count)
    }

    /// Load groups from a JSON lines file, returning how many were read
    pub fn load_groups_file(&self, path: impl AsRef<Path>) -> Result<usize, QueryError> {
        let groups: Vec<GroupRecord> = read_json_lines(path.as_ref())?;
        let count = groups.len();
        for group in groups {
            self.insert_group(group);
        }
        tracing::debug!(path = %path.as_ref().display(), count, "loaded groups");
        Ok(count)
    }

    fn run_query(&self, query: &EventQuery) -> Vec<RawRow> {
        let store = self.store.read();
        let sessions = if needs_sessions(&query.predicate, query.value.as_ref()) {
            store.session_durations(query.team_id)
        } else {
            HashMap::new()
        };

        store
            .matching(query.team_id, &query.predicate, query.window, &sessions)
            .map(|view| {
                let event = view.event;
                let mut row = RawRow::at(event.timestamp);
                row.bucket = query
                    .interval
                    .map(|interval| bucket_start(event.timestamp, interval, query.timezone));
                row.actor_id = query.actor.and_then(|kind| view.actor(kind));
                if query.sessions {
                    row.session_id = event.session_id();
                }
                row.value = match &query.value {
                    None => None,
                    Some(ValueSource::EventProperty(key)) => {
                        event.properties.get(key).and_then(value_as_f64)
                    }
                    Some(ValueSource::SessionDuration) => view.session_duration(),
                };
                row
            })
            .collect()
    }

    fn collect_property_values(&self, query: &PropertyValuesQuery) -> Vec<PropertyValueCount> {
        let store = self.store.read();
        let sessions = if query.property.scope == PropertyScope::Session
            || query.predicate.references_scope(&PropertyScope::Session)
        {
            store.session_durations(query.team_id)
        } else {
            HashMap::new()
        };

        let mut counts: HashMap<Option<String>, PropertyValueCount> = HashMap::new();
        for view in store.matching(query.team_id, &query.predicate, query.window, &sessions) {
            let value = view
                .property(&query.property.scope, &query.property.key)
                .filter(|v| !v.is_null());
            let key = value.as_ref().map(value_to_string);
            counts
                .entry(key)
                .or_insert(PropertyValueCount { value, count: 0 })
                .count += 1;
        }

        let mut ranked: Vec<(Option<String>, PropertyValueCount)> = counts.into_iter().collect();
        ranked.sort_by(|(ka, a), (kb, b)| b.count.cmp(&a.count).then_with(|| ka.cmp(kb)));
        if let Some(limit) = query.limit {
            ranked.truncate(limit);
        }
        ranked.into_iter().map(|(_, v)| v).collect()
    }
}

fn needs_sessions(predicate: &Predicate, value: Option<&ValueSource>) -> bool {
    matches!(value, Some(ValueSource::SessionDuration))
        || predicate.references_scope(&PropertyScope::Session)
}

fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, QueryError> {
    let contents = std::fs::read_to_string(path)?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| {
                QueryError::Serialization(format!("{}:{}: {}", path.display(), idx + 1, e))
            })
        })
        .collect()
}

#[async_trait]
impl EventExecutor for MemoryBackend {
    async fn execute(&self, query: &EventQuery) -> Result<Vec<RawRow>, QueryError> {
        let start = Instant::now();
        let rows = self.run_query(query);
        tracing::debug!(
            team_id = query.team_id,
            rows = rows.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "executed event query"
        );
        Ok(rows)
    }

    async fn property_values(
        &self,
        query: &PropertyValuesQuery,
    ) -> Result<Vec<PropertyValueCount>, QueryError> {
        let values = self.collect_property_values(query);
        tracing::debug!(
            team_id = query.team_id,
            property = %query.property.key,
            values = values.len(),
            "collected property values"
        );
        Ok(values)
    }

    async fn earliest_timestamp(&self, team_id: u64) -> Result<Option<DateTime<Utc>>, QueryError> {
        Ok(self
            .store
            .read()
            .events
            .iter()
            .filter(|e| e.team_id == team_id)
            .map(|e| e.timestamp)
            .min())
    }

    async fn health_check(&self) -> Result<(), QueryError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod memory_test;
