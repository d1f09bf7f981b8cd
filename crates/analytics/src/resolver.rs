//! Cohort and action resolution
//!
//! Cohorts and actions are owned by other services. The engine reaches them
//! through [`CohortResolver`] and [`ActionResolver`]; [`StaticCatalog`] is a
//! fixed in-process implementation of both, loadable from JSON.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use trendline_query::Predicate;

use crate::error::{Result, TrendsError};
use crate::properties::PropertyGroup;

/// A cohort and its person-property definition
#[derive(Debug, Clone, Deserialize)]
pub struct CohortDefinition {
    pub id: u64,
    pub name: String,
    /// Inlined when membership has not been calculated yet
    #[serde(default)]
    pub filters: PropertyGroup,
}

/// One way of matching an action: an optional event name plus property filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionStep {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub properties: PropertyGroup,
}

/// A named action; an event matches when any step matches
#[derive(Debug, Clone, Deserialize)]
pub struct ActionDefinition {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<ActionStep>,
}

impl ActionDefinition {
    /// Cohort ids referenced by any step
    pub fn cohort_ids(&self) -> Vec<u64> {
        let mut ids = Vec::new();
        for step in &self.steps {
            for id in step.properties.cohort_ids() {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// OR of the steps; an action without steps matches nothing
    pub fn to_predicate(&self, cohorts: &HashMap<u64, Predicate>) -> Result<Predicate> {
        let steps = self
            .steps
            .iter()
            .map(|step| {
                let event = step
                    .event
                    .as_ref()
                    .map(|name| Predicate::event(name.clone()))
                    .unwrap_or_default();
                Ok(Predicate::and([event, step.properties.to_predicate(cohorts)?]))
            })
            .collect::<Result<Vec<_>>>()?;
        if steps.is_empty() {
            return Ok(Predicate::none());
        }
        Ok(Predicate::or(steps))
    }
}

/// Cohort lookups
#[async_trait]
pub trait CohortResolver: Send + Sync {
    /// Cohort definition, `None` when the id is unknown
    async fn cohort(&self, team_id: u64, cohort_id: u64) -> Result<Option<CohortDefinition>>;

    /// Whether precomputed membership is ready
    async fn is_calculated(&self, team_id: u64, cohort_id: u64) -> Result<bool>;

    /// Person ids in the cohort; only meaningful when calculated
    async fn members(&self, team_id: u64, cohort_id: u64) -> Result<HashSet<String>>;
}

/// Action lookups
#[async_trait]
pub trait ActionResolver: Send + Sync {
    /// Action definition, `None` when the id is unknown
    async fn action(&self, team_id: u64, action_id: u64) -> Result<Option<ActionDefinition>>;
}

/// Resolve a cohort into an event predicate
///
/// Calculated cohorts become a person-membership test. Others inline their
/// property definition, which may not reference further cohorts.
pub async fn cohort_predicate(
    resolver: &dyn CohortResolver,
    team_id: u64,
    cohort_id: u64,
) -> Result<(CohortDefinition, Predicate)> {
    let definition = resolver
        .cohort(team_id, cohort_id)
        .await?
        .ok_or(TrendsError::UnknownCohort(cohort_id))?;

    let predicate = if resolver.is_calculated(team_id, cohort_id).await? {
        let members = resolver.members(team_id, cohort_id).await?;
        tracing::debug!(team_id, cohort_id, members = members.len(), "using cohort membership");
        Predicate::PersonIn(Arc::new(members))
    } else {
        tracing::debug!(team_id, cohort_id, "inlining uncalculated cohort definition");
        definition.filters.to_predicate(&HashMap::new()).map_err(|e| {
            TrendsError::Resolution(format!("cohort {cohort_id} definition: {e}"))
        })?
    };
    Ok((definition, predicate))
}

/// Resolve several cohorts into predicates keyed by id
pub async fn cohort_predicates(
    resolver: &dyn CohortResolver,
    team_id: u64,
    cohort_ids: &[u64],
) -> Result<HashMap<u64, Predicate>> {
    let mut predicates = HashMap::with_capacity(cohort_ids.len());
    for &id in cohort_ids {
        let (_, predicate) = cohort_predicate(resolver, team_id, id).await?;
        predicates.insert(id, predicate);
    }
    Ok(predicates)
}

#[derive(Debug, Clone)]
struct StaticCohort {
    definition: CohortDefinition,
    /// `Some` once membership is calculated
    members: Option<HashSet<String>>,
}

/// Fixed cohorts and actions, keyed by team
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    cohorts: HashMap<(u64, u64), StaticCohort>,
    actions: HashMap<(u64, u64), ActionDefinition>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    cohorts: Vec<CohortEntry>,
    #[serde(default)]
    actions: Vec<ActionEntry>,
}

#[derive(Deserialize)]
struct CohortEntry {
    #[serde(default = "default_team_id")]
    team_id: u64,
    #[serde(flatten)]
    definition: CohortDefinition,
    #[serde(default)]
    members: Option<HashSet<String>>,
}

#[derive(Deserialize)]
struct ActionEntry {
    #[serde(default = "default_team_id")]
    team_id: u64,
    #[serde(flatten)]
    definition: ActionDefinition,
}

fn default_team_id() -> u64 {
    1
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{"cohorts": [...], "actions": [...]}`
    ///
    /// A cohort with a `members` list counts as calculated.
    pub fn from_json(s: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(s)
            .map_err(|e| TrendsError::Config(format!("invalid catalog: {e}")))?;
        let mut catalog = Self::new();
        for entry in file.cohorts {
            catalog = catalog.with_cohort(entry.team_id, entry.definition, entry.members);
        }
        for entry in file.actions {
            catalog = catalog.with_action(entry.team_id, entry.definition);
        }
        Ok(catalog)
    }

    /// Add a cohort; `members` marks it calculated
    pub fn with_cohort(
        mut self,
        team_id: u64,
        definition: CohortDefinition,
        members: Option<HashSet<String>>,
    ) -> Self {
        self.cohorts.insert(
            (team_id, definition.id),
            StaticCohort {
                definition,
                members,
            },
        );
        self
    }

    pub fn with_action(mut self, team_id: u64, definition: ActionDefinition) -> Self {
        self.actions.insert((team_id, definition.id), definition);
        self
    }
}

#[async_trait]
impl CohortResolver for StaticCatalog {
    async fn cohort(&self, team_id: u64, cohort_id: u64) -> Result<Option<CohortDefinition>> {
        Ok(self
            .cohorts
            .get(&(team_id, cohort_id))
            .map(|c| c.definition.clone()))
    }

    async fn is_calculated(&self, team_id: u64, cohort_id: u64) -> Result<bool> {
        Ok(self
            .cohorts
            .get(&(team_id, cohort_id))
            .is_some_and(|c| c.members.is_some()))
    }

    async fn members(&self, team_id: u64, cohort_id: u64) -> Result<HashSet<String>> {
        self.cohorts
            .get(&(team_id, cohort_id))
            .map(|c| c.members.clone().unwrap_or_default())
            .ok_or(TrendsError::UnknownCohort(cohort_id))
    }
}

#[async_trait]
impl ActionResolver for StaticCatalog {
    async fn action(&self, team_id: u64, action_id: u64) -> Result<Option<ActionDefinition>> {
        Ok(self.actions.get(&(team_id, action_id)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::PropertyFilter;

    fn catalog() -> StaticCatalog {
        StaticCatalog::new()
            .with_cohort(
                1,
                CohortDefinition {
                    id: 1,
                    name: "paying".into(),
                    filters: PropertyGroup::default(),
                },
                Some(HashSet::from(["p1".to_string()])),
            )
            .with_cohort(
                1,
                CohortDefinition {
                    id: 2,
                    name: "macs".into(),
                    filters: PropertyGroup::and([PropertyFilter::person("$os", "Mac")]),
                },
                None,
            )
    }

    #[tokio::test]
    async fn test_calculated_cohort_uses_membership() {
        let (def, predicate) = cohort_predicate(&catalog(), 1, 1).await.unwrap();
        assert_eq!(def.name, "paying");
        assert!(matches!(predicate, Predicate::PersonIn(ref m) if m.contains("p1")));
    }

    #[tokio::test]
    async fn test_uncalculated_cohort_inlines_definition() {
        let (_, predicate) = cohort_predicate(&catalog(), 1, 2).await.unwrap();
        assert!(matches!(predicate, Predicate::Property(ref c) if c.key == "$os"));
    }

    #[tokio::test]
    async fn test_unknown_cohort() {
        let err = cohort_predicate(&catalog(), 2, 1).await.unwrap_err();
        assert!(matches!(err, TrendsError::UnknownCohort(1)));
    }

    #[test]
    fn test_action_predicate() {
        let action = ActionDefinition {
            id: 3,
            name: "signed up".into(),
            steps: vec![
                ActionStep {
                    event: Some("sign up".into()),
                    properties: PropertyGroup::default(),
                },
                ActionStep {
                    event: Some("$autocapture".into()),
                    properties: PropertyGroup::and([PropertyFilter::event("text", "Sign up")]),
                },
            ],
        };
        let predicate = action.to_predicate(&HashMap::new()).unwrap();
        let Predicate::Or(steps) = predicate else {
            panic!("expected disjunction");
        };
        assert_eq!(steps[0], Predicate::event("sign up"));
        assert!(matches!(steps[1], Predicate::And(_)));

        let empty = ActionDefinition {
            id: 4,
            name: "empty".into(),
            steps: Vec::new(),
        };
        assert_eq!(empty.to_predicate(&HashMap::new()).unwrap(), Predicate::none());
    }

    #[tokio::test]
    async fn test_catalog_from_json() {
        let catalog = StaticCatalog::from_json(
            r#"{
                "cohorts": [{"id": 5, "name": "beta", "members": ["p9"]}],
                "actions": [{"team_id": 2, "id": 8, "name": "paid", "steps": [{"event": "purchase"}]}]
            }"#,
        )
        .unwrap();

        assert!(catalog.is_calculated(1, 5).await.unwrap());
        assert_eq!(catalog.action(2, 8).await.unwrap().unwrap().name, "paid");
        assert!(catalog.action(1, 8).await.unwrap().is_none());
        assert!(StaticCatalog::from_json("{").is_err());
    }
}
