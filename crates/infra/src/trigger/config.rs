use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use reaper_core::{GuardName, GuardRegistry, RecordType};

use super::association::DeferredAssociation;
use super::schedule::ScheduleRule;

/// When enqueued jobs become visible to workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueMode {
    /// Buffer while a transaction is open; publish on commit, discard on
    /// rollback.
    #[default]
    Transactional,
    /// Publish as soon as the triggering write happens.
    Immediate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("rule for `{record_type}` names unregistered guard `{guard}`")]
    UnknownGuard {
        record_type: RecordType,
        guard: GuardName,
    },

    #[error("rule for `{0}` has a negative delay")]
    NegativeDelay(RecordType),

    #[error("association `{name}` declared twice on `{owner_type}`")]
    DuplicateAssociation { owner_type: RecordType, name: String },
}

#[derive(Debug, Default)]
struct Tables {
    associations: HashMap<RecordType, Vec<DeferredAssociation>>,
    rules: HashMap<RecordType, Vec<ScheduleRule>>,
}

/// Immutable trigger configuration, built once and shared.
#[derive(Debug, Clone, Default)]
pub struct TriggerConfig {
    tables: Arc<Tables>,
}

impl TriggerConfig {
    pub fn builder() -> TriggerConfigBuilder {
        TriggerConfigBuilder::default()
    }

    pub fn associations(&self, owner_type: &RecordType) -> &[DeferredAssociation] {
        self.tables
            .associations
            .get(owner_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn rules(&self, record_type: &RecordType) -> &[ScheduleRule] {
        self.tables
            .rules
            .get(record_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct TriggerConfigBuilder {
    associations: Vec<DeferredAssociation>,
    rules: Vec<ScheduleRule>,
}

impl TriggerConfigBuilder {
    pub fn association(mut self, association: DeferredAssociation) -> Self {
        self.associations.push(association);
        self
    }

    pub fn rule(mut self, rule: ScheduleRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Validate every guard name against `guards` and freeze the tables.
    pub fn build(self, guards: &GuardRegistry) -> Result<TriggerConfig, ConfigError> {
        let mut tables = Tables::default();

        let mut seen = HashSet::new();
        for association in self.associations {
            if !seen.insert((association.owner_type().clone(), association.name().to_string())) {
                return Err(ConfigError::DuplicateAssociation {
                    owner_type: association.owner_type().clone(),
                    name: association.name().to_string(),
                });
            }
            tables
                .associations
                .entry(association.owner_type().clone())
                .or_default()
                .push(association);
        }

        for rule in self.rules {
            if rule.after() < chrono::Duration::zero() {
                return Err(ConfigError::NegativeDelay(rule.record_type().clone()));
            }
            for guard in [rule.when_guard(), rule.ensuring_guard()].into_iter().flatten() {
                if !guards.contains(rule.record_type(), guard) {
                    return Err(ConfigError::UnknownGuard {
                        record_type: rule.record_type().clone(),
                        guard: guard.clone(),
                    });
                }
            }
            tables
                .rules
                .entry(rule.record_type().clone())
                .or_default()
                .push(rule);
        }

        Ok(TriggerConfig {
            tables: Arc::new(tables),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn guards() -> GuardRegistry {
        GuardRegistry::builder()
            .register("book", "published?", |r| r.str_attr("status") == Some("published"))
            .build()
    }

    #[test]
    fn build_groups_by_type() {
        let config = TriggerConfig::builder()
            .association(DeferredAssociation::has_many("taggings", "book", "tagging", "book_id"))
            .association(DeferredAssociation::has_many("taggings", "tag", "tagging", "tag_id"))
            .rule(ScheduleRule::new("book", Duration::days(30)).when("published?"))
            .build(&guards())
            .unwrap();

        assert_eq!(config.associations(&RecordType::new("book")).len(), 1);
        assert_eq!(config.associations(&RecordType::new("tag")).len(), 1);
        assert_eq!(config.rules(&RecordType::new("book")).len(), 1);
        assert!(config.rules(&RecordType::new("tag")).is_empty());
    }

    #[test]
    fn unknown_guard_is_rejected() {
        let err = TriggerConfig::builder()
            .rule(ScheduleRule::new("book", Duration::days(30)).ensuring("archived?"))
            .build(&guards())
            .unwrap_err();

        assert_eq!(
            err,
            ConfigError::UnknownGuard {
                record_type: RecordType::new("book"),
                guard: GuardName::from("archived?"),
            }
        );
    }

    #[test]
    fn guard_must_belong_to_the_rule_type() {
        let err = TriggerConfig::builder()
            .rule(ScheduleRule::new("essay", Duration::days(1)).when("published?"))
            .build(&guards())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownGuard { .. }));
    }

    #[test]
    fn negative_delay_and_duplicates_are_rejected() {
        assert_eq!(
            TriggerConfig::builder()
                .rule(ScheduleRule::new("book", Duration::days(-1)))
                .build(&guards())
                .unwrap_err(),
            ConfigError::NegativeDelay(RecordType::new("book"))
        );

        assert!(matches!(
            TriggerConfig::builder()
                .association(DeferredAssociation::has_many("taggings", "book", "tagging", "book_id"))
                .association(DeferredAssociation::has_one("taggings", "book", "tagging", "book_id"))
                .build(&guards()),
            Err(ConfigError::DuplicateAssociation { .. })
        ));
    }
}
