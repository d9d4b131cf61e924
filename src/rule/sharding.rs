//! Compiled sharding rule.
//!
//! # Responsibilities
//! - Validate a `RuleConfiguration` before it can become live
//! - Own one `ReplicaGroupRule` per replica group
//! - Carry disabled flags across a rule swap

use std::collections::{BTreeSet, HashSet};

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::rule::config::RuleConfiguration;
use crate::rule::replica::ReplicaGroupRule;

#[derive(Debug)]
pub struct ShardingRule {
    config: RuleConfiguration,
    replica_groups: Vec<ReplicaGroupRule>,
}

impl ShardingRule {
    /// Compile `config` for a schema whose data sources are `data_sources`.
    pub fn compile(
        schema: &str,
        config: RuleConfiguration,
        data_sources: &BTreeSet<String>,
    ) -> OrchestrationResult<Self> {
        if config.is_empty() {
            return Err(OrchestrationError::ConfigurationMissing(schema.to_string()));
        }

        let mut seen = HashSet::new();
        for table in &config.tables {
            if table.logic_table.trim().is_empty() {
                return Err(OrchestrationError::InvalidRule(
                    "table rule without a logic table".to_string(),
                ));
            }
            if !seen.insert(table.logic_table.to_ascii_lowercase()) {
                return Err(OrchestrationError::InvalidRule(format!(
                    "duplicate logic table '{}'",
                    table.logic_table
                )));
            }
        }

        let mut group_names = HashSet::new();
        for group in &config.replica_groups {
            if !group_names.insert(group.name.as_str()) {
                return Err(OrchestrationError::InvalidRule(format!(
                    "duplicate replica group '{}'",
                    group.name
                )));
            }
        }

        let replica_groups: Vec<ReplicaGroupRule> =
            config.replica_groups.iter().map(ReplicaGroupRule::new).collect();

        // Rule and data sources change independently, so a dangling name is only a warning
        for group in &replica_groups {
            for member in std::iter::once(group.primary()).chain(group.replicas().iter().map(String::as_str)) {
                if !data_sources.is_empty() && !data_sources.contains(member) {
                    tracing::warn!(
                        schema = %schema,
                        replica_group = %group.name(),
                        data_source = %member,
                        "Replica group references an unknown data source"
                    );
                }
            }
        }

        Ok(Self {
            config,
            replica_groups,
        })
    }

    pub fn config(&self) -> &RuleConfiguration {
        &self.config
    }

    pub fn replica_groups(&self) -> &[ReplicaGroupRule] {
        &self.replica_groups
    }

    pub fn replica_group(&self, name: &str) -> Option<&ReplicaGroupRule> {
        self.replica_groups.iter().find(|g| g.name() == name)
    }

    /// Flip `data_source` in every group holding it. Returns the number of groups touched.
    pub fn set_disabled(&self, data_source: &str, disabled: bool) -> usize {
        self.replica_groups
            .iter()
            .filter(|g| g.disable(data_source, disabled))
            .count()
    }

    /// Disable every listed data source this rule's groups hold; other names are skipped.
    pub fn apply_disabled(&self, disabled: &BTreeSet<String>) {
        for name in disabled {
            self.set_disabled(name, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::config::{ReplicaGroupConfiguration, TableRuleConfiguration};

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn rule_with_group() -> RuleConfiguration {
        RuleConfiguration {
            tables: vec![TableRuleConfiguration::new("t_order", "ms_ds.t_order_${0..1}")],
            replica_groups: vec![ReplicaGroupConfiguration::new("ms_ds", "primary", &["replica_0", "replica_1"])],
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_rule_is_missing() {
        let result = ShardingRule::compile("logic_db", RuleConfiguration::default(), &BTreeSet::new());
        assert!(matches!(result, Err(OrchestrationError::ConfigurationMissing(ref s)) if s == "logic_db"));
    }

    #[test]
    fn test_duplicate_tables_rejected() {
        let config = RuleConfiguration {
            tables: vec![
                TableRuleConfiguration::new("t_order", "ds_0.t_order"),
                TableRuleConfiguration::new("T_ORDER", "ds_1.t_order"),
            ],
            ..Default::default()
        };
        let result = ShardingRule::compile("logic_db", config, &BTreeSet::new());
        assert!(matches!(result, Err(OrchestrationError::InvalidRule(_))));
    }

    #[test]
    fn test_set_disabled_counts_groups() {
        let rule = ShardingRule::compile("logic_db", rule_with_group(), &names(&["primary", "replica_0", "replica_1"])).unwrap();
        assert_eq!(rule.set_disabled("replica_0", true), 1);
        assert_eq!(rule.set_disabled("unknown", true), 0);
        assert_eq!(
            rule.replica_group("ms_ds").unwrap().available_replicas(),
            vec!["replica_1".to_string()]
        );
    }

    #[test]
    fn test_apply_disabled_covers_members_only() {
        let mut config = rule_with_group();
        config.replica_groups[0].replicas = vec!["replica_1".into(), "replica_2".into()];
        let rule = ShardingRule::compile("logic_db", config, &BTreeSet::new()).unwrap();
        rule.apply_disabled(&names(&["replica_0", "replica_1"]));

        let group = rule.replica_group("ms_ds").unwrap();
        assert_eq!(group.disabled_names(), vec!["replica_1".to_string()]);
        assert_eq!(group.available_replicas(), vec!["replica_2".to_string()]);
    }
}
