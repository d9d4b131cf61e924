//! Declarative rule configuration as stored in the registry.

use serde::{Deserialize, Serialize};

/// Sharding rule configuration for one schema.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfiguration {
    /// Table rules; a rule with none cannot route.
    pub tables: Vec<TableRuleConfiguration>,
    /// Groups of logic tables sharded identically, e.g. "t_order,t_order_item".
    pub binding_tables: Vec<String>,
    pub default_data_source: Option<String>,
    pub replica_groups: Vec<ReplicaGroupConfiguration>,
}

impl RuleConfiguration {
    /// True when no table rule is defined.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn logic_tables(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.logic_table.as_str()).collect()
    }
}

/// Routing of one logic table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableRuleConfiguration {
    pub logic_table: String,
    /// Inline expression over physical nodes, e.g. "ds_${0..1}.t_order_${0..1}".
    pub actual_data_nodes: String,
    pub sharding_column: Option<String>,
}

impl TableRuleConfiguration {
    pub fn new(logic_table: impl Into<String>, actual_data_nodes: impl Into<String>) -> Self {
        Self {
            logic_table: logic_table.into(),
            actual_data_nodes: actual_data_nodes.into(),
            sharding_column: None,
        }
    }
}

/// A primary data source and its read replicas.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaGroupConfiguration {
    pub name: String,
    pub primary: String,
    pub replicas: Vec<String>,
}

impl ReplicaGroupConfiguration {
    pub fn new(name: impl Into<String>, primary: impl Into<String>, replicas: &[&str]) -> Self {
        Self {
            name: name.into(),
            primary: primary.into(),
            replicas: replicas.iter().map(|r| r.to_string()).collect(),
        }
    }
}
