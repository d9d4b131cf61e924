//! Replica group routing state.
//!
//! # Responsibilities
//! - Hold the members of one primary/replica group
//! - Track which members are disabled (taken out of read rotation)
//!
//! # Design Decisions
//! - The disabled set is soft state behind its own lock; flipping a flag
//!   never replaces the snapshot that owns the rule
//! - Flags for names outside the group are ignored

use std::collections::BTreeSet;

use parking_lot::RwLock;

use crate::rule::config::ReplicaGroupConfiguration;

#[derive(Debug)]
pub struct ReplicaGroupRule {
    name: String,
    primary: String,
    replicas: Vec<String>,
    disabled: RwLock<BTreeSet<String>>,
}

impl ReplicaGroupRule {
    pub fn new(config: &ReplicaGroupConfiguration) -> Self {
        Self {
            name: config.name.clone(),
            primary: config.primary.clone(),
            replicas: config.replicas.clone(),
            disabled: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn replicas(&self) -> &[String] {
        &self.replicas
    }

    /// Whether `data_source` is the primary or one of the replicas.
    pub fn contains(&self, data_source: &str) -> bool {
        self.primary == data_source || self.replicas.iter().any(|r| r == data_source)
    }

    /// Set or clear the disabled flag. Returns false for non-members.
    pub fn disable(&self, data_source: &str, disabled: bool) -> bool {
        if !self.contains(data_source) {
            return false;
        }
        let mut set = self.disabled.write();
        if disabled {
            set.insert(data_source.to_string());
        } else {
            set.remove(data_source);
        }
        true
    }

    pub fn is_disabled(&self, data_source: &str) -> bool {
        self.disabled.read().contains(data_source)
    }

    pub fn disabled_names(&self) -> Vec<String> {
        self.disabled.read().iter().cloned().collect()
    }

    /// Replicas currently eligible for reads.
    pub fn available_replicas(&self) -> Vec<String> {
        let disabled = self.disabled.read();
        self.replicas
            .iter()
            .filter(|r| !disabled.contains(*r))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> ReplicaGroupRule {
        ReplicaGroupRule::new(&ReplicaGroupConfiguration::new(
            "ms_ds",
            "primary_ds",
            &["replica_ds_0", "replica_ds_1"],
        ))
    }

    #[test]
    fn test_disable_and_enable() {
        let rule = group();
        assert!(rule.disable("replica_ds_0", true));
        assert_eq!(rule.available_replicas(), vec!["replica_ds_1".to_string()]);
        assert!(rule.is_disabled("replica_ds_0"));

        assert!(rule.disable("replica_ds_0", false));
        assert_eq!(rule.available_replicas().len(), 2);
        assert!(rule.disabled_names().is_empty());
    }

    #[test]
    fn test_non_member_is_ignored() {
        let rule = group();
        assert!(!rule.disable("other_ds", true));
        assert!(rule.disabled_names().is_empty());
    }
}
