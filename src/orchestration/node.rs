//! Registry key layout for one orchestrated schema.
//!
//! ```text
//! /{namespace}/{schema}/rule
//! /{namespace}/{schema}/datasource
//! /{namespace}/{schema}/datasource/{name}/disabled
//! /{namespace}/{schema}/props
//! /{namespace}/instances/{instance_id}
//! ```
//! Without a namespace the leading segment is omitted.

use crate::registry::path;

const RULE: &str = "rule";
const DATA_SOURCE: &str = "datasource";
const PROPS: &str = "props";
const DISABLED: &str = "disabled";
const INSTANCES: &str = "instances";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestrationNode {
    base: String,
    schema: String,
}

impl OrchestrationNode {
    pub fn new(namespace: Option<&str>, schema: impl Into<String>) -> Self {
        let base = match namespace {
            Some(ns) if !ns.is_empty() => path::join(path::ROOT, ns),
            _ => path::ROOT.to_string(),
        };
        Self {
            base,
            schema: schema.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn schema_path(&self) -> String {
        path::join(&self.base, &self.schema)
    }

    pub fn rule_path(&self) -> String {
        path::join(&self.schema_path(), RULE)
    }

    pub fn data_source_path(&self) -> String {
        path::join(&self.schema_path(), DATA_SOURCE)
    }

    pub fn props_path(&self) -> String {
        path::join(&self.schema_path(), PROPS)
    }

    pub fn disabled_path(&self, data_source: &str) -> String {
        path::join(&path::join(&self.data_source_path(), data_source), DISABLED)
    }

    pub fn instances_path(&self) -> String {
        path::join(&self.base, INSTANCES)
    }

    pub fn instance_path(&self, instance_id: &str) -> String {
        path::join(&self.instances_path(), instance_id)
    }

    /// Data-source name if `node_path` is a disabled-state key.
    pub fn disabled_name<'a>(&self, node_path: &'a str) -> Option<&'a str> {
        let root = self.data_source_path();
        let name = path::child_segment(node_path, &root)?;
        let expected_len = root.len() + 1 + name.len() + 1 + DISABLED.len();
        if node_path.len() == expected_len && node_path.ends_with(DISABLED) {
            Some(name)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_with_namespace() {
        let node = OrchestrationNode::new(Some("orchestration_ds"), "sharding_db");
        assert_eq!(node.rule_path(), "/orchestration_ds/sharding_db/rule");
        assert_eq!(node.data_source_path(), "/orchestration_ds/sharding_db/datasource");
        assert_eq!(node.props_path(), "/orchestration_ds/sharding_db/props");
        assert_eq!(
            node.disabled_path("ds_0"),
            "/orchestration_ds/sharding_db/datasource/ds_0/disabled"
        );
        assert_eq!(node.instance_path("abc"), "/orchestration_ds/instances/abc");
    }

    #[test]
    fn test_layout_without_namespace() {
        let node = OrchestrationNode::new(None, "logic_db");
        assert_eq!(node.rule_path(), "/logic_db/rule");
        assert_eq!(node.instances_path(), "/instances");
    }

    #[test]
    fn test_disabled_name() {
        let node = OrchestrationNode::new(None, "logic_db");
        assert_eq!(node.disabled_name("/logic_db/datasource/ds_0/disabled"), Some("ds_0"));
        assert_eq!(node.disabled_name("/logic_db/datasource/ds_0"), None);
        assert_eq!(node.disabled_name("/logic_db/datasource"), None);
        assert_eq!(node.disabled_name("/logic_db/datasource/ds_0/disabled/x"), None);
        assert_eq!(node.disabled_name("/logic_db/datasource/ds_0/other"), None);
        assert_eq!(node.disabled_name("/logic_db/rule"), None);
    }
}
