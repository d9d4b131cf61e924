//! Reads and writes schema configuration in the registry.
//!
//! # Responsibilities
//! - Load rule, data-source map, properties and disabled flags
//! - Persist each category for operators and for adopted configurations
//!
//! # Design Decisions
//! - Loading never fails on an absent category; callers decide whether a
//!   missing rule is fatal
//! - Undecodable stored values are errors, so a corrupt registry stops
//!   startup instead of starting with defaults

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::orchestration::codec::{self, DataSourceConfigurations};
use crate::orchestration::node::OrchestrationNode;
use crate::orchestration::schema::SchemaConfiguration;
use crate::props::Properties;
use crate::registry::CoordinationRepository;
use crate::rule::RuleConfiguration;

/// Raw registry contents for a schema; `None` where a category is unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredConfiguration {
    pub rule: Option<RuleConfiguration>,
    pub data_sources: Option<DataSourceConfigurations>,
    pub props: Option<Properties>,
    pub disabled: BTreeMap<String, bool>,
}

#[derive(Clone)]
pub struct ConfigCenter {
    repository: Arc<dyn CoordinationRepository>,
    node: OrchestrationNode,
}

impl ConfigCenter {
    pub fn new(repository: Arc<dyn CoordinationRepository>, node: OrchestrationNode) -> Self {
        Self { repository, node }
    }

    pub fn node(&self) -> &OrchestrationNode {
        &self.node
    }

    /// Stored value at `node_path`, treating an empty value as unset.
    async fn load_value(&self, node_path: &str) -> OrchestrationResult<Option<String>> {
        Ok(self
            .repository
            .get(node_path)
            .await?
            .filter(|v| !v.trim().is_empty()))
    }

    pub async fn load_rule(&self) -> OrchestrationResult<Option<RuleConfiguration>> {
        let node_path = self.node.rule_path();
        match self.load_value(&node_path).await? {
            Some(value) => codec::decode_rule(&value)
                .map(Some)
                .map_err(|reason| OrchestrationError::MalformedChange { path: node_path, reason }),
            None => Ok(None),
        }
    }

    pub async fn load_data_sources(&self) -> OrchestrationResult<Option<DataSourceConfigurations>> {
        let node_path = self.node.data_source_path();
        match self.load_value(&node_path).await? {
            Some(value) => codec::decode_data_sources(&value)
                .map(Some)
                .map_err(|reason| OrchestrationError::MalformedChange { path: node_path, reason }),
            None => Ok(None),
        }
    }

    pub async fn load_properties(&self) -> OrchestrationResult<Option<Properties>> {
        let node_path = self.node.props_path();
        match self.load_value(&node_path).await? {
            Some(value) => {
                let props = codec::decode_properties(&value).map_err(|reason| {
                    OrchestrationError::MalformedChange {
                        path: node_path.clone(),
                        reason,
                    }
                })?;
                props
                    .validate()
                    .map_err(|reason| OrchestrationError::MalformedChange { path: node_path, reason })?;
                Ok(Some(props))
            }
            None => Ok(None),
        }
    }

    /// Disabled flags of every child under the data-source path.
    pub async fn load_disabled(&self) -> OrchestrationResult<BTreeMap<String, bool>> {
        let mut flags = BTreeMap::new();
        for name in self
            .repository
            .get_children_keys(&self.node.data_source_path())
            .await?
        {
            let node_path = self.node.disabled_path(&name);
            if let Some(value) = self.repository.get(&node_path).await? {
                let disabled = codec::decode_disabled(&value)
                    .map_err(|reason| OrchestrationError::MalformedChange { path: node_path, reason })?;
                flags.insert(name, disabled);
            }
        }
        Ok(flags)
    }

    pub async fn load(&self) -> OrchestrationResult<StoredConfiguration> {
        Ok(StoredConfiguration {
            rule: self.load_rule().await?,
            data_sources: self.load_data_sources().await?,
            props: self.load_properties().await?,
            disabled: self.load_disabled().await?,
        })
    }

    pub async fn persist_rule(&self, rule: &RuleConfiguration) -> OrchestrationResult<()> {
        let value = codec::encode_rule(rule)?;
        self.repository.persist(&self.node.rule_path(), &value).await?;
        Ok(())
    }

    pub async fn persist_data_sources(&self, data_sources: &DataSourceConfigurations) -> OrchestrationResult<()> {
        let value = codec::encode_data_sources(data_sources)?;
        self.repository
            .persist(&self.node.data_source_path(), &value)
            .await?;
        Ok(())
    }

    pub async fn persist_properties(&self, props: &Properties) -> OrchestrationResult<()> {
        let value = codec::encode_properties(props)?;
        self.repository.persist(&self.node.props_path(), &value).await?;
        Ok(())
    }

    pub async fn persist_disabled(&self, data_source: &str, disabled: bool) -> OrchestrationResult<()> {
        self.repository
            .persist(&self.node.disabled_path(data_source), codec::encode_disabled(disabled))
            .await?;
        Ok(())
    }

    /// Write every category plus the disabled flags.
    pub async fn persist_all(&self, config: &SchemaConfiguration) -> OrchestrationResult<()> {
        self.persist_data_sources(&config.data_sources).await?;
        self.persist_rule(&config.rule).await?;
        self.persist_properties(&config.props).await?;
        for (name, disabled) in &config.disabled {
            self.persist_disabled(name, *disabled).await?;
        }
        Ok(())
    }
}
