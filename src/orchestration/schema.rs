//! Declarative configuration of one schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::orchestration::codec::DataSourceConfigurations;
use crate::orchestration::event::ChangeEvent;
use crate::props::Properties;
use crate::rule::RuleConfiguration;

/// Everything the registry holds for a schema.
///
/// Also the format of a local schema file adopted at startup or pushed by
/// the CLI.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfiguration {
    pub rule: RuleConfiguration,
    pub data_sources: DataSourceConfigurations,
    pub props: Properties,
    /// Disabled flags by data-source name.
    pub disabled: BTreeMap<String, bool>,
}

impl SchemaConfiguration {
    /// Fold a published change into this view.
    pub fn apply(&mut self, event: &ChangeEvent) {
        match event {
            ChangeEvent::RuleChanged { rule, .. } => self.rule = rule.clone(),
            ChangeEvent::DataSourceMapChanged { data_sources, .. } => {
                self.data_sources = data_sources.clone()
            }
            ChangeEvent::PropertiesChanged { props, .. } => self.props = props.clone(),
            ChangeEvent::DisabledStateChanged {
                data_source,
                disabled,
                ..
            } => {
                self.disabled.insert(data_source.clone(), *disabled);
            }
        }
    }

    pub fn is_disabled(&self, data_source: &str) -> bool {
        self.disabled.get(data_source).copied().unwrap_or(false)
    }
}
