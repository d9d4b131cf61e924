//! Immutable runtime snapshot.
//!
//! A snapshot bundles the compiled rule, the live pools and the properties
//! of one schema at one point in time. Changes build a new snapshot; the
//! old one stays valid for whoever still holds it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::datasource::{DataSourceConfiguration, DataSourceFactory, DataSourceMap, PooledDataSource};
use crate::error::OrchestrationResult;
use crate::orchestration::schema::SchemaConfiguration;
use crate::props::Properties;
use crate::rule::ShardingRule;

#[derive(Debug)]
pub struct RuntimeSnapshot {
    version: u64,
    schema: String,
    rule: Arc<ShardingRule>,
    data_sources: DataSourceMap,
    props: Properties,
}

impl RuntimeSnapshot {
    pub fn new(
        schema: impl Into<String>,
        rule: ShardingRule,
        data_sources: DataSourceMap,
        props: Properties,
    ) -> Self {
        Self {
            version: 1,
            schema: schema.into(),
            rule: Arc::new(rule),
            data_sources,
            props,
        }
    }

    /// Compile `config` and open its pools. Nothing stays open on failure.
    pub fn build(
        schema: &str,
        config: &SchemaConfiguration,
        factory: &dyn DataSourceFactory,
    ) -> OrchestrationResult<Self> {
        let names: BTreeSet<String> = config.data_sources.keys().cloned().collect();
        let rule = ShardingRule::compile(schema, config.rule.clone(), &names)?;
        for (name, disabled) in &config.disabled {
            if *disabled {
                rule.set_disabled(name, true);
            }
        }
        let data_sources = crate::datasource::open_all(factory, config.data_sources.iter())?;
        Ok(Self::new(schema, rule, data_sources, config.props.clone()))
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn rule(&self) -> &Arc<ShardingRule> {
        &self.rule
    }

    pub fn data_sources(&self) -> &DataSourceMap {
        &self.data_sources
    }

    pub fn data_source(&self, name: &str) -> Option<&Arc<PooledDataSource>> {
        self.data_sources.get(name)
    }

    pub fn props(&self) -> &Properties {
        &self.props
    }

    /// Configurations of the live pools.
    pub fn data_source_configs(&self) -> BTreeMap<String, DataSourceConfiguration> {
        self.data_sources
            .iter()
            .map(|(name, pool)| (name.clone(), pool.config().clone()))
            .collect()
    }

    /// Declarative form, including current disabled flags.
    pub fn to_configuration(&self) -> SchemaConfiguration {
        let mut disabled = BTreeMap::new();
        for group in self.rule.replica_groups() {
            for name in group.disabled_names() {
                disabled.insert(name, true);
            }
        }
        SchemaConfiguration {
            rule: self.rule.config().clone(),
            data_sources: self.data_source_configs(),
            props: self.props.clone(),
            disabled,
        }
    }

    pub fn with_rule(&self, rule: ShardingRule) -> Self {
        Self {
            version: self.version + 1,
            schema: self.schema.clone(),
            rule: Arc::new(rule),
            data_sources: self.data_sources.clone(),
            props: self.props.clone(),
        }
    }

    pub fn with_data_sources(&self, data_sources: DataSourceMap) -> Self {
        Self {
            version: self.version + 1,
            schema: self.schema.clone(),
            rule: self.rule.clone(),
            data_sources,
            props: self.props.clone(),
        }
    }

    pub fn with_props(&self, props: Properties) -> Self {
        Self {
            version: self.version + 1,
            schema: self.schema.clone(),
            rule: self.rule.clone(),
            data_sources: self.data_sources.clone(),
            props,
        }
    }

    /// Close every pool. Used when the runtime shuts down.
    pub fn close_pools(&self) {
        for pool in self.data_sources.values() {
            pool.close();
        }
    }
}
