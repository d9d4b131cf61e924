//! Typed change events.

use serde::Serialize;

use crate::orchestration::codec::DataSourceConfigurations;
use crate::props::Properties;
use crate::rule::RuleConfiguration;

/// Category of a change event; subscribers register per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Rule,
    DataSource,
    Properties,
    DisabledState,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Rule,
        EventKind::DataSource,
        EventKind::Properties,
        EventKind::DisabledState,
    ];

    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Rule => "rule",
            EventKind::DataSource => "datasource",
            EventKind::Properties => "props",
            EventKind::DisabledState => "disabled",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            EventKind::Rule => 0,
            EventKind::DataSource => 1,
            EventKind::Properties => 2,
            EventKind::DisabledState => 3,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded configuration change for one schema.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    RuleChanged {
        schema: String,
        rule: RuleConfiguration,
    },
    /// Carries the full new map, not a delta.
    DataSourceMapChanged {
        schema: String,
        data_sources: DataSourceConfigurations,
    },
    PropertiesChanged {
        schema: String,
        props: Properties,
    },
    DisabledStateChanged {
        schema: String,
        data_source: String,
        disabled: bool,
    },
}

impl ChangeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChangeEvent::RuleChanged { .. } => EventKind::Rule,
            ChangeEvent::DataSourceMapChanged { .. } => EventKind::DataSource,
            ChangeEvent::PropertiesChanged { .. } => EventKind::Properties,
            ChangeEvent::DisabledStateChanged { .. } => EventKind::DisabledState,
        }
    }

    pub fn schema(&self) -> &str {
        match self {
            ChangeEvent::RuleChanged { schema, .. }
            | ChangeEvent::DataSourceMapChanged { schema, .. }
            | ChangeEvent::PropertiesChanged { schema, .. }
            | ChangeEvent::DisabledStateChanged { schema, .. } => schema,
        }
    }
}
