//! Watch notification decoding.
//!
//! # Responsibilities
//! - Route a raw notification to its configuration category by path
//! - Decode the payload into exactly one `ChangeEvent`
//! - Reject payloads that cannot be decoded, without partial events
//!
//! # Design Decisions
//! - `Ok(None)` means "not for this category" or "nothing to apply"; only
//!   undecodable payloads are errors
//! - Deleting the rule or the data-source map is ignored: a schema never
//!   drops to zero rules or loses every pool through a delete
//! - Empty rule and data-source values are ignored; the registry writes
//!   them for implicitly created parents

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::orchestration::codec;
use crate::orchestration::event::{ChangeEvent, EventKind};
use crate::orchestration::node::OrchestrationNode;
use crate::props::Properties;
use crate::registry::{ChangeType, WatchNotification};

#[derive(Debug, Clone)]
pub struct ChangeDecoder {
    node: OrchestrationNode,
}

impl ChangeDecoder {
    pub fn new(node: OrchestrationNode) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &OrchestrationNode {
        &self.node
    }

    /// Decode `notification` as a change of category `kind`.
    pub fn decode(&self, kind: EventKind, notification: &WatchNotification) -> OrchestrationResult<Option<ChangeEvent>> {
        match kind {
            EventKind::Rule => self.decode_rule(notification),
            EventKind::DataSource => self.decode_data_sources(notification),
            EventKind::Properties => self.decode_properties(notification),
            EventKind::DisabledState => self.decode_disabled(notification),
        }
    }

    pub fn decode_rule(&self, notification: &WatchNotification) -> OrchestrationResult<Option<ChangeEvent>> {
        if notification.path != self.node.rule_path() || !self.carries_value(notification) {
            return Ok(None);
        }
        let rule = codec::decode_rule(&notification.value).map_err(|e| malformed(notification, e))?;
        if rule.is_empty() {
            return Err(malformed(notification, "rule configuration has no table rules"));
        }
        Ok(Some(ChangeEvent::RuleChanged {
            schema: self.node.schema().to_string(),
            rule,
        }))
    }

    pub fn decode_data_sources(&self, notification: &WatchNotification) -> OrchestrationResult<Option<ChangeEvent>> {
        if notification.path != self.node.data_source_path() || !self.carries_value(notification) {
            return Ok(None);
        }
        let data_sources =
            codec::decode_data_sources(&notification.value).map_err(|e| malformed(notification, e))?;
        Ok(Some(ChangeEvent::DataSourceMapChanged {
            schema: self.node.schema().to_string(),
            data_sources,
        }))
    }

    pub fn decode_properties(&self, notification: &WatchNotification) -> OrchestrationResult<Option<ChangeEvent>> {
        if notification.path != self.node.props_path() {
            return Ok(None);
        }
        let props = if notification.change_type == ChangeType::Deleted {
            Properties::new()
        } else {
            let props = codec::decode_properties(&notification.value).map_err(|e| malformed(notification, e))?;
            props.validate().map_err(|e| malformed(notification, e))?;
            props
        };
        Ok(Some(ChangeEvent::PropertiesChanged {
            schema: self.node.schema().to_string(),
            props,
        }))
    }

    pub fn decode_disabled(&self, notification: &WatchNotification) -> OrchestrationResult<Option<ChangeEvent>> {
        let name = match self.node.disabled_name(&notification.path) {
            Some(name) => name,
            None => return Ok(None),
        };
        let disabled = if notification.change_type == ChangeType::Deleted {
            false
        } else {
            codec::decode_disabled(&notification.value).map_err(|e| malformed(notification, e))?
        };
        Ok(Some(ChangeEvent::DisabledStateChanged {
            schema: self.node.schema().to_string(),
            data_source: name.to_string(),
            disabled,
        }))
    }

    fn carries_value(&self, notification: &WatchNotification) -> bool {
        if notification.change_type == ChangeType::Deleted {
            tracing::warn!(path = %notification.path, "Ignoring deletion of a configuration node");
            return false;
        }
        if notification.value.trim().is_empty() {
            tracing::debug!(path = %notification.path, "Ignoring empty configuration value");
            return false;
        }
        true
    }
}

fn malformed(notification: &WatchNotification, reason: impl Into<String>) -> OrchestrationError {
    OrchestrationError::MalformedChange {
        path: notification.path.clone(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> ChangeDecoder {
        ChangeDecoder::new(OrchestrationNode::new(Some("ns"), "logic_db"))
    }

    fn updated(path: &str, value: &str) -> WatchNotification {
        WatchNotification::new(path, ChangeType::Updated, value)
    }

    #[test]
    fn test_rule_change() {
        let event = decoder()
            .decode_rule(&updated(
                "/ns/logic_db/rule",
                r#"{"tables":[{"logic_table":"t_order","actual_data_nodes":"ds_0.t_order"}]}"#,
            ))
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), EventKind::Rule);
        assert_eq!(event.schema(), "logic_db");
    }

    #[test]
    fn test_malformed_and_empty_rules() {
        let d = decoder();
        assert!(matches!(
            d.decode_rule(&updated("/ns/logic_db/rule", "{not json")),
            Err(OrchestrationError::MalformedChange { .. })
        ));
        assert!(d.decode_rule(&updated("/ns/logic_db/rule", r#"{"tables":[]}"#)).is_err());
        assert!(d.decode_rule(&updated("/ns/logic_db/rule", "")).unwrap().is_none());
        let deleted = WatchNotification::new("/ns/logic_db/rule", ChangeType::Deleted, "{}");
        assert!(d.decode_rule(&deleted).unwrap().is_none());
    }

    #[test]
    fn test_data_source_watch_takes_exact_path_only() {
        let d = decoder();
        assert!(d
            .decode_data_sources(&updated("/ns/logic_db/datasource/ds_0/disabled", "true"))
            .unwrap()
            .is_none());
        // implicit parent created by a disabled flag
        let parent = WatchNotification::new("/ns/logic_db/datasource", ChangeType::Added, "");
        assert!(d.decode_data_sources(&parent).unwrap().is_none());

        let event = d
            .decode_data_sources(&updated("/ns/logic_db/datasource", r#"{"ds_0":{"url":"mysql://h/ds_0"}}"#))
            .unwrap()
            .unwrap();
        assert!(matches!(event, ChangeEvent::DataSourceMapChanged { ref data_sources, .. } if data_sources.len() == 1));
    }

    #[test]
    fn test_props_delete_publishes_empty() {
        let deleted = WatchNotification::new("/ns/logic_db/props", ChangeType::Deleted, r#"{"sql.show":"true"}"#);
        let event = decoder().decode_properties(&deleted).unwrap().unwrap();
        assert_eq!(
            event,
            ChangeEvent::PropertiesChanged {
                schema: "logic_db".into(),
                props: Properties::new()
            }
        );
        assert!(decoder()
            .decode_properties(&updated("/ns/logic_db/props", r#"{"sql.show":"often"}"#))
            .is_err());
    }

    #[test]
    fn test_disabled_state() {
        let d = decoder();
        let event = d
            .decode_disabled(&updated("/ns/logic_db/datasource/replica_0/disabled", "true"))
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ChangeEvent::DisabledStateChanged {
                schema: "logic_db".into(),
                data_source: "replica_0".into(),
                disabled: true
            }
        );

        let deleted = WatchNotification::new("/ns/logic_db/datasource/replica_0/disabled", ChangeType::Deleted, "true");
        assert!(matches!(
            d.decode_disabled(&deleted).unwrap(),
            Some(ChangeEvent::DisabledStateChanged { disabled: false, .. })
        ));
        assert!(d.decode_disabled(&updated("/ns/logic_db/datasource", "{}")).unwrap().is_none());
        assert!(d.decode_disabled(&updated("/ns/logic_db/datasource/replica_0/disabled", "2")).is_err());
    }
}
