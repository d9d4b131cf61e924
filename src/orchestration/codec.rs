//! Encoding of configuration values stored in the registry.
//!
//! Rule, data-source map and properties are JSON documents. Disabled flags
//! are the plain strings "true" and "false"; an empty value reads as false.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::datasource::DataSourceConfiguration;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::props::Properties;
use crate::rule::RuleConfiguration;

/// Data-source configurations by name.
pub type DataSourceConfigurations = BTreeMap<String, DataSourceConfiguration>;

fn encode<T: Serialize>(value: &T) -> OrchestrationResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| OrchestrationError::Codec(e.to_string()))
}

pub fn encode_rule(rule: &RuleConfiguration) -> OrchestrationResult<String> {
    encode(rule)
}

pub fn decode_rule(value: &str) -> Result<RuleConfiguration, String> {
    serde_json::from_str(value).map_err(|e| e.to_string())
}

pub fn encode_data_sources(data_sources: &DataSourceConfigurations) -> OrchestrationResult<String> {
    encode(data_sources)
}

pub fn decode_data_sources(value: &str) -> Result<DataSourceConfigurations, String> {
    serde_json::from_str(value).map_err(|e| e.to_string())
}

pub fn encode_properties(props: &Properties) -> OrchestrationResult<String> {
    encode(props)
}

/// Decode properties; scalar JSON values are accepted and kept as strings.
pub fn decode_properties(value: &str) -> Result<Properties, String> {
    if value.trim().is_empty() {
        return Ok(Properties::new());
    }
    let object = match serde_json::from_str::<Value>(value).map_err(|e| e.to_string())? {
        Value::Object(object) => object,
        other => return Err(format!("expected an object, found {}", kind_of(&other))),
    };

    object
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key, s)),
            Value::Bool(b) => Ok((key, b.to_string())),
            Value::Number(n) => Ok((key, n.to_string())),
            other => Err(format!("property '{}' holds {}", key, kind_of(&other))),
        })
        .collect()
}

pub fn encode_disabled(disabled: bool) -> &'static str {
    if disabled {
        "true"
    } else {
        "false"
    }
}

pub fn decode_disabled(value: &str) -> Result<bool, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(false);
    }
    if trimmed.eq_ignore_ascii_case("true") {
        Ok(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Ok(false)
    } else {
        Err(format!("'{}' is not a boolean", trimmed))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
