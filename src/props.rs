//! Tuning properties of a schema.
//!
//! Properties are a flat string map. Known keys have typed accessors with
//! defaults; unknown keys are kept untouched so newer writers can add keys
//! older runtimes ignore.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Log every routed statement.
pub const SQL_SHOW: &str = "sql.show";
/// Worker threads for statement execution; 0 selects the number of cores.
pub const EXECUTOR_SIZE: &str = "executor.size";
/// Connections a single query may hold per data source.
pub const MAX_CONNECTIONS_PER_QUERY: &str = "max.connections.size.per.query";

const DEFAULT_MAX_CONNECTIONS_PER_QUERY: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn sql_show(&self) -> bool {
        self.parsed(SQL_SHOW).unwrap_or(false)
    }

    pub fn executor_size(&self) -> usize {
        self.parsed(EXECUTOR_SIZE).unwrap_or(0)
    }

    pub fn max_connections_per_query(&self) -> usize {
        self.parsed(MAX_CONNECTIONS_PER_QUERY)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_QUERY)
    }

    /// Check that every known key holds a value of its type.
    pub fn validate(&self) -> Result<(), String> {
        check::<bool>(self, SQL_SHOW)?;
        check::<usize>(self, EXECUTOR_SIZE)?;
        check::<usize>(self, MAX_CONNECTIONS_PER_QUERY)?;
        if self.get(MAX_CONNECTIONS_PER_QUERY).is_some() && self.max_connections_per_query() == 0 {
            return Err(format!("{} must be at least 1", MAX_CONNECTIONS_PER_QUERY));
        }
        Ok(())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }
}

fn check<T: std::str::FromStr>(props: &Properties, key: &str) -> Result<(), String> {
    match props.get(key) {
        Some(value) if value.trim().parse::<T>().is_err() => {
            Err(format!("'{}' is not a valid value for {}", value, key))
        }
        _ => Ok(()),
    }
}

impl FromIterator<(String, String)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let props = Properties::new();
        assert!(!props.sql_show());
        assert_eq!(props.executor_size(), 0);
        assert_eq!(props.max_connections_per_query(), 1);
    }

    #[test]
    fn test_typed_accessors_and_unknown_keys() {
        let props = Properties::new()
            .with(SQL_SHOW, "true")
            .with(EXECUTOR_SIZE, "8")
            .with("custom.flag", "x");
        assert!(props.sql_show());
        assert_eq!(props.executor_size(), 8);
        assert_eq!(props.get("custom.flag"), Some("x"));
        assert!(props.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(Properties::new().with(SQL_SHOW, "yes").validate().is_err());
        assert!(Properties::new().with(MAX_CONNECTIONS_PER_QUERY, "0").validate().is_err());
    }
}
