//! Classification of a data-source map change.

use std::collections::{BTreeMap, BTreeSet};

use crate::datasource::DataSourceConfiguration;

/// How each name moves between two configuration maps.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DataSourceDiff {
    /// Same configuration on both sides; the pool is reused.
    pub unchanged: BTreeSet<String>,
    /// Configuration differs; the pool is replaced.
    pub modified: BTreeSet<String>,
    /// Only in the current map; the pool is closed.
    pub deleted: BTreeSet<String>,
    /// Only in the new map; a pool is opened.
    pub added: BTreeSet<String>,
}

impl DataSourceDiff {
    pub fn compute(
        current: &BTreeMap<String, DataSourceConfiguration>,
        new: &BTreeMap<String, DataSourceConfiguration>,
    ) -> Self {
        let mut diff = Self::default();
        for (name, config) in current {
            match new.get(name) {
                Some(next) if next == config => {
                    diff.unchanged.insert(name.clone());
                }
                Some(_) => {
                    diff.modified.insert(name.clone());
                }
                None => {
                    diff.deleted.insert(name.clone());
                }
            }
        }
        for name in new.keys() {
            if !current.contains_key(name) {
                diff.added.insert(name.clone());
            }
        }
        diff
    }

    /// Names that need a fresh pool.
    pub fn to_open(&self) -> impl Iterator<Item = &String> {
        self.modified.iter().chain(self.added.iter())
    }

    /// Names whose current pool is released after the swap.
    pub fn to_close(&self) -> impl Iterator<Item = &String> {
        self.modified.iter().chain(self.deleted.iter())
    }

    pub fn is_noop(&self) -> bool {
        self.modified.is_empty() && self.deleted.is_empty() && self.added.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ds(url: &str) -> DataSourceConfiguration {
        DataSourceConfiguration::new(url)
    }

    #[test]
    fn test_classifies_every_name() {
        let current: BTreeMap<_, _> = [
            ("a".to_string(), ds("mysql://h/a")),
            ("b".to_string(), ds("mysql://h/b")),
            ("c".to_string(), ds("mysql://h/c")),
        ]
        .into();
        let new: BTreeMap<_, _> = [
            ("a".to_string(), ds("mysql://h/a")),
            ("b".to_string(), ds("mysql://h/b2")),
            ("d".to_string(), ds("mysql://h/d")),
        ]
        .into();

        let diff = DataSourceDiff::compute(&current, &new);
        assert_eq!(diff.unchanged, BTreeSet::from(["a".to_string()]));
        assert_eq!(diff.modified, BTreeSet::from(["b".to_string()]));
        assert_eq!(diff.deleted, BTreeSet::from(["c".to_string()]));
        assert_eq!(diff.added, BTreeSet::from(["d".to_string()]));
        assert_eq!(diff.to_open().count(), 2);
        assert_eq!(diff.to_close().cloned().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn test_identical_maps_are_noop() {
        let map: BTreeMap<_, _> = [("a".to_string(), ds("mysql://h/a"))].into();
        assert!(DataSourceDiff::compute(&map, &map.clone()).is_noop());
    }
}
