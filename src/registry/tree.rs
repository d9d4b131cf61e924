//! In-memory node tree backing the coordination server.
//!
//! # Responsibilities
//! - Store nodes by full path, each durable or owned by a session
//! - Create missing parents on write, remove whole subtrees on delete
//! - Report every mutation as a list of `WatchNotification`s
//!
//! # Design Decisions
//! - A `BTreeMap` keyed by path keeps a subtree contiguous, so child listing
//!   and subtree deletion are range scans
//! - Implicitly created parents are durable and hold an empty value

use std::collections::{BTreeMap, BTreeSet};

use crate::registry::path;
use crate::registry::protocol::{ChangeType, WatchNotification};

#[derive(Debug, Clone)]
struct Node {
    value: String,
    /// Owning session for ephemeral nodes.
    owner: Option<u64>,
}

/// The hierarchical key space.
#[derive(Debug, Default)]
pub struct NodeTree {
    nodes: BTreeMap<String, Node>,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or overwrite `node_path`. `owner` marks the node ephemeral.
    pub fn persist(&mut self, node_path: &str, value: &str, owner: Option<u64>) -> Vec<WatchNotification> {
        let mut changes = Vec::new();

        for ancestor in path::ancestors(node_path) {
            if !self.nodes.contains_key(ancestor) {
                self.nodes.insert(
                    ancestor.to_string(),
                    Node {
                        value: String::new(),
                        owner: None,
                    },
                );
                changes.push(WatchNotification::new(ancestor, ChangeType::Added, ""));
            }
        }

        let change_type = match self.nodes.get_mut(node_path) {
            Some(node) => {
                node.value = value.to_string();
                node.owner = owner;
                ChangeType::Updated
            }
            None => {
                self.nodes.insert(
                    node_path.to_string(),
                    Node {
                        value: value.to_string(),
                        owner,
                    },
                );
                ChangeType::Added
            }
        };
        changes.push(WatchNotification::new(node_path, change_type, value));
        changes
    }

    pub fn get(&self, node_path: &str) -> Option<&str> {
        self.nodes.get(node_path).map(|n| n.value.as_str())
    }

    /// Immediate child names of `node_path`, sorted.
    pub fn children(&self, node_path: &str) -> Vec<String> {
        let prefix = if node_path == path::ROOT {
            path::ROOT.to_string()
        } else {
            format!("{}/", node_path)
        };

        let mut names = BTreeSet::new();
        for key in self.nodes.range(prefix.clone()..).map(|(k, _)| k) {
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(segment) = path::child_segment(key, node_path) {
                names.insert(segment.to_string());
            }
        }
        names.into_iter().collect()
    }

    /// Remove `node_path` and everything beneath it, deepest nodes first.
    pub fn delete(&mut self, node_path: &str) -> Vec<WatchNotification> {
        let doomed: Vec<String> = self
            .nodes
            .range(node_path.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(node_path))
            .filter(|k| path::is_within(k, node_path))
            .cloned()
            .collect();

        let mut changes = Vec::with_capacity(doomed.len());
        for key in doomed.into_iter().rev() {
            if let Some(node) = self.nodes.remove(&key) {
                changes.push(WatchNotification::new(key, ChangeType::Deleted, node.value));
            }
        }
        changes
    }

    /// Remove every ephemeral node owned by `session_id`.
    pub fn purge_session(&mut self, session_id: u64) -> Vec<WatchNotification> {
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.owner == Some(session_id))
            .map(|(k, _)| k.clone())
            .collect();

        let mut changes = Vec::new();
        for key in owned.iter().rev() {
            changes.extend(self.delete(key));
        }
        changes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
