//! Coordination repository subsystem.
//!
//! # Data Flow
//! ```text
//! Caller (facade, CLI)
//!     → CoordinationRepository (trait)
//!     → RemoteRepository (client.rs): request frames over TCP
//!     → CoordinationServer (server.rs): node tree, sessions, watches
//!     → Notify frames → client dispatcher task → WatchListener
//! ```
//!
//! # Design Decisions
//! - The trait knows nothing about sharding; paths and values are opaque
//! - A missing key is `Ok(None)`, never an error
//! - Listeners run on one dispatcher task per repository, one at a time,
//!   so a slow listener delays later notifications but never reorders them
//! - Connection state is observable through a `tokio::sync::watch` channel

pub mod client;
pub mod error;
pub mod path;
pub mod protocol;
pub mod server;
pub mod tree;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;

use crate::config::RepositoryConfig;

pub use client::RemoteRepository;
pub use error::{RegistryError, RegistryResult};
pub use protocol::{ChangeType, WatchNotification};
pub use server::{CoordinationServer, ServerOptions};

/// Callback invoked for every notification under a watched path.
pub type WatchListener = Arc<dyn Fn(WatchNotification) + Send + Sync>;

/// Handle for a registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WatchId(pub u64);

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

/// Connection state of a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected { session_id: u64 },
    Reconnecting,
    /// Retries exhausted. A session with a TTL is gone along with its
    /// ephemeral nodes; a TTL-0 session is resumed once the store returns.
    Disconnected,
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    /// Numeric code exported as a gauge.
    pub fn code(&self) -> f64 {
        match self {
            ConnectionState::Connecting => 0.0,
            ConnectionState::Connected { .. } => 1.0,
            ConnectionState::Reconnecting => 2.0,
            ConnectionState::Disconnected => 3.0,
            ConnectionState::Closed => 4.0,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected { session_id } => write!(f, "connected(session {})", session_id),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Hierarchical key/value store with ephemeral nodes and watches.
#[async_trait]
pub trait CoordinationRepository: Send + Sync {
    /// Create or overwrite a durable node, creating missing parents.
    async fn persist(&self, path: &str, value: &str) -> RegistryResult<()>;

    /// Create or overwrite a node owned by the current session.
    async fn persist_ephemeral(&self, path: &str, value: &str) -> RegistryResult<()>;

    /// Current value at `path`, `None` when absent.
    async fn get(&self, path: &str) -> RegistryResult<Option<String>>;

    /// Immediate child names of `path`; empty when it has none.
    async fn get_children_keys(&self, path: &str) -> RegistryResult<Vec<String>>;

    /// Remove `path` and its subtree.
    async fn delete(&self, path: &str) -> RegistryResult<()>;

    /// Deliver every change at or beneath `path` to `listener`.
    async fn watch(&self, path: &str, listener: WatchListener) -> RegistryResult<WatchId>;

    /// Remove one watch registration.
    async fn unwatch(&self, watch_id: WatchId) -> RegistryResult<()>;

    /// Release the session and stop delivery. Idempotent.
    async fn close(&self);

    fn state(&self) -> ConnectionState;

    fn state_changes(&self) -> watch::Receiver<ConnectionState>;
}

/// Build and initialise a repository for the configured backend type.
pub async fn create_repository(config: &RepositoryConfig) -> RegistryResult<Arc<dyn CoordinationRepository>> {
    match config.kind.trim().to_ascii_lowercase().as_str() {
        "remote" => {
            let repository = RemoteRepository::init(config.clone()).await?;
            Ok(Arc::new(repository))
        }
        other => Err(RegistryError::UnsupportedType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_type_is_rejected() {
        let config = RepositoryConfig {
            kind: "etcd".into(),
            ..Default::default()
        };
        let result = create_repository(&config).await;
        assert!(matches!(result, Err(RegistryError::UnsupportedType(ref t)) if t == "etcd"));
    }

    #[test]
    fn test_state_serializes_with_tag() {
        let json = serde_json::to_value(ConnectionState::Connected { session_id: 3 }).unwrap();
        assert_eq!(json["state"], "connected");
        assert_eq!(json["session_id"], 3);
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
    }
}
