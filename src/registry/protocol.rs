//! Wire protocol between the repository client and the coordination server.
//!
//! # Framing
//! One JSON document per line, in both directions. Every client frame carries
//! a request id that the matching `Reply` echoes. `Notify` frames are pushed
//! by the server whenever a change falls under one of the connection's watches.
//!
//! # Design Decisions
//! - Values are UTF-8 strings; the registry never interprets them
//! - Failures are part of the reply, not a separate frame type
//! - Watch ids are chosen by the client so re-registration after a reconnect
//!   keeps listener identity stable

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Kind of change carried by a watch notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Added,
    Updated,
    Deleted,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Added => write!(f, "ADDED"),
            ChangeType::Updated => write!(f, "UPDATED"),
            ChangeType::Deleted => write!(f, "DELETED"),
        }
    }
}

/// A raw change on a single registry key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchNotification {
    /// Full path of the node that changed.
    pub path: String,
    /// What happened to it.
    pub change_type: ChangeType,
    /// New value, or the last known value for `DELETED`.
    pub value: String,
}

impl WatchNotification {
    pub fn new(path: impl Into<String>, change_type: ChangeType, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            change_type,
            value: value.into(),
        }
    }
}

/// A client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    /// Open or resume a session. Must be the first frame on a connection.
    Connect {
        session_id: Option<u64>,
        ttl_secs: u64,
        digest: Option<String>,
    },
    Ping,
    Persist { path: String, value: String },
    PersistEphemeral { path: String, value: String },
    Get { path: String },
    Children { path: String },
    Delete { path: String },
    Watch { watch_id: u64, path: String },
    Unwatch { watch_id: u64 },
    CloseSession,
}

/// A client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub body: Request,
}

/// Successful reply payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Session { session_id: u64 },
    Done,
    Value(Option<String>),
    Children(Vec<String>),
}

/// Failure reasons reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Failure {
    Unauthorized,
    SessionExpired,
    NoSession,
    InvalidPath { path: String, reason: String },
    Malformed(String),
}

/// A server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerFrame {
    Reply {
        id: u64,
        outcome: Result<Reply, Failure>,
    },
    Notify {
        watch_id: u64,
        notification: WatchNotification,
    },
}

/// Serialize a frame and write it followed by a newline.
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(frame)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}
