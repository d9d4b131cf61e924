//! Embedded coordination server.
//!
//! # Responsibilities
//! - Accept client connections and speak the line-delimited JSON protocol
//! - Own the node tree, client sessions and per-connection watches
//! - Expire sessions whose TTL lapsed and drop their ephemeral nodes
//! - Fan out one notification per matching watch for every mutation
//!
//! # Data Flow
//! ```text
//! client frame → serve_connection (reader)
//!     → ServerState::handle (sync, under the tree lock for mutations)
//!     → mutate (notifications queued) → per-connection mpsc → writer task → socket
//! ```
//!
//! # Design Decisions
//! - Notifications are queued while the tree lock is held, so every
//!   connection observes changes in mutation order
//! - A session outlives its TCP connection until its TTL runs out; a TTL of
//!   zero means the session only ends on an explicit close
//! - `suspend`/`resume`/`disconnect_all` exist for fault injection in tests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Notify};

use crate::lifecycle::Shutdown;
use crate::registry::path;
use crate::registry::protocol::{
    write_frame, Failure, Reply, Request, RequestFrame, ServerFrame, WatchNotification,
};
use crate::registry::tree::NodeTree;

/// Server options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Digest every client must present, if set.
    pub digest: Option<String>,
    /// How often expired sessions are collected.
    pub reap_interval: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            digest: None,
            reap_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    /// Zero disables expiry.
    ttl: Duration,
    last_seen: Instant,
    connection: Option<u64>,
}

impl SessionEntry {
    fn is_expired(&self) -> bool {
        !self.ttl.is_zero() && self.last_seen.elapsed() > self.ttl
    }
}

struct ConnectionHandle {
    tx: mpsc::UnboundedSender<ServerFrame>,
    kick: Arc<Notify>,
    session_id: Option<u64>,
    /// watch_id -> watched root.
    watches: HashMap<u64, String>,
}

struct ServerState {
    tree: Mutex<NodeTree>,
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    connections: Mutex<HashMap<u64, ConnectionHandle>>,
    digest: Option<String>,
    suspended: AtomicBool,
    next_session: AtomicU64,
    next_connection: AtomicU64,
}

/// A running coordination server.
pub struct CoordinationServer {
    state: Arc<ServerState>,
    local_addr: SocketAddr,
    shutdown: Shutdown,
}

impl CoordinationServer {
    /// Bind to `addr` and start serving in the background.
    pub async fn bind(addr: &str, options: ServerOptions) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(ServerState {
            tree: Mutex::new(NodeTree::new()),
            sessions: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            digest: options.digest.clone(),
            suspended: AtomicBool::new(false),
            next_session: AtomicU64::new(1),
            next_connection: AtomicU64::new(1),
        });
        let shutdown = Shutdown::new();

        tokio::spawn(accept_loop(listener, state.clone(), shutdown.subscribe()));
        tokio::spawn(reap_sessions(
            state.clone(),
            options.reap_interval,
            shutdown.subscribe(),
        ));

        tracing::info!(
            address = %local_addr,
            digest_required = options.digest.is_some(),
            "Coordination server listening"
        );

        Ok(Self {
            state,
            local_addr,
            shutdown,
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.state.sessions.lock().len()
    }

    /// Drop every connection and refuse new ones until `resume`.
    pub fn suspend(&self) {
        self.state.suspended.store(true, Ordering::SeqCst);
        self.state.kick_all();
        tracing::warn!(address = %self.local_addr, "Coordination server suspended");
    }

    /// Accept connections again after `suspend`.
    pub fn resume(&self) {
        self.state.suspended.store(false, Ordering::SeqCst);
        tracing::info!(address = %self.local_addr, "Coordination server resumed");
    }

    /// Drop every connection; sessions survive until their TTL lapses.
    pub fn disconnect_all(&self) {
        self.state.kick_all();
    }

    /// Stop accepting and close all connections.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }
}

impl Drop for CoordinationServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if state.suspended.load(Ordering::SeqCst) {
                        tracing::debug!(peer = %peer, "Refusing connection while suspended");
                        drop(stream);
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    let state = state.clone();
                    let conn_shutdown = shutdown.resubscribe();
                    tokio::spawn(async move {
                        serve_connection(state, stream, conn_shutdown).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                }
            },
            _ = shutdown.recv() => {
                tracing::info!("Coordination server shutting down");
                break;
            }
        }
    }
}

async fn reap_sessions(state: Arc<ServerState>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => state.expire_sessions(),
            _ = shutdown.recv() => break,
        }
    }
}

async fn serve_connection(state: Arc<ServerState>, stream: TcpStream, mut shutdown: broadcast::Receiver<()>) {
    let conn_id = state.next_connection.fetch_add(1, Ordering::Relaxed);
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();
    let kick = Arc::new(Notify::new());

    state.connections.lock().insert(
        conn_id,
        ConnectionHandle {
            tx: tx.clone(),
            kick: kick.clone(),
            session_id: None,
            watches: HashMap::new(),
        },
    );

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write_frame(&mut write_half, &frame).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut lines = BufReader::new(read_half).lines();
    let mut kicked = false;
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let frame: RequestFrame = match serde_json::from_str(&line) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!(connection = conn_id, error = %e, "Dropping connection after malformed frame");
                            break;
                        }
                    };
                    let closing = matches!(frame.body, Request::CloseSession);
                    let outcome = state.handle(conn_id, frame.body);
                    let _ = tx.send(ServerFrame::Reply { id: frame.id, outcome });
                    if closing {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(connection = conn_id, error = %e, "Connection read failed");
                    break;
                }
            },
            _ = kick.notified() => {
                kicked = true;
                break;
            }
            _ = shutdown.recv() => {
                kicked = true;
                break;
            }
        }
    }

    state.detach(conn_id);
    drop(tx);
    if kicked {
        writer.abort();
    } else {
        let _ = writer.await;
    }
    tracing::debug!(connection = conn_id, "Connection closed");
}

impl ServerState {
    fn handle(&self, conn_id: u64, request: Request) -> Result<Reply, Failure> {
        if let Request::Connect {
            session_id,
            ttl_secs,
            digest,
        } = request
        {
            return self.connect(conn_id, session_id, ttl_secs, digest);
        }

        let session_id = self.touch_session(conn_id)?;

        match request {
            Request::Connect { .. } => Err(Failure::Malformed("duplicate connect".to_string())),
            Request::Ping => Ok(Reply::Done),
            Request::Persist { path, value } => {
                check_path(&path, false)?;
                self.mutate(|tree| tree.persist(&path, &value, None));
                Ok(Reply::Done)
            }
            Request::PersistEphemeral { path, value } => {
                check_path(&path, false)?;
                self.mutate(|tree| tree.persist(&path, &value, Some(session_id)));
                Ok(Reply::Done)
            }
            Request::Get { path } => {
                check_path(&path, true)?;
                let value = self.tree.lock().get(&path).map(str::to_string);
                Ok(Reply::Value(value))
            }
            Request::Children { path } => {
                check_path(&path, true)?;
                Ok(Reply::Children(self.tree.lock().children(&path)))
            }
            Request::Delete { path } => {
                check_path(&path, false)?;
                self.mutate(|tree| tree.delete(&path));
                Ok(Reply::Done)
            }
            Request::Watch { watch_id, path } => {
                check_path(&path, true)?;
                if let Some(handle) = self.connections.lock().get_mut(&conn_id) {
                    handle.watches.insert(watch_id, path);
                }
                Ok(Reply::Done)
            }
            Request::Unwatch { watch_id } => {
                if let Some(handle) = self.connections.lock().get_mut(&conn_id) {
                    handle.watches.remove(&watch_id);
                }
                Ok(Reply::Done)
            }
            Request::CloseSession => {
                self.sessions.lock().remove(&session_id);
                if let Some(handle) = self.connections.lock().get_mut(&conn_id) {
                    handle.session_id = None;
                }
                self.mutate(|tree| tree.purge_session(session_id));
                tracing::info!(session_id, "Session closed by client");
                Ok(Reply::Done)
            }
        }
    }

    fn connect(
        &self,
        conn_id: u64,
        requested: Option<u64>,
        ttl_secs: u64,
        digest: Option<String>,
    ) -> Result<Reply, Failure> {
        if self.digest.is_some() && digest != self.digest {
            tracing::warn!(connection = conn_id, "Rejected connection with bad digest");
            return Err(Failure::Unauthorized);
        }

        let mut previous_connection = None;
        let session_id = {
            let mut sessions = self.sessions.lock();
            match requested {
                Some(id) => {
                    let entry = sessions.get_mut(&id).ok_or(Failure::SessionExpired)?;
                    entry.last_seen = Instant::now();
                    previous_connection = entry.connection.replace(conn_id);
                    id
                }
                None => {
                    let id = self.next_session.fetch_add(1, Ordering::Relaxed);
                    sessions.insert(
                        id,
                        SessionEntry {
                            ttl: Duration::from_secs(ttl_secs),
                            last_seen: Instant::now(),
                            connection: Some(conn_id),
                        },
                    );
                    id
                }
            }
        };

        let mut connections = self.connections.lock();
        if let Some(handle) = connections.get_mut(&conn_id) {
            handle.session_id = Some(session_id);
        }
        if let Some(old) = previous_connection.filter(|old| *old != conn_id) {
            if let Some(handle) = connections.get(&old) {
                handle.kick.notify_one();
            }
        }
        drop(connections);

        tracing::debug!(connection = conn_id, session_id, resumed = requested.is_some(), "Session attached");
        Ok(Reply::Session { session_id })
    }

    fn touch_session(&self, conn_id: u64) -> Result<u64, Failure> {
        let session_id = self
            .connections
            .lock()
            .get(&conn_id)
            .and_then(|h| h.session_id)
            .ok_or(Failure::NoSession)?;

        let mut sessions = self.sessions.lock();
        let entry = sessions.get_mut(&session_id).ok_or(Failure::SessionExpired)?;
        entry.last_seen = Instant::now();
        Ok(session_id)
    }

    /// Apply a tree mutation and queue notifications while the tree is locked.
    fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut NodeTree) -> Vec<WatchNotification>,
    {
        let mut tree = self.tree.lock();
        let changes = f(&mut tree);
        if changes.is_empty() {
            return;
        }

        let connections = self.connections.lock();
        for change in &changes {
            for handle in connections.values() {
                for (watch_id, root) in &handle.watches {
                    if path::is_within(&change.path, root) {
                        let _ = handle.tx.send(ServerFrame::Notify {
                            watch_id: *watch_id,
                            notification: change.clone(),
                        });
                    }
                }
            }
        }
    }

    fn expire_sessions(&self) {
        let expired: Vec<(u64, Option<u64>)> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<u64> = sessions
                .iter()
                .filter(|(_, s)| s.is_expired())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s.connection)))
                .collect()
        };

        for (session_id, connection) in expired {
            tracing::info!(session_id, "Session expired, removing ephemeral nodes");
            self.mutate(|tree| tree.purge_session(session_id));
            if let Some(conn_id) = connection {
                if let Some(handle) = self.connections.lock().get(&conn_id) {
                    handle.kick.notify_one();
                }
            }
        }
    }

    fn detach(&self, conn_id: u64) {
        let handle = self.connections.lock().remove(&conn_id);
        if let Some(session_id) = handle.and_then(|h| h.session_id) {
            if let Some(entry) = self.sessions.lock().get_mut(&session_id) {
                if entry.connection == Some(conn_id) {
                    entry.connection = None;
                }
            }
        }
    }

    fn kick_all(&self) {
        for handle in self.connections.lock().values() {
            handle.kick.notify_one();
        }
    }
}

fn check_path(node_path: &str, allow_root: bool) -> Result<(), Failure> {
    path::validate(node_path, allow_root).map_err(|e| Failure::InvalidPath {
        path: node_path.to_string(),
        reason: e.to_string(),
    })
}
