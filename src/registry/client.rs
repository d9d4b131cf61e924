//! Remote repository client.
//!
//! # Responsibilities
//! - Open a session against one of the configured servers, with retries
//! - Correlate request frames with replies, bounded by the operation timeout
//! - Keep the session alive with heartbeats while the TTL is enforced
//! - Reconnect after a drop, resume the session and re-register watches
//! - Deliver notifications to listeners from a single dispatcher task
//!
//! # Data Flow
//! ```text
//! call() → pending map + outbound mpsc → link task → socket
//! socket → link task → Reply  → pending oneshot → call()
//!                    → Notify → dispatcher mpsc → WatchListener
//! link lost → supervisor → Reconnecting → (resume | new session) → Connected
//!                                       → retries exhausted → Disconnected (probing)
//! ```
//!
//! # Design Decisions
//! - One link task owns the socket; it reads, writes and sends heartbeats
//! - Notifications are queued before the reply they precede is resolved, so a
//!   caller returning from `persist` has its own change already queued
//! - Requests in flight when a link drops are retried per the retry policy;
//!   every registry operation is idempotent within a session

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::config::RepositoryConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::registry::error::{RegistryError, RegistryResult};
use crate::registry::path;
use crate::registry::protocol::{
    write_frame, Failure, Reply, Request, RequestFrame, ServerFrame, WatchNotification,
};
use crate::registry::{ConnectionState, CoordinationRepository, WatchId, WatchListener};
use crate::resilience::timeouts::{operation_timeout, with_timeout};
use crate::resilience::RetryPolicy;

/// Shortest heartbeat period.
const MIN_HEARTBEAT: Duration = Duration::from_millis(100);

/// Request id reserved for the handshake.
const HANDSHAKE_ID: u64 = 0;

/// An established, authenticated connection.
struct Link {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    session_id: u64,
    server: String,
}

enum LinkError {
    /// The server no longer knows the session we tried to resume.
    Expired,
    Unauthorized,
    Unreachable(String),
}

struct Inner {
    config: RepositoryConfig,
    servers: Vec<String>,
    policy: RetryPolicy,
    op_timeout: Duration,
    next_id: AtomicU64,
    next_watch: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<Result<Reply, Failure>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<RequestFrame>>>,
    watches: DashMap<u64, (String, WatchListener)>,
    notify_tx: mpsc::UnboundedSender<(u64, WatchNotification)>,
    state_tx: watch::Sender<ConnectionState>,
    /// Zero when no session is held.
    session_id: AtomicU64,
    closed: AtomicBool,
    shutdown: Shutdown,
}

/// Repository client speaking to a `CoordinationServer`.
pub struct RemoteRepository {
    inner: Arc<Inner>,
}

impl RemoteRepository {
    /// Connect, open a session and start the background tasks.
    pub async fn init(config: RepositoryConfig) -> RegistryResult<Self> {
        let servers = config.servers();
        if servers.is_empty() {
            return Err(RegistryError::Connectivity("empty server list".to_string()));
        }

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let inner = Arc::new(Inner {
            policy: RetryPolicy::new(config.retry_interval_ms, config.max_retries),
            op_timeout: operation_timeout(config.operation_timeout_ms),
            config,
            servers,
            next_id: AtomicU64::new(HANDSHAKE_ID + 1),
            next_watch: AtomicU64::new(1),
            pending: DashMap::new(),
            outbound: Mutex::new(None),
            watches: DashMap::new(),
            notify_tx,
            state_tx,
            session_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown: Shutdown::new(),
        });
        metrics::set_connection_state(&ConnectionState::Connecting);

        let link = match inner.connect_with_retries(None).await {
            Ok(link) => link,
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                tracing::error!(servers = %inner.config.server_lists, error = %e, "Registry unreachable");
                return Err(e);
            }
        };

        tokio::spawn(dispatch_notifications(
            inner.clone(),
            notify_rx,
            inner.shutdown.subscribe(),
        ));
        let first = inner.attach(link);
        tokio::spawn(supervise(inner.clone(), first, inner.shutdown.subscribe()));

        Ok(Self { inner })
    }

    /// Current session id, if a session is held.
    pub fn session_id(&self) -> Option<u64> {
        match self.inner.session_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    /// Effective operation timeout.
    pub fn operation_timeout(&self) -> Duration {
        self.inner.op_timeout
    }
}

impl Drop for RemoteRepository {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.shutdown.trigger();
    }
}

#[async_trait]
impl CoordinationRepository for RemoteRepository {
    async fn persist(&self, node_path: &str, value: &str) -> RegistryResult<()> {
        path::validate(node_path, false)?;
        self.inner
            .call(Request::Persist {
                path: node_path.to_string(),
                value: value.to_string(),
            })
            .await
            .and_then(expect_done)
    }

    async fn persist_ephemeral(&self, node_path: &str, value: &str) -> RegistryResult<()> {
        path::validate(node_path, false)?;
        self.inner
            .call(Request::PersistEphemeral {
                path: node_path.to_string(),
                value: value.to_string(),
            })
            .await
            .and_then(expect_done)
    }

    async fn get(&self, node_path: &str) -> RegistryResult<Option<String>> {
        path::validate(node_path, true)?;
        match self.inner.call(Request::Get { path: node_path.to_string() }).await? {
            Reply::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    async fn get_children_keys(&self, node_path: &str) -> RegistryResult<Vec<String>> {
        path::validate(node_path, true)?;
        match self.inner.call(Request::Children { path: node_path.to_string() }).await? {
            Reply::Children(names) => Ok(names),
            other => Err(unexpected(other)),
        }
    }

    async fn delete(&self, node_path: &str) -> RegistryResult<()> {
        path::validate(node_path, false)?;
        self.inner
            .call(Request::Delete { path: node_path.to_string() })
            .await
            .and_then(expect_done)
    }

    async fn watch(&self, node_path: &str, listener: WatchListener) -> RegistryResult<WatchId> {
        path::validate(node_path, true)?;
        let watch_id = self.inner.next_watch.fetch_add(1, Ordering::Relaxed);
        self.inner
            .watches
            .insert(watch_id, (node_path.to_string(), listener));

        let result = self
            .inner
            .call(Request::Watch {
                watch_id,
                path: node_path.to_string(),
            })
            .await
            .and_then(expect_done);

        match result {
            Ok(()) => {
                tracing::debug!(path = %node_path, watch_id, "Watch registered");
                Ok(WatchId(watch_id))
            }
            Err(e) => {
                self.inner.watches.remove(&watch_id);
                Err(e)
            }
        }
    }

    async fn unwatch(&self, watch_id: WatchId) -> RegistryResult<()> {
        if self.inner.watches.remove(&watch_id.0).is_none() {
            return Ok(());
        }
        self.inner
            .call(Request::Unwatch { watch_id: watch_id.0 })
            .await
            .and_then(expect_done)
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.inner.current_state().is_connected() {
            if let Err(e) = self.inner.call(Request::CloseSession).await {
                tracing::warn!(error = %e, "Failed to close registry session cleanly");
            }
        }

        self.inner.outbound.lock().take();
        self.inner.watches.clear();
        self.inner.session_id.store(0, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Closed);
        self.inner.shutdown.trigger();
        tracing::info!(servers = %self.inner.config.server_lists, "Registry repository closed");
    }

    fn state(&self) -> ConnectionState {
        self.inner.current_state()
    }

    fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }
}

fn expect_done(reply: Reply) -> RegistryResult<()> {
    match reply {
        Reply::Done => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn unexpected(reply: Reply) -> RegistryError {
    RegistryError::Protocol(format!("unexpected reply {:?}", reply))
}

impl Inner {
    fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        if self.closed.load(Ordering::SeqCst) && state != ConnectionState::Closed {
            return;
        }
        metrics::set_connection_state(&state);
        self.state_tx.send_replace(state);
    }

    fn session(&self) -> Option<u64> {
        match self.session_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    /// Send a request and wait for its reply within the operation timeout.
    async fn call(&self, body: Request) -> RegistryResult<Reply> {
        with_timeout(self.op_timeout, self.call_with_retries(body)).await
    }

    async fn call_with_retries(&self, body: Request) -> RegistryResult<Reply> {
        let mut retry = 0;
        loop {
            let outbound = self.ready_sender().await?;
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let (reply_tx, reply_rx) = oneshot::channel();
            self.pending.insert(id, reply_tx);

            if outbound.send(RequestFrame { id, body: body.clone() }).is_err() {
                self.pending.remove(&id);
            } else {
                match reply_rx.await {
                    Ok(Ok(reply)) => return Ok(reply),
                    Ok(Err(failure)) => return Err(failure.into()),
                    // Link dropped with the request in flight
                    Err(_) => {}
                }
            }

            retry += 1;
            if retry >= self.policy.attempts() {
                return Err(RegistryError::Connectivity(
                    "connection lost while a request was in flight".to_string(),
                ));
            }
            tracing::debug!(request_id = id, retry, "Retrying registry request after link loss");
            tokio::time::sleep(self.policy.delay(retry)).await;
        }
    }

    /// Wait until a link is usable.
    async fn ready_sender(&self) -> RegistryResult<mpsc::UnboundedSender<RequestFrame>> {
        let mut states = self.state_tx.subscribe();
        loop {
            let state = *states.borrow_and_update();
            match state {
                ConnectionState::Closed => return Err(RegistryError::Closed),
                ConnectionState::Disconnected => {
                    return Err(RegistryError::Connectivity(format!(
                        "disconnected from {}",
                        self.config.server_lists
                    )))
                }
                ConnectionState::Connected { .. } => {
                    if let Some(tx) = self.outbound.lock().clone() {
                        return Ok(tx);
                    }
                }
                ConnectionState::Connecting | ConnectionState::Reconnecting => {}
            }
            if states.changed().await.is_err() {
                return Err(RegistryError::Closed);
            }
        }
    }

    /// Try every server, retrying the whole list per the retry policy.
    async fn connect_with_retries(&self, resume: Option<u64>) -> RegistryResult<Link> {
        let mut resume = resume;
        let mut last_error = String::from("no attempt made");

        for attempt in 0..self.policy.attempts() {
            if attempt > 0 {
                tokio::time::sleep(self.policy.delay(attempt)).await;
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(RegistryError::Closed);
            }

            for server in &self.servers {
                match self.connect_once(server, resume).await {
                    Ok(link) => return Ok(link),
                    Err(LinkError::Expired) => {
                        tracing::warn!(server = %server, "Registry session expired, opening a new one");
                        resume = None;
                        match self.connect_once(server, None).await {
                            Ok(link) => return Ok(link),
                            Err(LinkError::Unauthorized) => return Err(RegistryError::Unauthorized),
                            Err(LinkError::Expired) => last_error = "session expired".to_string(),
                            Err(LinkError::Unreachable(reason)) => last_error = reason,
                        }
                    }
                    Err(LinkError::Unauthorized) => return Err(RegistryError::Unauthorized),
                    Err(LinkError::Unreachable(reason)) => {
                        tracing::debug!(server = %server, attempt, error = %reason, "Registry connect attempt failed");
                        last_error = reason;
                    }
                }
            }
        }

        Err(RegistryError::Connectivity(format!(
            "{} after {} attempts: {}",
            self.config.server_lists,
            self.policy.attempts(),
            last_error
        )))
    }

    async fn connect_once(&self, server: &str, resume: Option<u64>) -> Result<Link, LinkError> {
        let stream = tokio::time::timeout(self.op_timeout, TcpStream::connect(server))
            .await
            .map_err(|_| LinkError::Unreachable(format!("{}: connect timed out", server)))?
            .map_err(|e| LinkError::Unreachable(format!("{}: {}", server, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(server = %server, error = %e, "Failed to set TCP_NODELAY on registry link");
        }

        let (read_half, mut writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let hello = RequestFrame {
            id: HANDSHAKE_ID,
            body: Request::Connect {
                session_id: resume,
                ttl_secs: self.config.time_to_live_secs,
                digest: self.config.digest.clone(),
            },
        };

        let handshake = async {
            write_frame(&mut writer, &hello).await?;
            loop {
                let line = lines.next_line().await?.ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed during handshake")
                })?;
                let frame: ServerFrame = serde_json::from_str(&line)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                if let ServerFrame::Reply { id: HANDSHAKE_ID, outcome } = frame {
                    return Ok::<_, std::io::Error>(outcome);
                }
            }
        };

        let outcome = tokio::time::timeout(self.op_timeout, handshake)
            .await
            .map_err(|_| LinkError::Unreachable(format!("{}: handshake timed out", server)))?
            .map_err(|e| LinkError::Unreachable(format!("{}: {}", server, e)))?;

        match outcome {
            Ok(Reply::Session { session_id }) => Ok(Link {
                lines,
                writer,
                session_id,
                server: server.to_string(),
            }),
            Ok(other) => Err(LinkError::Unreachable(format!(
                "{}: unexpected handshake reply {:?}",
                server, other
            ))),
            Err(Failure::SessionExpired) => Err(LinkError::Expired),
            Err(Failure::Unauthorized) => Err(LinkError::Unauthorized),
            Err(other) => Err(LinkError::Unreachable(format!(
                "{}: handshake rejected: {:?}",
                server, other
            ))),
        }
    }

    /// Start the link task for `link` and mark the repository connected.
    fn attach(self: &Arc<Self>, link: Link) -> tokio::task::JoinHandle<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self.session_id.swap(link.session_id, Ordering::SeqCst);

        // Watches live on the connection, so a new link needs them again
        for entry in self.watches.iter() {
            let (watch_path, _) = entry.value();
            let _ = tx.send(RequestFrame {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                body: Request::Watch {
                    watch_id: *entry.key(),
                    path: watch_path.clone(),
                },
            });
        }
        *self.outbound.lock() = Some(tx);

        tracing::info!(
            server = %link.server,
            session_id = link.session_id,
            resumed = previous == link.session_id,
            watches = self.watches.len(),
            "Registry connected"
        );
        let session_id = link.session_id;
        let handle = tokio::spawn(run_link(self.clone(), link, rx, self.shutdown.subscribe()));
        self.set_state(ConnectionState::Connected { session_id });
        handle
    }

    fn heartbeat_period(&self) -> Option<Duration> {
        if self.config.time_to_live_secs == 0 {
            return None;
        }
        let third = Duration::from_millis(self.config.time_to_live_secs.saturating_mul(1000) / 3);
        Some(third.max(MIN_HEARTBEAT))
    }

    fn on_frame(&self, line: &str) {
        match serde_json::from_str::<ServerFrame>(line) {
            Ok(ServerFrame::Reply { id, outcome }) => {
                if let Some((_, reply_tx)) = self.pending.remove(&id) {
                    let _ = reply_tx.send(outcome);
                }
            }
            Ok(ServerFrame::Notify {
                watch_id,
                notification,
            }) => {
                let _ = self.notify_tx.send((watch_id, notification));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed frame from registry");
            }
        }
    }
}

/// Own one connection until it drops or the repository shuts down.
async fn run_link(
    inner: Arc<Inner>,
    link: Link,
    mut rx: mpsc::UnboundedReceiver<RequestFrame>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let Link {
        mut lines,
        mut writer,
        session_id,
        server,
    } = link;

    let heartbeat = inner.heartbeat_period();
    let mut ticker = tokio::time::interval(heartbeat.unwrap_or(Duration::from_secs(3600)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        tracing::debug!(server = %server, error = %e, "Registry write failed");
                        break;
                    }
                }
                None => break,
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => inner.on_frame(&line),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(server = %server, error = %e, "Registry read failed");
                    break;
                }
            },
            _ = ticker.tick(), if heartbeat.is_some() => {
                let ping = RequestFrame {
                    id: inner.next_id.fetch_add(1, Ordering::Relaxed),
                    body: Request::Ping,
                };
                if write_frame(&mut writer, &ping).await.is_err() {
                    break;
                }
            }
            _ = shutdown.recv() => break,
        }
    }

    // Fail sends first so nothing new lands in `pending` after the purge
    drop(rx);
    inner.pending.clear();
    tracing::debug!(server = %server, session_id, "Registry link closed");
}

/// Reconnect whenever the active link ends.
async fn supervise(
    inner: Arc<Inner>,
    mut link_task: tokio::task::JoinHandle<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut link_task => {}
            _ = shutdown.recv() => return,
        }
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }

        inner.outbound.lock().take();
        inner.set_state(ConnectionState::Reconnecting);
        metrics::record_reconnect();
        tracing::warn!(servers = %inner.config.server_lists, "Registry connection lost, reconnecting");

        let link = loop {
            let attempt = tokio::select! {
                result = inner.connect_with_retries(inner.session()) => result,
                _ = shutdown.recv() => return,
            };
            match attempt {
                Ok(link) => break link,
                Err(RegistryError::Closed) => return,
                Err(e) => {
                    // TTL-0 sessions never expire on the server; keep the id and resume it
                    if inner.config.time_to_live_secs > 0 {
                        if inner.session().is_some() {
                            tracing::error!(error = %e, "Registry retries exhausted, session lost");
                        }
                        inner.session_id.store(0, Ordering::SeqCst);
                    } else {
                        tracing::debug!(error = %e, session_id = ?inner.session(), "Registry retries exhausted, keeping session for resume");
                    }
                    inner.set_state(ConnectionState::Disconnected);
                    tokio::select! {
                        _ = tokio::time::sleep(inner.policy.probe_interval()) => {}
                        _ = shutdown.recv() => return,
                    }
                }
            }
        };

        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        link_task = inner.attach(link);
    }
}

/// Call listeners one notification at a time, in arrival order.
async fn dispatch_notifications(
    inner: Arc<Inner>,
    mut rx: mpsc::UnboundedReceiver<(u64, WatchNotification)>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let (watch_id, notification) = tokio::select! {
            next = rx.recv() => match next {
                Some(next) => next,
                None => return,
            },
            _ = shutdown.recv() => return,
        };
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let listener = match inner.watches.get(&watch_id) {
            Some(entry) => entry.value().1.clone(),
            None => continue,
        };

        let changed_path = notification.path.clone();
        if std::panic::catch_unwind(AssertUnwindSafe(|| listener(notification))).is_err() {
            tracing::error!(path = %changed_path, watch_id, "Watch listener panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::server::{CoordinationServer, ServerOptions};

    fn config_for(server: &CoordinationServer) -> RepositoryConfig {
        RepositoryConfig {
            server_lists: server.local_addr().to_string(),
            retry_interval_ms: 20,
            max_retries: 2,
            time_to_live_secs: 0,
            operation_timeout_ms: 1000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_init() {
        let config = RepositoryConfig {
            // Nothing listens on the discard port in test environments
            server_lists: "127.0.0.1:9".to_string(),
            retry_interval_ms: 10,
            max_retries: 1,
            operation_timeout_ms: 200,
            ..Default::default()
        };
        let result = RemoteRepository::init(config).await;
        assert!(matches!(result, Err(RegistryError::Connectivity(_))));
    }

    #[tokio::test]
    async fn test_calls_after_close_fail() {
        let server = CoordinationServer::bind("127.0.0.1:0", ServerOptions::default())
            .await
            .unwrap();
        let repo = RemoteRepository::init(config_for(&server)).await.unwrap();
        assert!(repo.session_id().is_some());

        repo.close().await;
        repo.close().await;
        assert_eq!(repo.state(), ConnectionState::Closed);
        assert!(matches!(repo.get("/x").await, Err(RegistryError::Closed)));
    }

    #[tokio::test]
    async fn test_invalid_path_is_rejected_locally() {
        let server = CoordinationServer::bind("127.0.0.1:0", ServerOptions::default())
            .await
            .unwrap();
        let repo = RemoteRepository::init(config_for(&server)).await.unwrap();
        let result = repo.persist("no-slash", "v").await;
        assert!(matches!(result, Err(RegistryError::InvalidPath { .. })));
    }

    #[tokio::test]
    async fn test_resumes_session_after_drop() {
        let server = CoordinationServer::bind("127.0.0.1:0", ServerOptions::default())
            .await
            .unwrap();
        let repo = RemoteRepository::init(config_for(&server)).await.unwrap();
        let session = repo.session_id();
        repo.persist_ephemeral("/eph", "here").await.unwrap();

        server.disconnect_all();
        // The next call waits out the reconnect
        let value = repo.get("/eph").await.unwrap();
        assert_eq!(value.as_deref(), Some("here"));
        assert_eq!(repo.session_id(), session);
    }
}
