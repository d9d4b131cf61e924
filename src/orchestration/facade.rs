//! Orchestration facade.
//!
//! # Responsibilities
//! - Own the repository for one schema
//! - Load the initial configuration and refuse to start without a rule
//! - Push an adopted local configuration into the registry
//! - Register one watch per configuration category and publish decoded events
//! - Register this instance as an ephemeral node, again on every new session
//! - Reconcile after startup and after reconnects (catch-up)
//!
//! # Data Flow
//! ```text
//! bootstrap: ConfigCenter::load → SchemaConfiguration (or ConfigurationMissing)
//! start:     watch(rule | datasource | props | datasource subtree)
//!                → register instance → catch_up → session keeper task
//! notify:    WatchNotification → ChangeDecoder → EventBus::publish → subscribers
//! ```
//!
//! # Design Decisions
//! - Every publish happens under one lock that also records the last
//!   published view and a per-category sequence; catch-up only publishes a
//!   category when no notification for it arrived while it was reloading,
//!   so a reload can never overwrite a newer watched value
//! - Nothing is registered before bootstrap succeeds

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use crate::config::OrchestrationConfig;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::orchestration::bus::EventBus;
use crate::orchestration::config_center::{ConfigCenter, StoredConfiguration};
use crate::orchestration::decoder::ChangeDecoder;
use crate::orchestration::event::{ChangeEvent, EventKind};
use crate::orchestration::node::OrchestrationNode;
use crate::orchestration::schema::SchemaConfiguration;
use crate::registry::{ConnectionState, CoordinationRepository, WatchId, WatchListener, WatchNotification};

struct PublishState {
    /// Notifications published per category, indexed by `EventKind::index`.
    sequence: [u64; 4],
    /// Configuration as last published to subscribers.
    view: SchemaConfiguration,
}

struct Publisher {
    decoder: ChangeDecoder,
    bus: Arc<EventBus>,
    state: Mutex<PublishState>,
}

impl Publisher {
    fn on_notification(&self, kind: EventKind, notification: &WatchNotification) {
        match self.decoder.decode(kind, notification) {
            Ok(Some(event)) => {
                let mut state = self.state.lock();
                state.sequence[kind.index()] += 1;
                self.deliver(&mut state, event);
            }
            Ok(None) => {}
            Err(e) => {
                metrics::record_event(kind.as_str(), "malformed");
                tracing::warn!(
                    kind = %kind,
                    path = %notification.path,
                    error = %e,
                    "Dropping malformed change"
                );
            }
        }
    }

    fn deliver(&self, state: &mut PublishState, event: ChangeEvent) -> bool {
        tracing::info!(schema = %event.schema(), kind = %event.kind(), "Publishing change event");
        let outcome = self.bus.publish(&event);
        if outcome.is_success() {
            state.view.apply(&event);
        }
        outcome.is_success()
    }
}

struct FacadeInner {
    config: OrchestrationConfig,
    repository: Arc<dyn CoordinationRepository>,
    center: ConfigCenter,
    publisher: Arc<Publisher>,
    instance_id: String,
    watches: Mutex<Vec<WatchId>>,
    started: AtomicBool,
    closed: AtomicBool,
    shutdown: Shutdown,
}

/// Entry point to the registry for one orchestrated schema.
#[derive(Clone)]
pub struct OrchestrationFacade {
    inner: Arc<FacadeInner>,
}

impl OrchestrationFacade {
    pub fn new(config: OrchestrationConfig, repository: Arc<dyn CoordinationRepository>) -> Self {
        let node = OrchestrationNode::new(config.namespace.as_deref(), config.schema.clone());
        let publisher = Arc::new(Publisher {
            decoder: ChangeDecoder::new(node.clone()),
            bus: Arc::new(EventBus::new()),
            state: Mutex::new(PublishState {
                sequence: [0; 4],
                view: SchemaConfiguration::default(),
            }),
        });

        Self {
            inner: Arc::new(FacadeInner {
                center: ConfigCenter::new(repository.clone(), node),
                config,
                repository,
                publisher,
                instance_id: uuid::Uuid::new_v4().to_string(),
                watches: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                shutdown: Shutdown::new(),
            }),
        }
    }

    pub fn schema(&self) -> &str {
        &self.inner.config.schema
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn node(&self) -> &OrchestrationNode {
        self.inner.center.node()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.publisher.bus
    }

    pub fn config_center(&self) -> &ConfigCenter {
        &self.inner.center
    }

    pub fn repository(&self) -> &Arc<dyn CoordinationRepository> {
        &self.inner.repository
    }

    /// Configuration as last published.
    pub fn view(&self) -> SchemaConfiguration {
        self.inner.publisher.state.lock().view.clone()
    }

    pub fn watch_count(&self) -> usize {
        self.inner.watches.lock().len()
    }

    /// Load the schema's configuration. Fails when no usable rule is stored.
    pub async fn bootstrap(&self) -> OrchestrationResult<SchemaConfiguration> {
        let stored = self.inner.center.load().await?;
        let rule = match stored.rule {
            Some(rule) if !rule.is_empty() => rule,
            _ => {
                tracing::error!(schema = %self.schema(), "No rule configuration in registry");
                return Err(OrchestrationError::ConfigurationMissing(self.schema().to_string()));
            }
        };

        let config = SchemaConfiguration {
            rule,
            data_sources: stored.data_sources.unwrap_or_default(),
            props: stored.props.unwrap_or_default(),
            disabled: stored.disabled,
        };
        tracing::info!(
            schema = %self.schema(),
            tables = config.rule.tables.len(),
            data_sources = config.data_sources.len(),
            disabled = config.disabled.values().filter(|d| **d).count(),
            "Loaded configuration from registry"
        );
        Ok(config)
    }

    /// Persist an adopted configuration, category by category.
    ///
    /// A category is written when `overwrite` is set or the registry has no
    /// value for it yet.
    pub async fn adopt(&self, config: &SchemaConfiguration) -> OrchestrationResult<()> {
        if config.rule.is_empty() {
            return Err(OrchestrationError::ConfigurationMissing(self.schema().to_string()));
        }
        let overwrite = self.inner.config.overwrite;
        let center = &self.inner.center;
        let stored = center.load().await?;

        if overwrite || stored.data_sources.is_none() {
            center.persist_data_sources(&config.data_sources).await?;
        }
        if overwrite || stored.rule.is_none() {
            center.persist_rule(&config.rule).await?;
        }
        if overwrite || stored.props.is_none() {
            center.persist_properties(&config.props).await?;
        }
        for (name, disabled) in &config.disabled {
            if overwrite || !stored.disabled.contains_key(name) {
                center.persist_disabled(name, *disabled).await?;
            }
        }

        tracing::info!(schema = %self.schema(), overwrite, "Adopted local configuration");
        Ok(())
    }

    /// Register watches and the instance node, then reconcile.
    ///
    /// `initial` is the configuration the subscribers were built from.
    pub async fn start(&self, initial: SchemaConfiguration) -> OrchestrationResult<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.publisher.state.lock().view = initial;

        if let Err(e) = self.register_watches().await {
            self.unregister_watches().await;
            self.inner.started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let states = self.inner.repository.state_changes();
        let published = match self.announce_and_reconcile().await {
            Ok(published) => published,
            Err(e) => {
                self.unregister_watches().await;
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let registered_session = session_of(self.inner.repository.state());
        if published > 0 {
            tracing::info!(schema = %self.schema(), events = published, "Catch-up applied registry changes");
        }

        tokio::spawn(keep_session(
            self.clone(),
            states,
            registered_session,
            self.inner.shutdown.subscribe(),
        ));
        Ok(())
    }

    async fn announce_and_reconcile(&self) -> OrchestrationResult<usize> {
        self.register_instance().await?;
        self.catch_up().await
    }

    async fn register_watches(&self) -> OrchestrationResult<()> {
        let node = self.node().clone();
        let targets = [
            (EventKind::Rule, node.rule_path()),
            (EventKind::DataSource, node.data_source_path()),
            (EventKind::Properties, node.props_path()),
            (EventKind::DisabledState, node.data_source_path()),
        ];

        for (kind, watch_path) in targets {
            let publisher = self.inner.publisher.clone();
            let listener: WatchListener =
                Arc::new(move |notification: WatchNotification| publisher.on_notification(kind, &notification));
            let id = self.inner.repository.watch(&watch_path, listener).await?;
            self.inner.watches.lock().push(id);
            tracing::debug!(kind = %kind, path = %watch_path, "Watching configuration");
        }
        Ok(())
    }

    async fn unregister_watches(&self) {
        let watches = std::mem::take(&mut *self.inner.watches.lock());
        for id in watches {
            if let Err(e) = self.inner.repository.unwatch(id).await {
                tracing::debug!(watch = %id, error = %e, "Failed to remove watch");
            }
        }
    }

    /// Publish the ephemeral node announcing this instance.
    pub async fn register_instance(&self) -> OrchestrationResult<()> {
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let value = serde_json::json!({
            "instance_id": self.instance_id(),
            "schema": self.schema(),
            "pid": std::process::id(),
            "registered_at": started_at,
        })
        .to_string();

        let node_path = self.node().instance_path(self.instance_id());
        self.inner.repository.persist_ephemeral(&node_path, &value).await?;
        tracing::info!(path = %node_path, "Instance registered");
        Ok(())
    }

    /// Reload every category and publish those that differ from the last
    /// published view. Returns the number of events published.
    pub async fn catch_up(&self) -> OrchestrationResult<usize> {
        let before = self.inner.publisher.state.lock().sequence;
        let stored = self.inner.center.load().await?;
        Ok(self.reconcile(before, stored))
    }

    fn reconcile(&self, before: [u64; 4], stored: StoredConfiguration) -> usize {
        let publisher = &self.inner.publisher;
        let schema = self.schema().to_string();
        let mut state = publisher.state.lock();
        let quiet = |kind: EventKind, state: &PublishState| state.sequence[kind.index()] == before[kind.index()];

        let mut events = Vec::new();
        if quiet(EventKind::Rule, &state) {
            if let Some(rule) = stored.rule.filter(|r| !r.is_empty() && *r != state.view.rule) {
                events.push(ChangeEvent::RuleChanged {
                    schema: schema.clone(),
                    rule,
                });
            }
        }
        if quiet(EventKind::DataSource, &state) {
            if let Some(data_sources) = stored.data_sources.filter(|d| *d != state.view.data_sources) {
                events.push(ChangeEvent::DataSourceMapChanged {
                    schema: schema.clone(),
                    data_sources,
                });
            }
        }
        if quiet(EventKind::Properties, &state) {
            let props = stored.props.unwrap_or_default();
            if props != state.view.props {
                events.push(ChangeEvent::PropertiesChanged {
                    schema: schema.clone(),
                    props,
                });
            }
        }
        if quiet(EventKind::DisabledState, &state) {
            let mut names: Vec<&String> = stored.disabled.keys().chain(state.view.disabled.keys()).collect();
            names.sort();
            names.dedup();
            for name in names {
                let disabled = stored.disabled.get(name).copied().unwrap_or(false);
                if disabled != state.view.is_disabled(name) {
                    events.push(ChangeEvent::DisabledStateChanged {
                        schema: schema.clone(),
                        data_source: name.clone(),
                        disabled,
                    });
                }
            }
        }

        let count = events.len();
        for event in events {
            publisher.deliver(&mut state, event);
        }
        count
    }

    /// Stop watching, remove the instance node and close the repository.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.trigger();
        self.unregister_watches().await;

        if self.inner.repository.state().is_connected() {
            let node_path = self.node().instance_path(self.instance_id());
            if let Err(e) = self.inner.repository.delete(&node_path).await {
                tracing::debug!(path = %node_path, error = %e, "Failed to remove instance node");
            }
        }
        self.inner.repository.close().await;
        tracing::info!(schema = %self.schema(), "Orchestration facade closed");
    }
}

fn session_of(state: ConnectionState) -> Option<u64> {
    match state {
        ConnectionState::Connected { session_id } => Some(session_id),
        _ => None,
    }
}

/// Re-register the instance on new sessions and reconcile after outages.
async fn keep_session(
    facade: OrchestrationFacade,
    mut states: watch::Receiver<ConnectionState>,
    mut registered: Option<u64>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interrupted = false;
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = shutdown.recv() => return,
        }

        let state = *states.borrow_and_update();
        match state {
            ConnectionState::Connected { session_id } => {
                if registered != Some(session_id) {
                    match facade.register_instance().await {
                        Ok(()) => registered = Some(session_id),
                        Err(e) => tracing::warn!(error = %e, "Failed to re-register instance"),
                    }
                }
                if interrupted {
                    match facade.catch_up().await {
                        Ok(published) => {
                            interrupted = false;
                            tracing::info!(
                                schema = %facade.schema(),
                                events = published,
                                "Reconciled configuration after reconnect"
                            );
                        }
                        Err(e) => tracing::warn!(error = %e, "Catch-up after reconnect failed"),
                    }
                }
            }
            ConnectionState::Reconnecting | ConnectionState::Disconnected => interrupted = true,
            ConnectionState::Closed => return,
            ConnectionState::Connecting => {}
        }
    }
}
