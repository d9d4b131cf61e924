//! Orchestrated data source.
//!
//! # Responsibilities
//! - Hold the single current `RuntimeSnapshot` of a schema
//! - Apply change events with exactly the side effects each one warrants
//! - Keep unchanged pools alive across data-source changes
//! - Close replaced pools only after the new snapshot is current
//!
//! # Data Flow
//! ```text
//! create(FreshBootstrap)          create(AdoptExisting(snapshot))
//!     → facade.bootstrap              → facade.adopt (push)
//!     → RuntimeSnapshot::build        |
//!     └──────────────┬────────────────┘
//!                    → subscribe to every event kind
//!                    → facade.start (watches, instance node, catch-up)
//!
//! ChangeEvent → handle (one mutex) → build new snapshot → ArcSwap::store
//!             → close pools the new snapshot no longer holds
//! ```
//!
//! # Design Decisions
//! - Readers call `current()` once per operation and keep the `Arc`; they
//!   never observe a half-applied change
//! - Disabled flags live on the rule the current snapshot shares, so a flip
//!   is not a snapshot replacement but still takes the same mutex
//! - A failed open aborts the event and leaves the previous snapshot current
//! - The last-known disabled names are kept beside the snapshot and applied
//!   to every newly compiled rule, so a flag set before its data source
//!   joins a replica group still holds once it does

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::config::OrchestratorConfig;
use crate::datasource::{self, DataSourceDiff, DataSourceFactory, DataSourceMap};
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::observability::metrics;
use crate::orchestration::bus::SubscriptionId;
use crate::orchestration::codec::DataSourceConfigurations;
use crate::orchestration::event::ChangeEvent;
use crate::orchestration::OrchestrationFacade;
use crate::props::Properties;
use crate::registry;
use crate::rule::{RuleConfiguration, ShardingRule};
use crate::runtime::snapshot::RuntimeSnapshot;

/// Where the initial snapshot comes from.
pub enum RuntimeSource {
    /// Load everything from the registry.
    FreshBootstrap,
    /// Take over an already-built runtime and push its configuration.
    AdoptExisting(RuntimeSnapshot),
}

struct RuntimeInner {
    schema: String,
    current: ArcSwap<RuntimeSnapshot>,
    /// Serializes every change to the snapshot or its rule. Guards the
    /// disabled names, including ones no replica group holds yet.
    lock: Mutex<BTreeSet<String>>,
    factory: Arc<dyn DataSourceFactory>,
    closed: AtomicBool,
}

/// Hot-reloading data source for one schema.
#[derive(Clone)]
pub struct OrchestrationDataSource {
    inner: Arc<RuntimeInner>,
    facade: OrchestrationFacade,
    subscriptions: Arc<Mutex<Vec<SubscriptionId>>>,
}

impl OrchestrationDataSource {
    /// Connect to the configured registry and build the runtime.
    pub async fn connect(
        config: &OrchestratorConfig,
        source: RuntimeSource,
        factory: Arc<dyn DataSourceFactory>,
    ) -> OrchestrationResult<Self> {
        let repository = registry::create_repository(&config.registry).await?;
        let facade = OrchestrationFacade::new(config.orchestration.clone(), repository.clone());
        match Self::create(facade, source, factory).await {
            Ok(runtime) => Ok(runtime),
            Err(e) => {
                repository.close().await;
                Err(e)
            }
        }
    }

    /// Build the runtime on top of `facade`.
    pub async fn create(
        facade: OrchestrationFacade,
        source: RuntimeSource,
        factory: Arc<dyn DataSourceFactory>,
    ) -> OrchestrationResult<Self> {
        let schema = facade.schema().to_string();
        let (snapshot, disabled, opened_here) = match source {
            RuntimeSource::FreshBootstrap => {
                let config = facade.bootstrap().await?;
                let snapshot = RuntimeSnapshot::build(&schema, &config, factory.as_ref())?;
                (snapshot, disabled_names(&config.disabled), true)
            }
            RuntimeSource::AdoptExisting(snapshot) => {
                if snapshot.schema() != schema {
                    return Err(OrchestrationError::InvalidRule(format!(
                        "adopted snapshot belongs to schema '{}', not '{}'",
                        snapshot.schema(),
                        schema
                    )));
                }
                let config = snapshot.to_configuration();
                facade.adopt(&config).await?;
                (snapshot, disabled_names(&config.disabled), false)
            }
        };

        let initial = snapshot.to_configuration();
        let runtime = Self {
            inner: Arc::new(RuntimeInner {
                schema: schema.clone(),
                current: ArcSwap::from_pointee(snapshot),
                lock: Mutex::new(disabled),
                factory,
                closed: AtomicBool::new(false),
            }),
            facade,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        };
        runtime.subscribe();

        if let Err(e) = runtime.facade.start(initial).await {
            runtime.unsubscribe();
            if opened_here {
                runtime.inner.current.load().close_pools();
            }
            return Err(e);
        }

        let current = runtime.current();
        metrics::set_snapshot_version(current.version());
        metrics::set_open_pools(current.data_sources().len());
        tracing::info!(
            schema = %schema,
            version = current.version(),
            data_sources = current.data_sources().len(),
            instance_id = %runtime.facade.instance_id(),
            "Orchestration runtime started"
        );
        Ok(runtime)
    }

    fn subscribe(&self) {
        let weak = Arc::downgrade(&self.inner);
        let ids = self.facade.bus().subscribe_all(Arc::new(move |event: &ChangeEvent| {
            match weak.upgrade() {
                Some(inner) => inner.handle(event),
                None => Ok(()),
            }
        }));
        self.subscriptions.lock().extend(ids);
    }

    fn unsubscribe(&self) {
        for id in self.subscriptions.lock().drain(..) {
            self.facade.bus().unsubscribe(id);
        }
    }

    pub fn schema(&self) -> &str {
        &self.inner.schema
    }

    /// The current snapshot. Hold it for the whole operation.
    pub fn current(&self) -> Arc<RuntimeSnapshot> {
        self.inner.current.load_full()
    }

    pub fn facade(&self) -> &OrchestrationFacade {
        &self.facade
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Apply one change event.
    pub fn handle(&self, event: &ChangeEvent) -> OrchestrationResult<()> {
        self.inner.handle(event)
    }

    /// Stop receiving events, release the registry, close every pool.
    pub async fn close(&self) {
        {
            let _guard = self.inner.lock.lock();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
        }
        self.unsubscribe();
        self.facade.close().await;
        self.inner.current.load().close_pools();
        metrics::set_open_pools(0);
        tracing::info!(schema = %self.inner.schema, "Orchestration runtime closed");
    }
}

impl RuntimeInner {
    fn handle(&self, event: &ChangeEvent) -> OrchestrationResult<()> {
        if event.schema() != self.schema {
            tracing::debug!(schema = %self.schema, event_schema = %event.schema(), "Ignoring event for another schema");
            return Ok(());
        }

        let mut flags = self.lock.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(OrchestrationError::Closed);
        }

        match event {
            ChangeEvent::RuleChanged { rule, .. } => self.renew_rule(rule, &flags),
            ChangeEvent::DataSourceMapChanged { data_sources, .. } => self.renew_data_sources(data_sources),
            ChangeEvent::PropertiesChanged { props, .. } => self.renew_props(props),
            ChangeEvent::DisabledStateChanged {
                data_source,
                disabled,
                ..
            } => {
                self.renew_disabled(&mut flags, data_source, *disabled);
                Ok(())
            }
        }
    }

    fn install(&self, snapshot: RuntimeSnapshot) {
        let version = snapshot.version();
        let pools = snapshot.data_sources().len();
        self.current.store(Arc::new(snapshot));
        metrics::set_snapshot_version(version);
        metrics::set_open_pools(pools);
    }

    fn renew_rule(&self, config: &RuleConfiguration, disabled: &BTreeSet<String>) -> OrchestrationResult<()> {
        let current = self.current.load_full();
        let names: BTreeSet<String> = current.data_sources().keys().cloned().collect();
        let rule = ShardingRule::compile(&self.schema, config.clone(), &names)?;
        rule.apply_disabled(disabled);

        let next = current.with_rule(rule);
        let version = next.version();
        self.install(next);
        tracing::info!(schema = %self.schema, version, tables = config.tables.len(), "Rule renewed");
        Ok(())
    }

    fn renew_data_sources(&self, configs: &DataSourceConfigurations) -> OrchestrationResult<()> {
        let current = self.current.load_full();
        let diff = DataSourceDiff::compute(&current.data_source_configs(), configs);
        if diff.is_noop() {
            tracing::debug!(schema = %self.schema, "Data-source map unchanged");
            return Ok(());
        }

        let opened = datasource::open_all(
            self.factory.as_ref(),
            diff.to_open().filter_map(|name| configs.get_key_value(name)),
        )?;

        let mut next_map = DataSourceMap::new();
        for name in &diff.unchanged {
            if let Some(pool) = current.data_source(name) {
                next_map.insert(name.clone(), pool.clone());
            }
        }
        next_map.extend(opened);

        let next = current.with_data_sources(next_map);
        let version = next.version();
        self.install(next);

        // Only the superseded snapshot still references these
        for name in diff.to_close() {
            if let Some(pool) = current.data_source(name) {
                pool.close();
            }
        }

        tracing::info!(
            schema = %self.schema,
            version,
            unchanged = diff.unchanged.len(),
            modified = diff.modified.len(),
            added = diff.added.len(),
            deleted = diff.deleted.len(),
            "Data sources renewed"
        );
        Ok(())
    }

    fn renew_props(&self, props: &Properties) -> OrchestrationResult<()> {
        let current = self.current.load_full();
        let next = current.with_props(props.clone());
        let version = next.version();
        self.install(next);
        tracing::info!(schema = %self.schema, version, "Properties renewed");
        Ok(())
    }

    fn renew_disabled(&self, disabled_names: &mut BTreeSet<String>, data_source: &str, disabled: bool) {
        if disabled {
            disabled_names.insert(data_source.to_string());
        } else {
            disabled_names.remove(data_source);
        }
        let current = self.current.load();
        let groups = current.rule().set_disabled(data_source, disabled);
        if groups == 0 {
            tracing::warn!(
                schema = %self.schema,
                data_source = %data_source,
                "Disabled flag recorded for a data source outside every replica group"
            );
        } else {
            tracing::info!(schema = %self.schema, data_source = %data_source, disabled, groups, "Disabled state changed");
        }
    }
}

fn disabled_names(flags: &BTreeMap<String, bool>) -> BTreeSet<String> {
    flags
        .iter()
        .filter(|(_, disabled)| **disabled)
        .map(|(name, _)| name.clone())
        .collect()
}
