//! Hot-reload behaviour of the orchestrated data source.

use std::sync::Arc;
use std::time::Duration;

use shard_orchestrator::orchestration::{ChangeEvent, ConfigCenter, OrchestrationNode};
use shard_orchestrator::props::Properties;
use shard_orchestrator::registry::CoordinationRepository;
use shard_orchestrator::rule::TableRuleConfiguration;
use shard_orchestrator::{CoordinationServer, OrchestrationDataSource, OrchestrationError, RuntimeSource};

mod common;

use common::{RecordingFactory, SCHEMA};

const WAIT: Duration = Duration::from_secs(5);

struct Fixture {
    _server: CoordinationServer,
    runtime: OrchestrationDataSource,
    factory: Arc<RecordingFactory>,
    operator: ConfigCenter,
    operator_repo: Arc<dyn CoordinationRepository>,
}

async fn start() -> Fixture {
    let server = common::start_registry().await;
    let operator_repo = common::connect_dyn(&server).await;
    let operator = ConfigCenter::new(
        operator_repo.clone(),
        OrchestrationNode::new(Some(common::NAMESPACE), SCHEMA),
    );
    operator.persist_all(&common::sample_schema()).await.unwrap();

    let factory = RecordingFactory::new();
    let facade = common::facade(&server, false).await;
    let runtime = OrchestrationDataSource::create(facade, RuntimeSource::FreshBootstrap, factory.clone())
        .await
        .unwrap();

    Fixture {
        _server: server,
        runtime,
        factory,
        operator,
        operator_repo,
    }
}

fn data_source_event(names: &[(&str, &str)]) -> ChangeEvent {
    ChangeEvent::DataSourceMapChanged {
        schema: SCHEMA.to_string(),
        data_sources: names
            .iter()
            .map(|(name, database)| (name.to_string(), common::data_source(database)))
            .collect(),
    }
}

fn rule_event(binding: &str) -> ChangeEvent {
    let mut rule = common::sample_rule();
    rule.binding_tables = vec![binding.to_string()];
    ChangeEvent::RuleChanged {
        schema: SCHEMA.to_string(),
        rule,
    }
}

fn disabled_event(name: &str, disabled: bool) -> ChangeEvent {
    ChangeEvent::DisabledStateChanged {
        schema: SCHEMA.to_string(),
        data_source: name.to_string(),
        disabled,
    }
}

#[tokio::test]
async fn test_unchanged_pools_survive_data_source_change() {
    let fx = start().await;
    let before = fx.runtime.current();
    assert_eq!(before.data_sources().len(), 4);

    // ds_0 and ds_0_r0 unchanged, ds_1 modified, ds_0_r1 deleted, ds_2 added
    fx.runtime
        .handle(&data_source_event(&[
            ("ds_0", "ds_0"),
            ("ds_1", "ds_1_moved"),
            ("ds_0_r0", "ds_0_r0"),
            ("ds_2", "ds_2"),
        ]))
        .unwrap();

    let after = fx.runtime.current();
    assert_eq!(after.version(), before.version() + 1);
    assert_eq!(
        after.data_sources().keys().cloned().collect::<Vec<_>>(),
        vec!["ds_0", "ds_0_r0", "ds_1", "ds_2"]
    );

    for kept in ["ds_0", "ds_0_r0"] {
        let old = before.data_source(kept).unwrap();
        let new = after.data_source(kept).unwrap();
        assert!(Arc::ptr_eq(old, new), "{} was reopened", kept);
        assert!(!new.is_closed());
    }

    let old_ds_1 = before.data_source("ds_1").unwrap();
    let new_ds_1 = after.data_source("ds_1").unwrap();
    assert!(!Arc::ptr_eq(old_ds_1, new_ds_1));
    assert!(old_ds_1.is_closed());
    assert!(!new_ds_1.is_closed());
    assert_eq!(new_ds_1.config().url, "mysql://127.0.0.1:3306/ds_1_moved");

    assert!(before.data_source("ds_0_r1").unwrap().is_closed());
    assert!(!after.data_source("ds_2").unwrap().is_closed());

    // Exactly the modified and added pools were opened
    assert_eq!(fx.factory.open_count(), 4 + 2);
    assert_eq!(fx.factory.live(), 4);
}

#[tokio::test]
async fn test_in_flight_snapshot_stays_consistent() {
    let fx = start().await;
    let held = fx.runtime.current();
    let lease = held.data_source("ds_0").unwrap().lease().unwrap();

    fx.runtime
        .handle(&data_source_event(&[("ds_0", "ds_0"), ("ds_1", "ds_1")]))
        .unwrap();

    // The held snapshot still lists the old map and the unchanged pool is live
    assert_eq!(held.data_sources().len(), 4);
    assert_eq!(held.data_source("ds_0").unwrap().active_leases(), 1);
    assert!(!held.data_source("ds_0").unwrap().is_closed());
    drop(lease);
    assert_eq!(fx.runtime.current().data_source("ds_0").unwrap().active_leases(), 0);
}

#[tokio::test]
async fn test_failed_open_keeps_previous_snapshot() {
    let fx = start().await;
    let before = fx.runtime.current();
    fx.factory.fail_on("ds_9");

    let result = fx.runtime.handle(&data_source_event(&[
        ("ds_0", "ds_0"),
        ("ds_1", "ds_1_moved"),
        ("ds_9", "ds_9"),
    ]));
    assert!(matches!(result, Err(OrchestrationError::DataSource { ref name, .. }) if name == "ds_9"));

    let after = fx.runtime.current();
    assert!(Arc::ptr_eq(&before, &after));
    assert!(before.data_sources().values().all(|pool| !pool.is_closed()));
    // The replacement opened for ds_1 before the failure was released
    assert_eq!(fx.factory.live(), 4);
}

#[tokio::test]
async fn test_rule_change_keeps_every_pool() {
    let fx = start().await;
    let before = fx.runtime.current();

    fx.runtime.handle(&rule_event("t_order,t_order_item")).unwrap();

    let after = fx.runtime.current();
    assert_eq!(after.version(), before.version() + 1);
    assert_eq!(after.rule().config().binding_tables, vec!["t_order,t_order_item"]);
    for (name, pool) in before.data_sources() {
        assert!(Arc::ptr_eq(pool, after.data_source(name).unwrap()));
        assert!(!pool.is_closed());
    }
    assert_eq!(fx.factory.open_count(), 4);
}

#[tokio::test]
async fn test_properties_change_only_touches_properties() {
    let fx = start().await;
    let before = fx.runtime.current();

    fx.runtime
        .handle(&ChangeEvent::PropertiesChanged {
            schema: SCHEMA.to_string(),
            props: Properties::new().with("sql.show", "true").with("executor.size", "8"),
        })
        .unwrap();

    let after = fx.runtime.current();
    assert!(after.props().sql_show());
    assert_eq!(after.props().executor_size(), 8);
    assert!(Arc::ptr_eq(before.rule(), after.rule()));
    assert_eq!(fx.factory.open_count(), 4);
}

#[tokio::test]
async fn test_disabled_flag_touches_nothing_else() {
    let fx = start().await;
    let before = fx.runtime.current();

    fx.runtime.handle(&disabled_event("ds_0_r1", true)).unwrap();

    let after = fx.runtime.current();
    assert!(Arc::ptr_eq(&before, &after));
    let group = after.rule().replica_group("rw").unwrap();
    assert_eq!(group.available_replicas(), vec!["ds_0_r0"]);
    assert!(after.data_sources().values().all(|pool| !pool.is_closed()));

    fx.runtime.handle(&disabled_event("ds_0_r1", false)).unwrap();
    assert_eq!(group.available_replicas(), vec!["ds_0_r0", "ds_0_r1"]);

    // Names outside every group are accepted and ignored
    fx.runtime.handle(&disabled_event("ds_unknown", true)).unwrap();
    assert_eq!(fx.factory.open_count(), 4);
}

#[tokio::test]
async fn test_disabled_flag_survives_rule_swap() {
    let fx = start().await;
    fx.runtime.handle(&disabled_event("ds_0_r0", true)).unwrap();
    fx.runtime.handle(&rule_event("t_order")).unwrap();

    let current = fx.runtime.current();
    let group = current.rule().replica_group("rw").unwrap();
    assert!(group.is_disabled("ds_0_r0"));
    assert_eq!(group.available_replicas(), vec!["ds_0_r1"]);
}

fn rule_with_third_replica() -> ChangeEvent {
    let mut rule = common::sample_rule();
    rule.replica_groups[0].replicas.push("ds_0_r2".to_string());
    ChangeEvent::RuleChanged {
        schema: SCHEMA.to_string(),
        rule,
    }
}

#[tokio::test]
async fn test_disabled_flag_applies_once_data_source_joins_group() {
    let fx = start().await;
    fx.runtime
        .handle(&data_source_event(&[
            ("ds_0", "ds_0"),
            ("ds_1", "ds_1"),
            ("ds_0_r0", "ds_0_r0"),
            ("ds_0_r1", "ds_0_r1"),
            ("ds_0_r2", "ds_0_r2"),
        ]))
        .unwrap();
    fx.runtime.handle(&disabled_event("ds_0_r2", true)).unwrap();
    fx.runtime.handle(&rule_with_third_replica()).unwrap();

    let current = fx.runtime.current();
    let group = current.rule().replica_group("rw").unwrap();
    assert!(group.is_disabled("ds_0_r2"));
    assert_eq!(group.available_replicas(), vec!["ds_0_r0", "ds_0_r1"]);

    fx.runtime.handle(&disabled_event("ds_0_r2", false)).unwrap();
    fx.runtime.handle(&rule_event("t_order")).unwrap();
    let current = fx.runtime.current();
    assert!(!current.rule().replica_group("rw").unwrap().is_disabled("ds_0_r2"));
}

#[tokio::test]
async fn test_bootstrapped_flag_outside_group_applies_after_rule_change() {
    let server = common::start_registry().await;
    let operator = ConfigCenter::new(
        common::connect_dyn(&server).await,
        OrchestrationNode::new(Some(common::NAMESPACE), SCHEMA),
    );
    let mut schema = common::sample_schema();
    schema
        .data_sources
        .insert("ds_0_r2".to_string(), common::data_source("ds_0_r2"));
    schema.disabled.insert("ds_0_r2".to_string(), true);
    operator.persist_all(&schema).await.unwrap();

    let facade = common::facade(&server, false).await;
    let runtime = OrchestrationDataSource::create(facade, RuntimeSource::FreshBootstrap, RecordingFactory::new())
        .await
        .unwrap();
    runtime.handle(&rule_with_third_replica()).unwrap();

    let current = runtime.current();
    let group = current.rule().replica_group("rw").unwrap();
    assert!(group.is_disabled("ds_0_r2"));
    assert_eq!(group.available_replicas(), vec!["ds_0_r0", "ds_0_r1"]);
    runtime.close().await;
}

#[tokio::test]
async fn test_registry_flag_set_before_group_membership_is_honoured() {
    let fx = start().await;
    let runtime = fx.runtime.clone();

    let mut changed = common::sample_schema().data_sources;
    changed.insert("ds_0_r2".to_string(), common::data_source("ds_0_r2"));
    fx.operator.persist_data_sources(&changed).await.unwrap();
    fx.operator.persist_disabled("ds_0_r2", true).await.unwrap();
    let mut rule = common::sample_rule();
    rule.replica_groups[0].replicas.push("ds_0_r2".to_string());
    fx.operator.persist_rule(&rule).await.unwrap();

    let joined = || {
        runtime
            .current()
            .rule()
            .replica_group("rw")
            .map(|group| group.replicas().len() == 3)
            .unwrap_or(false)
    };
    assert!(common::wait_until(WAIT, joined).await);
    assert_eq!(
        fx.operator_repo
            .get(&OrchestrationNode::new(Some(common::NAMESPACE), SCHEMA).disabled_path("ds_0_r2"))
            .await
            .unwrap()
            .as_deref(),
        Some("true")
    );
    let current = runtime.current();
    let group = current.rule().replica_group("rw").unwrap();
    assert!(group.is_disabled("ds_0_r2"));
    assert_eq!(group.available_replicas(), vec!["ds_0_r0", "ds_0_r1"]);
}

#[tokio::test]
async fn test_rule_swaps_and_disabled_flips_never_interleave() {
    let fx = start().await;
    let runtime = fx.runtime.clone();

    std::thread::scope(|scope| {
        let swapper = runtime.clone();
        scope.spawn(move || {
            for i in 0..200 {
                swapper.handle(&rule_event(&format!("t_order_{}", i))).unwrap();
            }
        });
        let flipper = runtime.clone();
        scope.spawn(move || {
            for i in 0..200 {
                flipper.handle(&disabled_event("ds_0_r1", i % 2 == 0)).unwrap();
            }
        });
    });

    // The last flip was `false` for i = 199; a lost flip would leave it set
    let current = runtime.current();
    assert_eq!(current.rule().config().binding_tables, vec!["t_order_199"]);
    assert!(!current.rule().replica_group("rw").unwrap().is_disabled("ds_0_r1"));

    runtime.handle(&disabled_event("ds_0_r1", true)).unwrap();
    runtime.handle(&rule_event("final")).unwrap();
    assert!(runtime.current().rule().replica_group("rw").unwrap().is_disabled("ds_0_r1"));
}

#[tokio::test]
async fn test_events_for_other_schemas_are_ignored() {
    let fx = start().await;
    let before = fx.runtime.current();
    fx.runtime
        .handle(&ChangeEvent::DataSourceMapChanged {
            schema: "other_db".to_string(),
            data_sources: Default::default(),
        })
        .unwrap();
    assert!(Arc::ptr_eq(&before, &fx.runtime.current()));
}

#[tokio::test]
async fn test_registry_changes_reach_the_runtime() {
    let fx = start().await;
    let runtime = fx.runtime.clone();

    let mut changed = common::sample_schema().data_sources;
    changed.insert("ds_2".to_string(), common::data_source("ds_2"));
    fx.operator.persist_data_sources(&changed).await.unwrap();
    assert!(common::wait_until(WAIT, || runtime.current().data_source("ds_2").is_some()).await);

    fx.operator.persist_disabled("ds_0_r0", true).await.unwrap();
    assert!(
        common::wait_until(WAIT, || {
            runtime.current().rule().replica_group("rw").unwrap().is_disabled("ds_0_r0")
        })
        .await
    );

    fx.operator
        .persist_properties(&Properties::new().with("sql.show", "true"))
        .await
        .unwrap();
    assert!(common::wait_until(WAIT, || runtime.current().props().sql_show()).await);

    let mut rule = common::sample_rule();
    rule.tables.push(TableRuleConfiguration::new("t_user", "ds_1.t_user"));
    fx.operator.persist_rule(&rule).await.unwrap();
    assert!(common::wait_until(WAIT, || runtime.current().rule().config().tables.len() == 2).await);
    // The rule swap kept the flag set by the earlier notification
    assert!(runtime.current().rule().replica_group("rw").unwrap().is_disabled("ds_0_r0"));
}

#[tokio::test]
async fn test_malformed_change_is_dropped_and_delivery_continues() {
    let fx = start().await;
    let runtime = fx.runtime.clone();
    let node = OrchestrationNode::new(Some(common::NAMESPACE), SCHEMA);
    let version = runtime.current().version();

    fx.operator_repo.persist(&node.rule_path(), "{not json").await.unwrap();
    fx.operator
        .persist_properties(&Properties::new().with("sql.show", "true"))
        .await
        .unwrap();

    assert!(common::wait_until(WAIT, || runtime.current().props().sql_show()).await);
    // Only the properties change produced a snapshot
    assert_eq!(runtime.current().version(), version + 1);
    assert_eq!(runtime.current().rule().config().tables.len(), 1);
}

#[tokio::test]
async fn test_deleted_disabled_node_reenables() {
    let fx = start().await;
    let runtime = fx.runtime.clone();
    let node = OrchestrationNode::new(Some(common::NAMESPACE), SCHEMA);

    fx.operator.persist_disabled("ds_0_r1", true).await.unwrap();
    let group_disabled = || runtime.current().rule().replica_group("rw").unwrap().is_disabled("ds_0_r1");
    assert!(common::wait_until(WAIT, group_disabled).await);

    fx.operator_repo.delete(&node.disabled_path("ds_0_r1")).await.unwrap();
    assert!(common::wait_until(WAIT, || !group_disabled()).await);
}

#[tokio::test]
async fn test_close_releases_everything() {
    let fx = start().await;
    let node = OrchestrationNode::new(Some(common::NAMESPACE), SCHEMA);
    let instance = node.instance_path(fx.runtime.facade().instance_id());
    assert!(fx.operator_repo.get(&instance).await.unwrap().is_some());

    let snapshot = fx.runtime.current();
    fx.runtime.close().await;
    fx.runtime.close().await;

    assert!(fx.runtime.is_closed());
    assert!(snapshot.data_sources().values().all(|pool| pool.is_closed()));
    assert_eq!(fx.runtime.facade().watch_count(), 0);
    assert_eq!(fx.operator_repo.get(&instance).await.unwrap(), None);
    assert!(matches!(
        fx.runtime.handle(&rule_event("late")),
        Err(OrchestrationError::Closed)
    ));
}
