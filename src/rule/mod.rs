//! Sharding rule model.
//!
//! `config` holds the declarative form persisted in the registry; `sharding`
//! compiles it into the live rule a snapshot owns, with `replica` tracking
//! per-group disabled state.

pub mod config;
pub mod replica;
pub mod sharding;

pub use config::{ReplicaGroupConfiguration, RuleConfiguration, TableRuleConfiguration};
pub use replica::ReplicaGroupRule;
pub use sharding::ShardingRule;
