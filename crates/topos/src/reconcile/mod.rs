//! Desired-vs-actual diffs
//!
//! Each reconciler is a set of pure functions over declared domains and the
//! frozen [`ClusterSnapshot`](crate::snapshot::ClusterSnapshot); only the
//! schema reconciler needs to query the registry while planning. Nothing in
//! here writes; the orchestrator applies the resulting plans.

pub mod acl;
pub mod schema;
pub mod topic;

pub use schema::{SchemaPlan, SchemaRegistration};
pub use topic::TopicPlan;
