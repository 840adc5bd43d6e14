//! Topic reconciliation: creation, partition growth, config diff, orphans

use crate::cluster::{ConfigOp, NewTopic};
use crate::error::{Result, TopologyError};
use crate::model::Domain;
use crate::snapshot::ClusterSnapshot;
use std::collections::{BTreeMap, BTreeSet};

/// Everything needed to converge declared topics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicPlan {
    pub create: Vec<NewTopic>,
    /// Topic → new total partition count
    pub partitions: BTreeMap<String, i32>,
    /// Topic → config ops; topics without changes are absent
    pub configs: BTreeMap<String, Vec<ConfigOp>>,
}

impl TopicPlan {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.partitions.is_empty() && self.configs.is_empty()
    }
}

/// Diff declared topics against the snapshot.
///
/// Fails with [`TopologyError::PartitionDecrease`] if a topic declares fewer
/// partitions than it has; validation normally rejects that first.
pub fn plan<'a>(
    domains: impl IntoIterator<Item = &'a Domain>,
    snapshot: &ClusterSnapshot,
) -> Result<TopicPlan> {
    let mut plan = TopicPlan::default();

    for domain in domains {
        for topic in domain.topics() {
            let name = topic.full_name();
            let declared_config = topic.topic.protocol_config();

            let Some(actual) = snapshot.topic(&name) else {
                plan.create.push(NewTopic {
                    name,
                    num_partitions: topic.topic.num_partitions,
                    replication_factor: topic.topic.replication_factor,
                    config: declared_config,
                });
                continue;
            };

            let declared = topic.topic.num_partitions;
            if declared < actual.partitions {
                return Err(TopologyError::PartitionDecrease {
                    topic: name,
                    declared,
                    actual: actual.partitions,
                });
            }
            if declared > actual.partitions {
                plan.partitions.insert(name.clone(), declared);
            }

            let ops = config_ops(&declared_config, &actual.config);
            if !ops.is_empty() {
                plan.configs.insert(name, ops);
            }
        }
    }

    Ok(plan)
}

/// SET for every declared entry that differs, DELETE for every actual entry
/// that is no longer declared
pub fn config_ops(
    declared: &BTreeMap<String, String>,
    actual: &BTreeMap<String, String>,
) -> Vec<ConfigOp> {
    let sets = declared
        .iter()
        .filter(|(key, value)| actual.get(*key) != Some(*value))
        .map(|(key, value)| ConfigOp::Set {
            key: key.clone(),
            value: value.clone(),
        });
    let deletes = actual
        .keys()
        .filter(|key| !declared.contains_key(*key))
        .map(|key| ConfigOp::Delete { key: key.clone() });
    sets.chain(deletes).collect()
}

/// Managed topics in the snapshot that no domain declares
pub fn orphaned_topics<'a>(
    domains: impl IntoIterator<Item = &'a Domain>,
    snapshot: &ClusterSnapshot,
) -> BTreeSet<String> {
    let declared: BTreeSet<String> = domains
        .into_iter()
        .flat_map(|d| d.topics().map(|t| t.full_name()))
        .collect();

    snapshot
        .managed_topics()
        .map(|(path, _)| path.full_name())
        .filter(|name| !declared.contains(name))
        .collect()
}
