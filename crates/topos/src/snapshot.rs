//! Point-in-time view of the cluster and registry
//!
//! A snapshot is fetched once at the start of a pass and passed by
//! reference to every reconciler. It is never refreshed mid-pass; the next
//! pass fetches a new one.

use crate::cluster::{AclBinding, AclFilter, ClusterAdmin, TopicDescription};
use crate::config::ReconcilerConfig;
use crate::error::{Result, TopologyError};
use crate::naming::TopicPath;
use crate::registry::RegistryClient;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};

/// Protocol key of the cleanup policy config
pub const CLEANUP_POLICY: &str = "cleanup.policy";

/// Cleanup policies a document may declare
pub const DECLARABLE_CLEANUP_POLICIES: [&str; 2] = ["compact", "delete"];

/// One topic as seen by the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSnapshot {
    pub partitions: i32,
    pub replication_factor: i32,
    /// Dynamic config entries, protocol-form keys
    pub config: BTreeMap<String, String>,
}

impl TopicSnapshot {
    pub fn new(partitions: i32, replication_factor: i32) -> Self {
        Self {
            partitions,
            replication_factor,
            config: BTreeMap::new(),
        }
    }

    pub fn cleanup_policy(&self) -> Option<&str> {
        self.config.get(CLEANUP_POLICY).map(String::as_str)
    }
}

/// Frozen actual state for one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub cluster_id: String,
    pub topics: BTreeMap<String, TopicSnapshot>,
    pub acls: BTreeSet<AclBinding>,
    /// Registry subjects
    pub subjects: BTreeSet<String>,
}

impl ClusterSnapshot {
    /// Read cluster and registry state concurrently.
    ///
    /// Cluster id, topic names, ACLs and subjects are fetched together;
    /// topic descriptions and configs follow in batches of
    /// `describe_batch_size`, at most `snapshot_concurrency` in flight.
    #[instrument(skip_all)]
    pub async fn fetch(
        admin: &dyn ClusterAdmin,
        registry: &dyn RegistryClient,
        config: &ReconcilerConfig,
    ) -> Result<Self> {
        let any = AclFilter::any();
        let (cluster_id, names, acls, subjects) = tokio::try_join!(
            admin.describe_cluster(),
            admin.list_topic_names(),
            admin.describe_acls(&any),
            async { registry.list_subjects().await.map_err(TopologyError::from) },
        )?;

        let names: Vec<String> = names.into_iter().collect();
        let batches: Vec<Vec<String>> = names
            .chunks(config.describe_batch_size.max(1))
            .map(<[String]>::to_vec)
            .collect();
        debug!(
            topics = names.len(),
            batches = batches.len(),
            "Describing topics"
        );

        let described: Vec<(
            BTreeMap<String, TopicDescription>,
            BTreeMap<String, BTreeMap<String, String>>,
        )> = stream::iter(batches)
            .map(|batch| async move {
                tokio::try_join!(admin.describe_topics(&batch), admin.describe_configs(&batch))
            })
            .buffer_unordered(config.snapshot_concurrency.max(1))
            .try_collect()
            .await?;

        let mut topics = BTreeMap::new();
        for (descriptions, mut configs) in described {
            for (name, description) in descriptions {
                let config = configs.remove(&name).unwrap_or_default();
                topics.insert(
                    name,
                    TopicSnapshot {
                        partitions: description.partitions,
                        replication_factor: description.replication_factor,
                        config,
                    },
                );
            }
        }

        info!(
            cluster_id = %cluster_id,
            topics = topics.len(),
            acls = acls.len(),
            subjects = subjects.len(),
            "Fetched cluster snapshot"
        );

        Ok(Self {
            cluster_id,
            topics,
            acls,
            subjects,
        })
    }

    pub fn with_topic(mut self, name: impl Into<String>, topic: TopicSnapshot) -> Self {
        self.topics.insert(name.into(), topic);
        self
    }

    pub fn with_acls(mut self, acls: impl IntoIterator<Item = AclBinding>) -> Self {
        self.acls.extend(acls);
        self
    }

    pub fn with_subjects<S: Into<String>>(mut self, subjects: impl IntoIterator<Item = S>) -> Self {
        self.subjects.extend(subjects.into_iter().map(Into::into));
        self
    }

    pub fn topic(&self, name: &str) -> Option<&TopicSnapshot> {
        self.topics.get(name)
    }

    /// Topics whose names follow the naming convention
    pub fn managed_topics(&self) -> impl Iterator<Item = (TopicPath, &TopicSnapshot)> {
        self.topics
            .iter()
            .filter_map(|(name, topic)| TopicPath::parse(name).map(|path| (path, topic)))
    }

    /// Bindings on exactly this resource name
    pub fn acls_on<'a>(&'a self, resource_name: &'a str) -> impl Iterator<Item = &'a AclBinding> {
        self.acls
            .iter()
            .filter(move |binding| binding.resource_name == resource_name)
    }
}
