//! In-memory cluster admin backed by a serialisable state document

use super::{AclBinding, AclFilter, ClusterAdmin, ConfigOp, NewTopic, TopicDescription};
use crate::error::{Result, TopologyError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// Full cluster state as persisted by `--cluster-state`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterState {
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    #[serde(default)]
    pub topics: BTreeMap<String, TopicState>,

    #[serde(default)]
    pub acls: BTreeSet<AclBinding>,
}

fn default_cluster_id() -> String {
    "local".to_string()
}

/// One topic in a [`ClusterState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicState {
    pub partitions: i32,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,

    /// Dynamic config entries, protocol-form keys
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

fn default_replication_factor() -> i32 {
    1
}

impl TopicState {
    pub fn new(partitions: i32, replication_factor: i32) -> Self {
        Self {
            partitions,
            replication_factor,
            config: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// A mutating admin call, as observed by [`MemoryClusterAdmin`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    CreateTopics(Vec<String>),
    CreatePartitions(BTreeMap<String, i32>),
    AlterConfigs(BTreeMap<String, Vec<ConfigOp>>),
    CreateAcls(Vec<AclBinding>),
    DeleteAcls(usize),
    DeleteTopics(Vec<String>),
}

/// [`ClusterAdmin`] over an in-process [`ClusterState`].
///
/// Requests behave like the broker's: creating an existing topic or
/// shrinking partitions fails. Empty requests are ignored and not recorded.
#[derive(Debug, Default)]
pub struct MemoryClusterAdmin {
    state: RwLock<ClusterState>,
    writes: Mutex<Vec<WriteCall>>,
}

impl MemoryClusterAdmin {
    pub fn new(state: ClusterState) -> Self {
        Self {
            state: RwLock::new(state),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Load state from a YAML file; a missing file yields an empty cluster
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Cluster state file not found, starting empty");
            return Ok(Self::new(ClusterState {
                cluster_id: default_cluster_id(),
                ..Default::default()
            }));
        }
        let content = std::fs::read_to_string(path)?;
        let state: ClusterState = serde_yaml::from_str(&content)?;
        Ok(Self::new(state))
    }

    /// Persist the current state as YAML
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(&*self.state.read())?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Copy of the current state
    pub fn state(&self) -> ClusterState {
        self.state.read().clone()
    }

    /// Every write call observed so far, oldest first
    pub fn writes(&self) -> Vec<WriteCall> {
        self.writes.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    fn record(&self, call: WriteCall) {
        self.writes.lock().push(call);
    }
}

fn unknown_topic(name: &str) -> TopologyError {
    TopologyError::ClusterCommunication(format!("Unknown topic or partition: {}", name))
}

#[async_trait]
impl ClusterAdmin for MemoryClusterAdmin {
    async fn describe_cluster(&self) -> Result<String> {
        Ok(self.state.read().cluster_id.clone())
    }

    async fn list_topic_names(&self) -> Result<BTreeSet<String>> {
        Ok(self.state.read().topics.keys().cloned().collect())
    }

    async fn describe_topics(
        &self,
        names: &[String],
    ) -> Result<BTreeMap<String, TopicDescription>> {
        let state = self.state.read();
        names
            .iter()
            .map(|name| {
                let topic = state.topics.get(name).ok_or_else(|| unknown_topic(name))?;
                Ok((
                    name.clone(),
                    TopicDescription {
                        partitions: topic.partitions,
                        replication_factor: topic.replication_factor,
                    },
                ))
            })
            .collect()
    }

    async fn describe_configs(
        &self,
        names: &[String],
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
        let state = self.state.read();
        names
            .iter()
            .map(|name| {
                let topic = state.topics.get(name).ok_or_else(|| unknown_topic(name))?;
                Ok((name.clone(), topic.config.clone()))
            })
            .collect()
    }

    async fn describe_acls(&self, filter: &AclFilter) -> Result<BTreeSet<AclBinding>> {
        Ok(self
            .state
            .read()
            .acls
            .iter()
            .filter(|binding| filter.matches(binding))
            .cloned()
            .collect())
    }

    async fn create_topics(&self, topics: Vec<NewTopic>) -> Result<()> {
        if topics.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        if let Some(existing) = topics.iter().find(|t| state.topics.contains_key(&t.name)) {
            return Err(TopologyError::ClusterCommunication(format!(
                "Topic already exists: {}",
                existing.name
            )));
        }
        let names: Vec<String> = topics.iter().map(|t| t.name.clone()).collect();
        for topic in topics {
            state.topics.insert(
                topic.name,
                TopicState {
                    partitions: topic.num_partitions,
                    replication_factor: topic.replication_factor,
                    config: topic.config,
                },
            );
        }
        drop(state);
        self.record(WriteCall::CreateTopics(names));
        Ok(())
    }

    async fn create_partitions(&self, counts: BTreeMap<String, i32>) -> Result<()> {
        if counts.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        for (name, count) in &counts {
            let topic = state.topics.get(name).ok_or_else(|| unknown_topic(name))?;
            if *count <= topic.partitions {
                return Err(TopologyError::ClusterCommunication(format!(
                    "Topic {} already has {} partitions, cannot set {}",
                    name, topic.partitions, count
                )));
            }
        }
        for (name, count) in &counts {
            if let Some(topic) = state.topics.get_mut(name) {
                topic.partitions = *count;
            }
        }
        drop(state);
        self.record(WriteCall::CreatePartitions(counts));
        Ok(())
    }

    async fn incremental_alter_configs(
        &self,
        ops: BTreeMap<String, Vec<ConfigOp>>,
    ) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        if let Some(name) = ops.keys().find(|name| !state.topics.contains_key(*name)) {
            return Err(unknown_topic(name));
        }
        for (name, topic_ops) in &ops {
            if let Some(topic) = state.topics.get_mut(name) {
                for op in topic_ops {
                    match op {
                        ConfigOp::Set { key, value } => {
                            topic.config.insert(key.clone(), value.clone());
                        }
                        ConfigOp::Delete { key } => {
                            topic.config.remove(key);
                        }
                    }
                }
            }
        }
        drop(state);
        self.record(WriteCall::AlterConfigs(ops));
        Ok(())
    }

    async fn create_acls(&self, bindings: Vec<AclBinding>) -> Result<()> {
        if bindings.is_empty() {
            return Ok(());
        }
        self.state.write().acls.extend(bindings.iter().cloned());
        self.record(WriteCall::CreateAcls(bindings));
        Ok(())
    }

    async fn delete_acls(&self, filters: Vec<AclFilter>) -> Result<()> {
        if filters.is_empty() {
            return Ok(());
        }
        self.state
            .write()
            .acls
            .retain(|binding| !filters.iter().any(|f| f.matches(binding)));
        self.record(WriteCall::DeleteAcls(filters.len()));
        Ok(())
    }

    async fn delete_topics(&self, names: Vec<String>) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        if let Some(name) = names.iter().find(|n| !state.topics.contains_key(*n)) {
            return Err(unknown_topic(name));
        }
        for name in &names {
            state.topics.remove(name);
        }
        drop(state);
        self.record(WriteCall::DeleteTopics(names));
        Ok(())
    }
}
