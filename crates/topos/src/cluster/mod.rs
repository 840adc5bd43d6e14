//! Cluster admin contract
//!
//! The reconciler never speaks a wire protocol itself. Everything it needs
//! from the cluster goes through [`ClusterAdmin`]; transports implement the
//! trait and own their own retries and timeouts. Any error they return is
//! fatal for the current pass.

mod memory;

pub use memory::{ClusterState, MemoryClusterAdmin, TopicState, WriteCall};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Resource name Kafka uses for cluster-scoped ACLs
pub const CLUSTER_RESOURCE_NAME: &str = "kafka-cluster";

/// Kind of resource an ACL applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Topic,
    Group,
    Cluster,
    TransactionalId,
}

/// How an ACL resource name is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    Literal,
    Prefixed,
}

/// Operation granted by an ACL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AclOperation {
    Read,
    Write,
    Describe,
    IdempotentWrite,
}

/// Allow or deny
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AclPermission {
    Allow,
    Deny,
}

/// One principal granted one operation on one resource pattern.
///
/// Equality is structural over all six fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclBinding {
    pub resource_type: ResourceType,
    pub resource_name: String,
    pub pattern_type: PatternType,
    pub principal: String,
    pub operation: AclOperation,
    pub permission: AclPermission,
}

impl AclBinding {
    /// Allow `operation` for `principal` on a prefixed resource
    pub fn prefixed(
        resource_type: ResourceType,
        resource_name: impl Into<String>,
        principal: impl Into<String>,
        operation: AclOperation,
    ) -> Self {
        Self {
            resource_type,
            resource_name: resource_name.into(),
            pattern_type: PatternType::Prefixed,
            principal: principal.into(),
            operation,
            permission: AclPermission::Allow,
        }
    }

    /// Allow `operation` for `principal` on a literal resource
    pub fn literal(
        resource_type: ResourceType,
        resource_name: impl Into<String>,
        principal: impl Into<String>,
        operation: AclOperation,
    ) -> Self {
        Self {
            pattern_type: PatternType::Literal,
            ..Self::prefixed(resource_type, resource_name, principal, operation)
        }
    }

    /// The cluster-level idempotent-write grant every producing domain needs
    pub fn cluster_idempotent_write(principal: impl Into<String>) -> Self {
        Self::literal(
            ResourceType::Cluster,
            CLUSTER_RESOURCE_NAME,
            principal,
            AclOperation::IdempotentWrite,
        )
    }

    pub fn is_cluster_binding(&self) -> bool {
        self.resource_type == ResourceType::Cluster
    }
}

impl fmt::Display for AclBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}:{:?}:{} {:?} {:?} {}",
            self.resource_type,
            self.pattern_type,
            self.resource_name,
            self.permission,
            self.operation,
            self.principal
        )
    }
}

/// Selects ACL bindings; `None` fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AclFilter {
    pub resource_type: Option<ResourceType>,
    pub resource_name: Option<String>,
    pub pattern_type: Option<PatternType>,
    pub principal: Option<String>,
    pub operation: Option<AclOperation>,
    pub permission: Option<AclPermission>,
}

impl AclFilter {
    /// Matches every binding
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, binding: &AclBinding) -> bool {
        self.resource_type.map_or(true, |t| t == binding.resource_type)
            && self
                .resource_name
                .as_deref()
                .map_or(true, |n| n == binding.resource_name)
            && self.pattern_type.map_or(true, |p| p == binding.pattern_type)
            && self
                .principal
                .as_deref()
                .map_or(true, |p| p == binding.principal)
            && self.operation.map_or(true, |o| o == binding.operation)
            && self.permission.map_or(true, |p| p == binding.permission)
    }
}

impl From<&AclBinding> for AclFilter {
    /// Filter matching exactly one binding
    fn from(binding: &AclBinding) -> Self {
        Self {
            resource_type: Some(binding.resource_type),
            resource_name: Some(binding.resource_name.clone()),
            pattern_type: Some(binding.pattern_type),
            principal: Some(binding.principal.clone()),
            operation: Some(binding.operation),
            permission: Some(binding.permission),
        }
    }
}

/// Topic creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopic {
    pub name: String,
    pub num_partitions: i32,
    pub replication_factor: i32,
    /// Protocol-form config keys
    pub config: BTreeMap<String, String>,
}

/// Partition and replica count of an existing topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicDescription {
    pub partitions: i32,
    pub replication_factor: i32,
}

/// Incremental config change on one topic
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigOp {
    Set { key: String, value: String },
    Delete { key: String },
}

impl ConfigOp {
    pub fn key(&self) -> &str {
        match self {
            ConfigOp::Set { key, .. } | ConfigOp::Delete { key } => key,
        }
    }
}

impl fmt::Display for ConfigOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigOp::Set { key, value } => write!(f, "SET {}={}", key, value),
            ConfigOp::Delete { key } => write!(f, "DELETE {}", key),
        }
    }
}

/// Administrative capability over a Kafka-compatible cluster
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    async fn describe_cluster(&self) -> Result<String>;

    async fn list_topic_names(&self) -> Result<BTreeSet<String>>;

    async fn describe_topics(&self, names: &[String])
        -> Result<BTreeMap<String, TopicDescription>>;

    /// Dynamic (non-default) config entries per topic, protocol-form keys
    async fn describe_configs(
        &self,
        names: &[String],
    ) -> Result<BTreeMap<String, BTreeMap<String, String>>>;

    async fn describe_acls(&self, filter: &AclFilter) -> Result<BTreeSet<AclBinding>>;

    async fn create_topics(&self, topics: Vec<NewTopic>) -> Result<()>;

    /// Grow topics to the given total partition counts
    async fn create_partitions(&self, counts: BTreeMap<String, i32>) -> Result<()>;

    async fn incremental_alter_configs(&self, ops: BTreeMap<String, Vec<ConfigOp>>)
        -> Result<()>;

    async fn create_acls(&self, bindings: Vec<AclBinding>) -> Result<()>;

    async fn delete_acls(&self, filters: Vec<AclFilter>) -> Result<()>;

    async fn delete_topics(&self, names: Vec<String>) -> Result<()>;
}
