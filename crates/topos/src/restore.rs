//! Rebuild declarative domains from live cluster state
//!
//! Restore is the inverse of reconciliation. Every managed topic whose
//! domain segment is requested becomes a topic node; its domain principal
//! and consumer lists are read back from the ACLs, and its schema
//! references from the registry subjects that follow the naming convention.
//! A non-empty domain set is required: ACL provenance is ambiguous once
//! every domain is in play.

use crate::cluster::{AclBinding, AclOperation, ResourceType};
use crate::error::{Result, TopologyError};
use crate::model::{internal_config_key, Consumer, Domain, SchemaRef, Topic, Visibility};
use crate::naming::{self, SchemaRole, SubjectPath, TopicPath};
use crate::registry::RegistryClient;
use crate::schema::{CompatibilityMode, SchemaType};
use crate::snapshot::{ClusterSnapshot, TopicSnapshot, DECLARABLE_CLEANUP_POLICIES};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Registry metadata attached to a restored schema reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectInfo {
    pub schema_type: SchemaType,
    pub compatibility: CompatibilityMode,
}

/// Look up type and compatibility of every managed subject of the requested
/// domains, at most `concurrency` registry calls in flight
pub async fn fetch_subjects(
    registry: &dyn RegistryClient,
    snapshot: &ClusterSnapshot,
    domains: &BTreeSet<String>,
    concurrency: usize,
) -> Result<BTreeMap<String, SubjectInfo>> {
    let subjects: Vec<&String> = snapshot
        .subjects
        .iter()
        .filter(|subject| {
            SubjectPath::parse(subject).is_some_and(|path| domains.contains(&path.topic.domain))
        })
        .collect();

    let found: Vec<Option<(String, SubjectInfo)>> = stream::iter(subjects)
        .map(|subject| async move {
            let Some(latest) = registry.get_latest_schema(subject).await? else {
                return Ok(None);
            };
            let compatibility = registry
                .get_compatibility(subject)
                .await?
                .unwrap_or_default();
            Ok::<_, TopologyError>(Some((
                subject.clone(),
                SubjectInfo {
                    schema_type: latest.schema_type,
                    compatibility,
                },
            )))
        })
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await?;

    Ok(found.into_iter().flatten().collect())
}

/// Build one domain per requested name that owns at least one topic
pub fn build(
    snapshot: &ClusterSnapshot,
    subjects: &BTreeMap<String, SubjectInfo>,
    domains: &BTreeSet<String>,
) -> Result<Vec<Domain>> {
    if domains.is_empty() {
        return Err(TopologyError::PolicyViolation(
            "restore requires at least one domain".to_string(),
        ));
    }

    let mut restored: BTreeMap<String, Domain> = BTreeMap::new();
    for (path, actual) in snapshot.managed_topics() {
        if !domains.contains(&path.domain) {
            continue;
        }

        let domain = restored
            .entry(path.domain.clone())
            .or_insert_with(|| Domain {
                name: path.domain.clone(),
                description: String::new(),
                principal: domain_principal(snapshot, &path.domain),
                maintainer: None,
                visibilities: Vec::new(),
            });

        let index = match domain
            .visibilities
            .iter()
            .position(|v| v.visibility_type == path.visibility)
        {
            Some(index) => index,
            None => {
                let mut visibility = Visibility::new(path.visibility);
                visibility.consumers =
                    consumers_on(snapshot, &path.visibility_resource_name());
                domain.visibilities.push(visibility);
                domain.visibilities.len() - 1
            }
        };
        let visibility = &mut domain.visibilities[index];

        if !visibility.topics.iter().any(|t| t.name == path.topic) {
            visibility.topics.push(restore_topic(snapshot, subjects, &path, actual));
        }
    }

    for name in domains {
        if !restored.contains_key(name) {
            warn!(domain = %name, "No managed topics found, nothing to restore");
        }
    }

    Ok(restored.into_values().collect())
}

fn restore_topic(
    snapshot: &ClusterSnapshot,
    subjects: &BTreeMap<String, SubjectInfo>,
    path: &TopicPath,
    actual: &TopicSnapshot,
) -> Topic {
    let full_name = path.full_name();
    let mut topic = Topic::new(&path.topic, actual.partitions, actual.replication_factor);
    topic.config = actual
        .config
        .iter()
        .map(|(key, value)| (internal_config_key(key), value.clone()))
        .collect();
    if let Some(policy) = undeclarable_cleanup_policy(actual) {
        warn!(
            topic = %full_name,
            cleanup_policy = %policy,
            "Cleanup policy copied as-is, restored document will fail validation"
        );
    }
    topic.consumers = consumers_on(snapshot, &full_name);
    topic.key_schema = schema_ref(subjects, &full_name, SchemaRole::Key);
    topic.value_schema = schema_ref(subjects, &full_name, SchemaRole::Value);
    debug!(topic = %full_name, "Restored topic");
    topic
}

fn schema_ref(
    subjects: &BTreeMap<String, SubjectInfo>,
    topic_full_name: &str,
    role: SchemaRole,
) -> Option<SchemaRef> {
    let subject = naming::subject_name(topic_full_name, role);
    subjects.get(&subject).map(|info| SchemaRef {
        subject,
        schema_type: info.schema_type,
        compatibility_mode: info.compatibility,
    })
}

/// Live cleanup policy a document cannot declare, e.g. `compact,delete`
fn undeclarable_cleanup_policy(actual: &TopicSnapshot) -> Option<&str> {
    actual
        .cleanup_policy()
        .filter(|policy| !DECLARABLE_CLEANUP_POLICIES.contains(policy))
}

/// Principal of the domain's producer grant on its own prefix, falling back
/// to any principal bound to the prefix
fn domain_principal(snapshot: &ClusterSnapshot, domain: &str) -> String {
    let prefix = naming::domain_resource_name(domain);
    let bindings: Vec<&AclBinding> = snapshot.acls_on(&prefix).collect();

    bindings
        .iter()
        .find(|b| b.resource_type == ResourceType::Topic && b.operation == AclOperation::Write)
        .or(bindings.first())
        .map(|b| b.principal.clone())
        .unwrap_or_else(|| {
            warn!(domain = %domain, "No owner binding found, principal left empty");
            String::new()
        })
}

/// Distinct principals bound to exactly this resource name
fn consumers_on(snapshot: &ClusterSnapshot, resource_name: &str) -> Vec<Consumer> {
    snapshot
        .acls_on(resource_name)
        .map(|b| b.principal.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(Consumer::new)
        .collect()
}
