//! Access-control reconciliation
//!
//! Desired bindings per domain:
//!
//! | Scope | Pattern | Resource | Operations |
//! |-------|---------|----------|------------|
//! | Domain owner | prefixed | `<domain>.` | TOPIC/WRITE, TRANSACTIONAL_ID/WRITE, TOPIC/DESCRIBE, TOPIC/READ, GROUP/READ |
//! | Domain owner | literal | `kafka-cluster` | CLUSTER/IDEMPOTENT_WRITE |
//! | Visibility consumer | prefixed | `<domain>.<type>.` | TOPIC/DESCRIBE, TOPIC/READ, GROUP/READ |
//! | Topic consumer | literal | `<domain>.<type>.<topic>` | TOPIC/DESCRIBE, TOPIC/READ, GROUP/READ |

use crate::cluster::{AclBinding, AclOperation, AclPermission, PatternType, ResourceType};
use crate::model::Domain;
use crate::naming::managed_domain;
use crate::snapshot::ClusterSnapshot;
use std::collections::{BTreeMap, BTreeSet};

const CONSUMER_GRANTS: [(ResourceType, AclOperation); 3] = [
    (ResourceType::Topic, AclOperation::Describe),
    (ResourceType::Topic, AclOperation::Read),
    (ResourceType::Group, AclOperation::Read),
];

const PRODUCER_GRANTS: [(ResourceType, AclOperation); 2] = [
    (ResourceType::Topic, AclOperation::Write),
    (ResourceType::TransactionalId, AclOperation::Write),
];

fn consumer_bindings(
    resource_name: &str,
    pattern_type: PatternType,
    principal: &str,
) -> impl Iterator<Item = AclBinding> {
    let resource_name = resource_name.to_string();
    let principal = principal.to_string();
    CONSUMER_GRANTS
        .into_iter()
        .map(move |(resource_type, operation)| AclBinding {
            resource_type,
            resource_name: resource_name.clone(),
            pattern_type,
            principal: principal.clone(),
            operation,
            permission: AclPermission::Allow,
        })
}

/// The six bindings owned by a domain's principal
pub fn domain_owner_bindings(domain: &Domain) -> BTreeSet<AclBinding> {
    let prefix = domain.resource_name();
    let mut bindings: BTreeSet<AclBinding> = PRODUCER_GRANTS
        .into_iter()
        .map(|(resource_type, operation)| {
            AclBinding::prefixed(resource_type, prefix.clone(), domain.principal.clone(), operation)
        })
        .collect();
    bindings.extend(consumer_bindings(&prefix, PatternType::Prefixed, &domain.principal));
    bindings.insert(AclBinding::cluster_idempotent_write(domain.principal.clone()));
    bindings
}

/// Every binding the given domains justify
pub fn desired_bindings<'a>(domains: impl IntoIterator<Item = &'a Domain>) -> BTreeSet<AclBinding> {
    let mut bindings = BTreeSet::new();
    for domain in domains {
        bindings.extend(domain_owner_bindings(domain));
        for visibility in &domain.visibilities {
            let prefix = visibility.resource_name(&domain.name);
            for principal in visibility.consumer_principals() {
                bindings.extend(consumer_bindings(&prefix, PatternType::Prefixed, principal));
            }
        }
        for topic in domain.topics() {
            let name = topic.full_name();
            for principal in topic.topic.consumer_principals() {
                bindings.extend(consumer_bindings(&name, PatternType::Literal, principal));
            }
        }
    }
    bindings
}

/// Desired bindings missing from the snapshot
pub fn new_bindings<'a>(
    domains: impl IntoIterator<Item = &'a Domain>,
    snapshot: &ClusterSnapshot,
) -> BTreeSet<AclBinding> {
    desired_bindings(domains)
        .into_iter()
        .filter(|binding| !snapshot.acls.contains(binding))
        .collect()
}

/// What a managed resource name refers to within a present domain
enum Scope<'a> {
    Domain(&'a Domain),
    Visibility(BTreeSet<&'a str>),
    Topic(BTreeSet<&'a str>),
    Undeclared,
}

/// Scope of a managed-form name under its owning domain
fn classify<'a>(domain: &'a Domain, resource_name: &str) -> Scope<'a> {
    if resource_name == domain.resource_name() {
        return Scope::Domain(domain);
    }
    for visibility in &domain.visibilities {
        if resource_name == visibility.resource_name(&domain.name) {
            return Scope::Visibility(visibility.consumer_principals());
        }
    }
    for topic in domain.topics() {
        if resource_name == topic.full_name() {
            return Scope::Topic(topic.topic.consumer_principals());
        }
    }
    Scope::Undeclared
}

/// Bindings no longer justified by the given domains.
///
/// * on a present domain's prefix, held by anyone but its current principal
/// * on a present visibility or topic, held by a principal that is no
///   longer one of its consumers
/// * on a visibility or topic name of a present domain that is no longer
///   declared
/// * on any resource of a domain that is absent from the set
///
/// A stale principal found by the first or last case also loses its
/// cluster-level idempotent-write binding, unless it is still the principal
/// of a domain in the set. Only names in a managed form are considered:
/// other dotted names that merely start like a domain are left alone.
pub fn orphaned_bindings(domains: &[&Domain], snapshot: &ClusterSnapshot) -> BTreeSet<AclBinding> {
    let by_name: BTreeMap<&str, &Domain> = domains.iter().map(|d| (d.name.as_str(), *d)).collect();
    let active_principals: BTreeSet<&str> = domains.iter().map(|d| d.principal.as_str()).collect();

    let mut orphans = BTreeSet::new();
    let mut stale_principals = BTreeSet::new();

    for binding in &snapshot.acls {
        let Some(domain_name) = managed_domain(&binding.resource_name) else {
            continue;
        };

        let Some(domain) = by_name.get(domain_name) else {
            orphans.insert(binding.clone());
            stale_principals.insert(binding.principal.as_str());
            continue;
        };

        match classify(domain, &binding.resource_name) {
            Scope::Domain(domain) if binding.principal != domain.principal => {
                orphans.insert(binding.clone());
                stale_principals.insert(binding.principal.as_str());
            }
            Scope::Visibility(consumers) | Scope::Topic(consumers)
                if !consumers.contains(binding.principal.as_str()) =>
            {
                orphans.insert(binding.clone());
            }
            Scope::Undeclared => {
                orphans.insert(binding.clone());
            }
            _ => {}
        }
    }

    for principal in stale_principals {
        if active_principals.contains(principal) {
            continue;
        }
        let cluster_binding = AclBinding::cluster_idempotent_write(principal);
        if snapshot.acls.contains(&cluster_binding) {
            orphans.insert(cluster_binding);
        }
    }

    orphans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Consumer, Topic, Visibility, VisibilityType};

    fn domain(name: &str, principal: &str) -> Domain {
        Domain {
            name: name.to_string(),
            description: String::new(),
            principal: principal.to_string(),
            maintainer: None,
            visibilities: vec![],
        }
    }

    fn domain_with_consumers() -> Domain {
        let mut topic = Topic::new("t", 1, 1);
        topic.consumers.push(Consumer::new("User:3"));
        let mut visibility = Visibility::new(VisibilityType::Public);
        visibility.consumers.push(Consumer::new("User:2"));
        visibility.topics.push(topic);
        let mut d = domain("a.b.c", "User:1");
        d.visibilities.push(visibility);
        d
    }

    #[test]
    fn test_domain_owner_bindings() {
        let bindings = domain_owner_bindings(&domain("a.b.c", "User:1"));
        assert_eq!(bindings.len(), 6);
        assert!(bindings.contains(&AclBinding::cluster_idempotent_write("User:1")));
        assert!(bindings.contains(&AclBinding::prefixed(
            ResourceType::TransactionalId,
            "a.b.c.",
            "User:1",
            AclOperation::Write
        )));
        assert_eq!(
            bindings
                .iter()
                .filter(|b| b.pattern_type == PatternType::Prefixed)
                .count(),
            5
        );
    }

    #[test]
    fn test_new_bindings_complete() {
        let d = domain_with_consumers();
        let bindings = new_bindings([&d], &ClusterSnapshot::default());
        assert_eq!(bindings.len(), 12);

        let visibility: Vec<_> = bindings
            .iter()
            .filter(|b| b.resource_name == "a.b.c.public.")
            .collect();
        assert_eq!(visibility.len(), 3);
        assert!(visibility
            .iter()
            .all(|b| b.principal == "User:2" && b.pattern_type == PatternType::Prefixed));

        let topic: Vec<_> = bindings
            .iter()
            .filter(|b| b.resource_name == "a.b.c.public.t")
            .collect();
        assert_eq!(topic.len(), 3);
        assert!(topic
            .iter()
            .all(|b| b.principal == "User:3" && b.pattern_type == PatternType::Literal));
    }

    #[test]
    fn test_existing_bindings_excluded() {
        let d = domain_with_consumers();
        let snapshot = ClusterSnapshot::default().with_acls(desired_bindings([&d]));
        assert!(new_bindings([&d], &snapshot).is_empty());
        assert!(orphaned_bindings(&[&d], &snapshot).is_empty());
    }

    #[test]
    fn test_removed_domain_orphans() {
        let c = domain("a.b.c", "User:1");
        let d = domain("a.b.d", "User:2");
        let e = domain("a.b.e", "User:5");
        let snapshot = ClusterSnapshot::default().with_acls(desired_bindings([&c, &d, &e]));

        let orphans = orphaned_bindings(&[&c, &d], &snapshot);
        assert_eq!(orphans.len(), 6);
        assert!(orphans.iter().all(|b| b.principal == "User:5"));
        assert!(orphans.contains(&AclBinding::cluster_idempotent_write("User:5")));
    }

    #[test]
    fn test_principal_rotation() {
        let old = domain("a.b.c", "User:1");
        let rotated = domain("a.b.c", "User:7");
        let snapshot = ClusterSnapshot::default().with_acls(desired_bindings([&old]));

        let orphans = orphaned_bindings(&[&rotated], &snapshot);
        assert_eq!(orphans.len(), 6);
        assert!(orphans.iter().all(|b| b.principal == "User:1"));

        let new = new_bindings([&rotated], &snapshot);
        assert_eq!(new.len(), 6);
        assert!(new.iter().all(|b| b.principal == "User:7"));
    }

    #[test]
    fn test_cluster_binding_kept_for_active_principal() {
        // User:1 owns a.b.c and still holds a stale grant on a removed domain
        let c = domain("a.b.c", "User:1");
        let mut snapshot = ClusterSnapshot::default().with_acls(desired_bindings([&c]));
        snapshot.acls.insert(AclBinding::prefixed(
            ResourceType::Topic,
            "x.y.z.",
            "User:1",
            AclOperation::Write,
        ));

        let orphans = orphaned_bindings(&[&c], &snapshot);
        assert_eq!(orphans.len(), 1);
        assert!(!orphans.contains(&AclBinding::cluster_idempotent_write("User:1")));
    }

    #[test]
    fn test_removed_consumers_and_resources() {
        let declared = domain_with_consumers();
        let mut snapshot = ClusterSnapshot::default().with_acls(desired_bindings([&declared]));

        // consumer dropped from the visibility
        snapshot
            .acls
            .extend(consumer_bindings("a.b.c.public.", PatternType::Prefixed, "User:4"));
        // topic no longer declared
        snapshot
            .acls
            .extend(consumer_bindings("a.b.c.public.gone", PatternType::Literal, "User:3"));
        // visibility no longer declared
        snapshot
            .acls
            .extend(consumer_bindings("a.b.c.private.", PatternType::Prefixed, "User:2"));

        let orphans = orphaned_bindings(&[&declared], &snapshot);
        assert_eq!(orphans.len(), 9);
        assert!(orphans.iter().all(|b| b.resource_name != "a.b.c."));
        assert!(!orphans.iter().any(|b| b.is_cluster_binding()));
    }

    #[test]
    fn test_unmanaged_bindings_ignored() {
        let c = domain("a.b.c", "User:1");
        let mut snapshot = ClusterSnapshot::default().with_acls(desired_bindings([&c]));
        snapshot.acls.insert(AclBinding::literal(
            ResourceType::Group,
            "legacy-consumers",
            "User:9",
            AclOperation::Read,
        ));
        snapshot.acls.insert(AclBinding::cluster_idempotent_write("User:9"));
        assert!(orphaned_bindings(&[&c], &snapshot).is_empty());
    }

    #[test]
    fn test_unmanaged_dotted_names_ignored() {
        let c = domain("a.b.c", "User:1");
        let mut snapshot = ClusterSnapshot::default().with_acls(desired_bindings([&c]));
        // shaped like a topic of an absent domain, but with a fourth segment
        snapshot.acls.insert(AclBinding::literal(
            ResourceType::Topic,
            "payments.ledger.events.v2",
            "User:9",
            AclOperation::Read,
        ));
        snapshot.acls.insert(AclBinding::literal(
            ResourceType::Group,
            "billing.app.consumers",
            "User:9",
            AclOperation::Read,
        ));
        // same shape under a present domain
        snapshot.acls.insert(AclBinding::literal(
            ResourceType::Topic,
            "a.b.c.public.orders.v2",
            "User:9",
            AclOperation::Read,
        ));
        snapshot.acls.insert(AclBinding::cluster_idempotent_write("User:9"));
        assert!(orphaned_bindings(&[&c], &snapshot).is_empty());

        // a real prefix of the absent domain is still orphaned, with its principal
        snapshot.acls.insert(AclBinding::prefixed(
            ResourceType::Topic,
            "payments.ledger.events.",
            "User:9",
            AclOperation::Write,
        ));
        let orphans = orphaned_bindings(&[&c], &snapshot);
        assert_eq!(orphans.len(), 2);
        assert!(orphans.contains(&AclBinding::cluster_idempotent_write("User:9")));
    }
}
