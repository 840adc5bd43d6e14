//! Validation rules, evaluated in declaration order

use super::{ValidationContext, Violation};
use crate::document::{domain_from_file_name, TopologyDocument};
use crate::model::{protocol_config_key, Consumer};
use crate::snapshot::{CLEANUP_POLICY, DECLARABLE_CLEANUP_POLICIES};
use std::collections::{BTreeMap, BTreeSet};
use validator::{Validate, ValidationErrors};

pub(super) type Rule = fn(&TopologyDocument, &ValidationContext<'_>) -> Vec<Violation>;

pub(super) const RULES: &[Rule] = &[
    field_constraints,
    file_name_matches_domain,
    unique_visibilities,
    unique_topics,
    unique_config_keys,
    consumer_domain_references,
    partitions_never_shrink,
    cleanup_policy_transition,
    schema_subject_names,
    schema_content_parses,
];

/// Name patterns, principals, partition range, config limits
fn field_constraints(document: &TopologyDocument, _: &ValidationContext<'_>) -> Vec<Violation> {
    let domain = &document.domain;
    let mut violations = Vec::new();

    if let Err(errors) = domain.validate() {
        violations.extend(field_violations(&domain.name, &errors));
    }
    if let Some(maintainer) = &domain.maintainer {
        if let Err(errors) = maintainer.validate() {
            violations.extend(field_violations(&format!("{}.maintainer", domain.name), &errors));
        }
    }

    for visibility in &domain.visibilities {
        let path = visibility.full_name(&domain.name);
        violations.extend(consumer_violations(&path, &visibility.consumers));
        for topic in &visibility.topics {
            let topic_path = format!("{}.{}", path, topic.name);
            if let Err(errors) = topic.validate() {
                violations.extend(field_violations(&topic_path, &errors));
            }
            violations.extend(consumer_violations(&topic_path, &topic.consumers));
        }
    }
    violations
}

fn consumer_violations(path: &str, consumers: &[Consumer]) -> Vec<Violation> {
    consumers
        .iter()
        .enumerate()
        .filter_map(|(i, consumer)| {
            consumer
                .validate()
                .err()
                .map(|errors| field_violations(&format!("{}.consumers[{}]", path, i), &errors))
        })
        .flatten()
        .collect()
}

fn field_violations(path: &str, errors: &ValidationErrors) -> Vec<Violation> {
    let mut violations: Vec<Violation> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            let field_path = format!("{}.{}", path, camel_case(&field));
            errs.iter().map(move |e| {
                let message = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                Violation::new(field_path.clone(), message)
            })
        })
        .collect();
    violations.sort();
    violations
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper_next = false;
    for ch in field.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// `topology-<domain>.yaml` must hold exactly `<domain>`
fn file_name_matches_domain(
    document: &TopologyDocument,
    _: &ValidationContext<'_>,
) -> Vec<Violation> {
    match domain_from_file_name(&document.file_name) {
        Some(name) if name == document.domain.name => Vec::new(),
        Some(name) => vec![Violation::new(
            &document.domain.name,
            format!(
                "file {} encodes domain '{}' but declares '{}'",
                document.file_name, name, document.domain.name
            ),
        )],
        None => vec![Violation::new(
            &document.domain.name,
            format!(
                "file {} does not follow topology-<domain>.yaml",
                document.file_name
            ),
        )],
    }
}

fn unique_visibilities(document: &TopologyDocument, _: &ValidationContext<'_>) -> Vec<Violation> {
    let mut seen = BTreeSet::new();
    document
        .domain
        .visibilities
        .iter()
        .filter(|v| !seen.insert(v.visibility_type))
        .map(|v| {
            Violation::new(
                v.full_name(&document.domain.name),
                format!("visibility '{}' is declared more than once", v.visibility_type),
            )
        })
        .collect()
}

fn unique_topics(document: &TopologyDocument, _: &ValidationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    for visibility in &document.domain.visibilities {
        let mut seen = BTreeSet::new();
        for topic in &visibility.topics {
            if !seen.insert(topic.name.as_str()) {
                violations.push(Violation::new(
                    visibility.full_name(&document.domain.name),
                    format!("topic '{}' is declared more than once", topic.name),
                ));
            }
        }
    }
    violations
}

/// `cleanupPolicy` and `cleanup.policy` name the same entry
fn unique_config_keys(document: &TopologyDocument, _: &ValidationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    for topic in document.domain.topics() {
        let mut by_protocol_key: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for key in topic.topic.config.keys() {
            by_protocol_key
                .entry(protocol_config_key(key))
                .or_default()
                .push(key);
        }
        for (protocol_key, keys) in by_protocol_key {
            if keys.len() > 1 {
                violations.push(Violation::new(
                    format!("{}.config", topic.full_name()),
                    format!("keys {} all set '{}'", keys.join(", "), protocol_key),
                ));
            }
        }
    }
    violations
}

/// A consumer naming a domain must carry that domain's principal
fn consumer_domain_references(
    document: &TopologyDocument,
    ctx: &ValidationContext<'_>,
) -> Vec<Violation> {
    let domain = &document.domain;
    let mut consumers: Vec<(String, &Consumer)> = Vec::new();
    for visibility in &domain.visibilities {
        let path = visibility.full_name(&domain.name);
        consumers.extend(visibility.consumers.iter().map(|c| (path.clone(), c)));
        for topic in &visibility.topics {
            let path = format!("{}.{}", path, topic.name);
            consumers.extend(topic.consumers.iter().map(|c| (path.clone(), c)));
        }
    }

    consumers
        .into_iter()
        .filter_map(|(path, consumer)| {
            let referenced = consumer.domain.as_deref()?;
            let sibling = ctx
                .documents
                .iter()
                .find(|d| d.domain.name == referenced);
            match sibling {
                None => Some(Violation::new(
                    format!("{}.consumers", path),
                    format!(
                        "consumer {} references domain '{}' which is not declared",
                        consumer.principal, referenced
                    ),
                )),
                Some(sibling) if sibling.domain.principal != consumer.principal => {
                    Some(Violation::new(
                        format!("{}.consumers", path),
                        format!(
                            "consumer {} does not match principal {} of domain '{}'",
                            consumer.principal, sibling.domain.principal, referenced
                        ),
                    ))
                }
                Some(_) => None,
            }
        })
        .collect()
}

/// Partition counts may only grow
fn partitions_never_shrink(
    document: &TopologyDocument,
    ctx: &ValidationContext<'_>,
) -> Vec<Violation> {
    document
        .domain
        .topics()
        .filter_map(|topic| {
            let full_name = topic.full_name();
            let actual = ctx.snapshot.topic(&full_name)?;
            (topic.topic.num_partitions < actual.partitions).then(|| {
                Violation::new(
                    format!("{}.numPartitions", full_name),
                    format!(
                        "cannot decrease partitions from {} to {}",
                        actual.partitions, topic.topic.num_partitions
                    ),
                )
            })
        })
        .collect()
}

/// `cleanup.policy` is `compact` or `delete`, and an existing topic whose
/// policy is `delete` (or unset) cannot become `compact`
fn cleanup_policy_transition(
    document: &TopologyDocument,
    ctx: &ValidationContext<'_>,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    for topic in document.domain.topics() {
        let full_name = topic.full_name();
        let config = topic.topic.protocol_config();
        let Some(declared) = config.get(CLEANUP_POLICY) else {
            continue;
        };
        let path = format!("{}.config.{}", full_name, CLEANUP_POLICY);

        if !DECLARABLE_CLEANUP_POLICIES.contains(&declared.as_str()) {
            violations.push(Violation::new(
                path,
                format!("'{}' must be either compact or delete", declared),
            ));
            continue;
        }

        if let Some(actual) = ctx.snapshot.topic(&full_name) {
            let current = actual.cleanup_policy();
            if declared == "compact" && matches!(current, None | Some("delete")) {
                violations.push(Violation::new(
                    path,
                    format!(
                        "cannot change cleanup policy from {} to compact",
                        current.unwrap_or("unset")
                    ),
                ));
            }
        }
    }
    violations
}

fn schema_subject_names(
    document: &TopologyDocument,
    _: &ValidationContext<'_>,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    for topic in document.domain.topics() {
        for (role, schema) in topic.topic.schemas() {
            let expected = topic.subject(role);
            if schema.subject != expected {
                violations.push(Violation::new(
                    format!("{}.{}Schema.subject", topic.full_name(), role),
                    format!("subject '{}' must be '{}'", schema.subject, expected),
                ));
            }
        }
    }
    violations
}

fn schema_content_parses(
    document: &TopologyDocument,
    ctx: &ValidationContext<'_>,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    for topic in document.domain.topics() {
        for (role, schema) in topic.topic.schemas() {
            if let Err(reason) = ctx.schemas.parse(&schema.subject, schema.schema_type) {
                violations.push(Violation::new(
                    format!("{}.{}Schema", topic.full_name(), role),
                    format!("{}: {}", schema.subject, reason),
                ));
            }
        }
    }
    violations
}
