//! Schema reconciliation against the registry

use crate::document::LocalSchemas;
use crate::error::{Result, TopologyError};
use crate::model::Domain;
use crate::naming::SubjectPath;
use crate::registry::RegistryClient;
use crate::schema::{parse_schema, CompatibilityChecker, CompatibilityMode, ParsedSchema};
use crate::snapshot::ClusterSnapshot;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A schema that must be registered under its subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRegistration {
    pub subject: String,
    pub schema: ParsedSchema,
}

/// Everything needed to converge declared schemas
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaPlan {
    /// Subject-level compatibility to set before registering
    pub compatibility: BTreeMap<String, CompatibilityMode>,
    pub register: Vec<SchemaRegistration>,
    /// Subjects whose declared schema is already registered
    pub unchanged: BTreeSet<String>,
}

impl SchemaPlan {
    pub fn is_empty(&self) -> bool {
        self.compatibility.is_empty() && self.register.is_empty()
    }
}

/// Diff declared schemas against the registry.
///
/// Local content is re-parsed; a schema that does not parse fails with
/// [`TopologyError::InvalidSchema`]. A schema the registry reports as
/// incompatible fails with [`TopologyError::IncompatibleSchema`]. When the
/// subject's compatibility level is about to change, the registry would
/// still judge under the old level, so the registered versions are fetched
/// and checked locally under the declared one.
pub async fn plan<'a>(
    domains: impl IntoIterator<Item = &'a Domain>,
    schemas: &LocalSchemas,
    registry: &dyn RegistryClient,
) -> Result<SchemaPlan> {
    let mut plan = SchemaPlan::default();

    for domain in domains {
        for topic in domain.topics() {
            for (_, declared) in topic.topic.schemas() {
                let subject = declared.subject.clone();
                let parsed = schemas
                    .parse(&subject, declared.schema_type)
                    .map_err(|reason| TopologyError::InvalidSchema {
                        subject: subject.clone(),
                        reason,
                    })?;

                let current_mode = registry.get_compatibility(&subject).await?;
                let mode_changes = current_mode != Some(declared.compatibility_mode);
                if mode_changes {
                    plan.compatibility
                        .insert(subject.clone(), declared.compatibility_mode);
                }

                if registry.get_version(&subject, &parsed).await? > 0 {
                    debug!(subject = %subject, "Schema already registered");
                    plan.unchanged.insert(subject);
                    continue;
                }

                let compatible = if mode_changes {
                    compatible_under(registry, &subject, &parsed, declared.compatibility_mode)
                        .await?
                } else {
                    registry.test_compatibility(&subject, &parsed).await?
                };
                if !compatible {
                    return Err(TopologyError::IncompatibleSchema { subject });
                }

                plan.register.push(SchemaRegistration {
                    subject,
                    schema: parsed,
                });
            }
        }
    }

    Ok(plan)
}

async fn compatible_under(
    registry: &dyn RegistryClient,
    subject: &str,
    schema: &ParsedSchema,
    mode: CompatibilityMode,
) -> Result<bool> {
    let mut existing = Vec::new();
    for version in registry.get_all_versions(subject).await? {
        let Some(registered) = registry.get_schema(subject, version).await? else {
            continue;
        };
        let parsed = parse_schema(registered.schema_type, &registered.schema).map_err(|reason| {
            TopologyError::InvalidSchema {
                subject: format!("{} (version {})", subject, version),
                reason,
            }
        })?;
        existing.push(parsed);
    }

    let result = CompatibilityChecker::new(mode).check(schema, &existing);
    if !result.is_compatible {
        debug!(
            subject = %subject,
            compatibility = %mode,
            messages = ?result.messages,
            "Incompatible under declared level"
        );
    }
    Ok(result.is_compatible)
}

/// Managed registry subjects whose topic no domain declares
pub fn orphaned_subjects<'a>(
    domains: impl IntoIterator<Item = &'a Domain>,
    snapshot: &ClusterSnapshot,
) -> BTreeSet<String> {
    let declared: BTreeSet<String> = domains
        .into_iter()
        .flat_map(|d| d.topics().map(|t| t.full_name()))
        .collect();

    snapshot
        .subjects
        .iter()
        .filter(|subject| {
            SubjectPath::parse(subject)
                .is_some_and(|path| !declared.contains(&path.topic.full_name()))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SchemaRef, Topic, Visibility, VisibilityType};
    use crate::registry::MemoryRegistry;
    use crate::schema::SchemaType;

    const V1: &str =
        r#"{"type": "record", "name": "Order", "fields": [{"name": "id", "type": "long"}]}"#;
    const V2_BREAKING: &str = r#"{"type": "record", "name": "Order", "fields": [{"name": "id", "type": "long"}, {"name": "sku", "type": "string"}]}"#;
    const SUBJECT: &str = "a.b.c.public.orders-value";

    fn domain(mode: CompatibilityMode) -> Domain {
        let mut topic = Topic::new("orders", 1, 1);
        topic.value_schema = Some(SchemaRef {
            subject: SUBJECT.to_string(),
            schema_type: SchemaType::Avro,
            compatibility_mode: mode,
        });
        let mut visibility = Visibility::new(VisibilityType::Public);
        visibility.topics.push(topic);
        Domain {
            name: "a.b.c".to_string(),
            description: String::new(),
            principal: "User:1".to_string(),
            maintainer: None,
            visibilities: vec![visibility],
        }
    }

    #[tokio::test]
    async fn test_new_subject_is_registered() {
        let registry = MemoryRegistry::new();
        let schemas = LocalSchemas::new().with(SUBJECT, V1);
        let d = domain(CompatibilityMode::Backward);

        let plan = plan([&d], &schemas, &registry).await.unwrap();
        assert_eq!(plan.register.len(), 1);
        assert_eq!(plan.register[0].subject, SUBJECT);
        assert_eq!(
            plan.compatibility,
            BTreeMap::from([(SUBJECT.to_string(), CompatibilityMode::Backward)])
        );
    }

    #[tokio::test]
    async fn test_identical_version_skipped() {
        let registry = MemoryRegistry::new();
        registry
            .update_compatibility(SUBJECT, CompatibilityMode::Backward)
            .await
            .unwrap();
        registry
            .register(SUBJECT, &parse_schema(SchemaType::Avro, V1).unwrap())
            .await
            .unwrap();

        // whitespace differences do not matter
        let schemas = LocalSchemas::new().with(SUBJECT, V1.replace(", ", ",  "));
        let plan = plan([&domain(CompatibilityMode::Backward)], &schemas, &registry)
            .await
            .unwrap();
        assert!(plan.is_empty());
        assert!(plan.unchanged.contains(SUBJECT));
    }

    #[tokio::test]
    async fn test_incompatible_schema_is_fatal() {
        let registry = MemoryRegistry::new();
        registry
            .update_compatibility(SUBJECT, CompatibilityMode::Backward)
            .await
            .unwrap();
        registry
            .register(SUBJECT, &parse_schema(SchemaType::Avro, V1).unwrap())
            .await
            .unwrap();

        let schemas = LocalSchemas::new().with(SUBJECT, V2_BREAKING);
        let result = plan([&domain(CompatibilityMode::Backward)], &schemas, &registry).await;
        assert!(matches!(
            result,
            Err(TopologyError::IncompatibleSchema { subject }) if subject == SUBJECT
        ));

        // a relaxed level is judged under that level, not the registered one
        let relaxed = plan([&domain(CompatibilityMode::None)], &schemas, &registry)
            .await
            .unwrap();
        assert_eq!(relaxed.register.len(), 1);
        assert_eq!(relaxed.compatibility[SUBJECT], CompatibilityMode::None);
    }

    #[tokio::test]
    async fn test_stricter_level_checked_before_registration() {
        let registry = MemoryRegistry::new();
        registry
            .update_compatibility(SUBJECT, CompatibilityMode::Backward)
            .await
            .unwrap();
        registry
            .register(SUBJECT, &parse_schema(SchemaType::Avro, V1).unwrap())
            .await
            .unwrap();
        let writes = registry.write_count();

        let schemas = LocalSchemas::new().with(SUBJECT, V2_BREAKING);
        let result = plan(
            [&domain(CompatibilityMode::FullTransitive)],
            &schemas,
            &registry,
        )
        .await;
        assert!(matches!(
            result,
            Err(TopologyError::IncompatibleSchema { subject }) if subject == SUBJECT
        ));
        assert_eq!(registry.write_count(), writes);

        // an optional field passes under the stricter level
        let additive = r#"{"type": "record", "name": "Order", "fields": [{"name": "id", "type": "long"}, {"name": "sku", "type": ["null", "string"], "default": null}]}"#;
        let schemas = LocalSchemas::new().with(SUBJECT, additive);
        let plan = plan(
            [&domain(CompatibilityMode::FullTransitive)],
            &schemas,
            &registry,
        )
        .await
        .unwrap();
        assert_eq!(plan.register.len(), 1);
        assert_eq!(plan.compatibility[SUBJECT], CompatibilityMode::FullTransitive);
    }

    #[tokio::test]
    async fn test_unparseable_schema_is_fatal() {
        let registry = MemoryRegistry::new();
        let schemas = LocalSchemas::new().with(SUBJECT, "{not avro");
        let result = plan([&domain(CompatibilityMode::Backward)], &schemas, &registry).await;
        assert!(matches!(result, Err(TopologyError::InvalidSchema { .. })));
        assert_eq!(registry.write_count(), 0);
    }

    #[test]
    fn test_orphaned_subjects() {
        let snapshot = ClusterSnapshot::default().with_subjects([
            SUBJECT,
            "a.b.c.public.orders-key",
            "a.b.c.public.old-value",
            "x.y.z.test.gone-key",
            "legacy-subject",
        ]);
        let orphans = orphaned_subjects([&domain(CompatibilityMode::Backward)], &snapshot);
        assert_eq!(
            orphans,
            BTreeSet::from([
                "a.b.c.public.old-value".to_string(),
                "x.y.z.test.gone-key".to_string()
            ])
        );
    }
}
