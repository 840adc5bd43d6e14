//! In-process schema registry

use super::{RegisteredSchema, RegistryClient, RegistryError, RegistryResult};
use crate::schema::{CompatibilityChecker, CompatibilityMode, ParsedSchema};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
struct SubjectEntry {
    /// (schema id, schema), version `n` at index `n - 1`
    versions: Vec<(u32, ParsedSchema)>,
    compatibility: Option<CompatibilityMode>,
}

#[derive(Debug, Default)]
struct Inner {
    subjects: BTreeMap<String, SubjectEntry>,
    next_id: u32,
    writes: usize,
}

/// Registry double that keeps subjects in memory.
///
/// Compatibility is checked with [`CompatibilityChecker`] under the
/// subject's level, falling back to the global default (`BACKWARD`).
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    inner: RwLock<Inner>,
    global_compatibility: CompatibilityMode,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global_compatibility(mode: CompatibilityMode) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            global_compatibility: mode,
        }
    }

    /// Number of mutating calls (register, update, delete) served so far
    pub fn write_count(&self) -> usize {
        self.inner.read().writes
    }

    /// Raw content of every registered version of a subject
    pub fn versions(&self, subject: &str) -> Vec<String> {
        self.inner
            .read()
            .subjects
            .get(subject)
            .map(|entry| entry.versions.iter().map(|(_, s)| s.raw.clone()).collect())
            .unwrap_or_default()
    }

    fn subject_not_found(subject: &str) -> RegistryError {
        RegistryError::SubjectNotFound(format!("Subject '{}' not found", subject))
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn get_latest_schema(&self, subject: &str) -> RegistryResult<Option<RegisteredSchema>> {
        let inner = self.inner.read();
        let Some(entry) = inner.subjects.get(subject) else {
            return Ok(None);
        };
        Ok(entry
            .versions
            .last()
            .map(|(id, schema)| RegisteredSchema {
                subject: subject.to_string(),
                version: entry.versions.len() as u32,
                id: *id,
                schema_type: schema.schema_type,
                schema: schema.raw.clone(),
            }))
    }

    async fn get_schema(
        &self,
        subject: &str,
        version: u32,
    ) -> RegistryResult<Option<RegisteredSchema>> {
        let inner = self.inner.read();
        let registered = inner.subjects.get(subject).and_then(|entry| {
            let index = usize::try_from(version).ok()?.checked_sub(1)?;
            entry.versions.get(index)
        });
        Ok(registered.map(|(id, schema)| RegisteredSchema {
            subject: subject.to_string(),
            version,
            id: *id,
            schema_type: schema.schema_type,
            schema: schema.raw.clone(),
        }))
    }

    async fn list_subjects(&self) -> RegistryResult<BTreeSet<String>> {
        Ok(self
            .inner
            .read()
            .subjects
            .iter()
            .filter(|(_, entry)| !entry.versions.is_empty())
            .map(|(subject, _)| subject.clone())
            .collect())
    }

    async fn test_compatibility(
        &self,
        subject: &str,
        schema: &ParsedSchema,
    ) -> RegistryResult<bool> {
        let inner = self.inner.read();
        let Some(entry) = inner.subjects.get(subject) else {
            return Ok(true);
        };
        let mode = entry.compatibility.unwrap_or(self.global_compatibility);
        let existing: Vec<ParsedSchema> = entry.versions.iter().map(|(_, s)| s.clone()).collect();
        Ok(CompatibilityChecker::new(mode)
            .check(schema, &existing)
            .is_compatible)
    }

    async fn get_all_versions(&self, subject: &str) -> RegistryResult<Vec<u32>> {
        Ok(self
            .inner
            .read()
            .subjects
            .get(subject)
            .map(|entry| (1..=entry.versions.len() as u32).collect())
            .unwrap_or_default())
    }

    async fn get_version(&self, subject: &str, schema: &ParsedSchema) -> RegistryResult<u32> {
        let inner = self.inner.read();
        Ok(inner
            .subjects
            .get(subject)
            .and_then(|entry| {
                entry.versions.iter().position(|(_, s)| {
                    s.schema_type == schema.schema_type && s.canonical == schema.canonical
                })
            })
            .map(|index| index as u32 + 1)
            .unwrap_or(0))
    }

    async fn register(&self, subject: &str, schema: &ParsedSchema) -> RegistryResult<u32> {
        let mut inner = self.inner.write();
        inner.writes += 1;

        if let Some(entry) = inner.subjects.get(subject) {
            if let Some((id, _)) = entry
                .versions
                .iter()
                .find(|(_, s)| s.canonical == schema.canonical)
            {
                return Ok(*id);
            }
            let mode = entry.compatibility.unwrap_or(self.global_compatibility);
            let existing: Vec<ParsedSchema> =
                entry.versions.iter().map(|(_, s)| s.clone()).collect();
            let result = CompatibilityChecker::new(mode).check(schema, &existing);
            if !result.is_compatible {
                return Err(RegistryError::Incompatible(result.messages.join("; ")));
            }
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .subjects
            .entry(subject.to_string())
            .or_default()
            .versions
            .push((id, schema.clone()));
        Ok(id)
    }

    async fn get_compatibility(&self, subject: &str) -> RegistryResult<Option<CompatibilityMode>> {
        Ok(self
            .inner
            .read()
            .subjects
            .get(subject)
            .and_then(|entry| entry.compatibility))
    }

    async fn update_compatibility(
        &self,
        subject: &str,
        mode: CompatibilityMode,
    ) -> RegistryResult<()> {
        let mut inner = self.inner.write();
        inner.writes += 1;
        inner
            .subjects
            .entry(subject.to_string())
            .or_default()
            .compatibility = Some(mode);
        Ok(())
    }

    async fn delete_subject(&self, subject: &str) -> RegistryResult<Vec<u32>> {
        let mut inner = self.inner.write();
        let entry = inner
            .subjects
            .remove(subject)
            .ok_or_else(|| Self::subject_not_found(subject))?;
        inner.writes += 1;
        Ok((1..=entry.versions.len() as u32).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_schema, SchemaType};

    fn order_schema(extra: &str) -> ParsedSchema {
        let raw = format!(
            r#"{{"type": "record", "name": "Order", "fields": [{{"name": "id", "type": "long"}}{}]}}"#,
            extra
        );
        parse_schema(SchemaType::Avro, &raw).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = MemoryRegistry::new();
        let schema = order_schema("");
        let subject = "a.b.c.public.orders-value";

        assert_eq!(registry.get_version(subject, &schema).await.unwrap(), 0);
        assert!(registry.get_all_versions(subject).await.unwrap().is_empty());
        assert!(registry.get_latest_schema(subject).await.unwrap().is_none());

        let id = registry.register(subject, &schema).await.unwrap();
        assert_eq!(registry.get_version(subject, &schema).await.unwrap(), 1);
        assert_eq!(registry.get_all_versions(subject).await.unwrap(), vec![1]);

        let latest = registry.get_latest_schema(subject).await.unwrap().unwrap();
        assert_eq!(latest.id, id);
        assert_eq!(latest.schema_type, SchemaType::Avro);

        // re-registering an identical schema returns the same id
        assert_eq!(registry.register(subject, &schema).await.unwrap(), id);
        assert_eq!(registry.get_all_versions(subject).await.unwrap(), vec![1]);

        let first = registry.get_schema(subject, 1).await.unwrap().unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.schema, schema.raw);
        assert!(registry.get_schema(subject, 0).await.unwrap().is_none());
        assert!(registry.get_schema(subject, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_global_compatibility_fallback() {
        let subject = "a.b.c.public.orders-value";
        let breaking = order_schema(r#", {"name": "sku", "type": "string"}"#);

        let registry = MemoryRegistry::with_global_compatibility(CompatibilityMode::None);
        registry.register(subject, &order_schema("")).await.unwrap();
        assert!(registry.test_compatibility(subject, &breaking).await.unwrap());

        // a subject-level setting wins over the global default
        registry
            .update_compatibility(subject, CompatibilityMode::Backward)
            .await
            .unwrap();
        assert!(!registry.test_compatibility(subject, &breaking).await.unwrap());
    }

    #[tokio::test]
    async fn test_compatibility_gate() {
        let registry = MemoryRegistry::new();
        let subject = "a.b.c.public.orders-value";
        registry.register(subject, &order_schema("")).await.unwrap();

        let breaking = order_schema(r#", {"name": "sku", "type": "string"}"#);
        assert!(!registry.test_compatibility(subject, &breaking).await.unwrap());
        assert!(matches!(
            registry.register(subject, &breaking).await,
            Err(RegistryError::Incompatible(_))
        ));

        registry
            .update_compatibility(subject, CompatibilityMode::None)
            .await
            .unwrap();
        assert_eq!(
            registry.get_compatibility(subject).await.unwrap(),
            Some(CompatibilityMode::None)
        );
        assert!(registry.test_compatibility(subject, &breaking).await.unwrap());
        registry.register(subject, &breaking).await.unwrap();
        assert_eq!(registry.versions(subject).len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_subject() {
        let registry = MemoryRegistry::new();
        assert!(registry
            .test_compatibility("x.y.z.public.t-value", &order_schema(""))
            .await
            .unwrap());
        assert!(registry
            .get_compatibility("x.y.z.public.t-value")
            .await
            .unwrap()
            .is_none());
        let err = registry.delete_subject("x.y.z.public.t-value").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_subject() {
        let registry = MemoryRegistry::new();
        let subject = "a.b.c.public.orders-key";
        registry.register(subject, &order_schema("")).await.unwrap();
        assert_eq!(registry.delete_subject(subject).await.unwrap(), vec![1]);
        assert!(registry.list_subjects().await.unwrap().is_empty());
        assert_eq!(registry.write_count(), 2);
    }
}
