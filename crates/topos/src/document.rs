//! Topology documents and local schema files on disk
//!
//! Layout:
//!
//! ```text
//! topology-a.b.c.yaml                          one document per domain
//! restore-a.b.c.yaml                           written by restore
//! events/a.b.c/a.b.c.public.orders-value.avsc  local schema content
//! ```

use crate::error::Result;
use crate::model::Domain;
use crate::schema::{parse_schema, ParsedSchema, SchemaType};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DOCUMENT_PREFIX: &str = "topology-";
const RESTORE_PREFIX: &str = "restore-";
const DOCUMENT_EXTENSION: &str = ".yaml";

/// `topology-<domain>.yaml`
pub fn document_file_name(domain: &str) -> String {
    format!("{}{}{}", DOCUMENT_PREFIX, domain, DOCUMENT_EXTENSION)
}

/// `restore-<domain>.yaml`
pub fn restore_file_name(domain: &str) -> String {
    format!("{}{}{}", RESTORE_PREFIX, domain, DOCUMENT_EXTENSION)
}

/// Domain name encoded in a document or restore file name
pub fn domain_from_file_name(file_name: &str) -> Option<&str> {
    let stem = file_name.strip_suffix(DOCUMENT_EXTENSION)?;
    stem.strip_prefix(DOCUMENT_PREFIX)
        .or_else(|| stem.strip_prefix(RESTORE_PREFIX))
}

/// A parsed document together with the file it came from
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyDocument {
    pub file_name: String,
    pub domain: Domain,
}

impl TopologyDocument {
    /// Wrap an in-memory domain under its conventional file name
    pub fn new(domain: Domain) -> Self {
        Self {
            file_name: document_file_name(&domain.name),
            domain,
        }
    }

    pub fn from_yaml(file_name: impl Into<String>, content: &str) -> Result<Self> {
        Ok(Self {
            file_name: file_name.into(),
            domain: serde_yaml::from_str(content)?,
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.domain)?)
    }
}

/// Read a single document
pub fn load_document(path: &Path) -> Result<TopologyDocument> {
    let content = std::fs::read_to_string(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    TopologyDocument::from_yaml(file_name, &content)
}

/// Read every `topology-*.yaml` in a directory, ordered by file name
pub fn load_documents(dir: &Path) -> Result<Vec<TopologyDocument>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_document = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(DOCUMENT_PREFIX) && n.ends_with(DOCUMENT_EXTENSION));
        if is_document && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let documents = paths
        .iter()
        .map(|path| load_document(path))
        .collect::<Result<Vec<_>>>()?;
    info!(dir = %dir.display(), documents = documents.len(), "Loaded topology documents");
    Ok(documents)
}

/// Write a restored domain as `restore-<domain>.yaml` under `dir`
pub fn write_restore(dir: &Path, domain: &Domain) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(restore_file_name(&domain.name));
    std::fs::write(&path, serde_yaml::to_string(domain)?)?;
    info!(path = %path.display(), domain = %domain.name, "Wrote restore document");
    Ok(path)
}

/// Location of a subject's local schema file
pub fn schema_path(schema_dir: &Path, domain: &str, subject: &str, schema_type: SchemaType) -> PathBuf {
    schema_dir
        .join(domain)
        .join(format!("{}.{}", subject, schema_type.extension()))
}

/// Local schema content for every subject the documents reference.
///
/// A missing file is recorded as absent; validation reports it.
#[derive(Debug, Clone, Default)]
pub struct LocalSchemas {
    contents: BTreeMap<String, Option<String>>,
}

impl LocalSchemas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(schema_dir: &Path, documents: &[TopologyDocument]) -> Result<Self> {
        let mut schemas = Self::new();
        for document in documents {
            for topic in document.domain.topics() {
                for (_, schema) in topic.topic.schemas() {
                    let path = schema_path(
                        schema_dir,
                        &document.domain.name,
                        &schema.subject,
                        schema.schema_type,
                    );
                    let content = match std::fs::read_to_string(&path) {
                        Ok(content) => Some(content),
                        Err(e) if e.kind() == ErrorKind::NotFound => {
                            warn!(path = %path.display(), "Schema file not found");
                            None
                        }
                        Err(e) => return Err(e.into()),
                    };
                    schemas.contents.insert(schema.subject.clone(), content);
                }
            }
        }
        debug!(subjects = schemas.contents.len(), "Loaded local schemas");
        Ok(schemas)
    }

    pub fn insert(&mut self, subject: impl Into<String>, content: impl Into<String>) {
        self.contents.insert(subject.into(), Some(content.into()));
    }

    pub fn with(mut self, subject: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(subject, content);
        self
    }

    pub fn content(&self, subject: &str) -> Option<&str> {
        self.contents.get(subject).and_then(|c| c.as_deref())
    }

    /// Content of `subject` parsed under `schema_type`
    pub fn parse(&self, subject: &str, schema_type: SchemaType) -> std::result::Result<ParsedSchema, String> {
        let content = self
            .content(subject)
            .ok_or_else(|| format!("no local {} schema file for subject", schema_type))?;
        parse_schema(schema_type, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SchemaRef, Topic, Visibility, VisibilityType};
    use crate::schema::CompatibilityMode;

    fn domain_with_schema() -> Domain {
        let mut topic = Topic::new("orders", 1, 1);
        topic.value_schema = Some(SchemaRef {
            subject: "a.b.c.public.orders-value".to_string(),
            schema_type: SchemaType::Json,
            compatibility_mode: CompatibilityMode::Backward,
        });
        topic.key_schema = Some(SchemaRef {
            subject: "a.b.c.public.orders-key".to_string(),
            schema_type: SchemaType::Avro,
            compatibility_mode: CompatibilityMode::Backward,
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

    #[test]
    fn test_file_names() {
        assert_eq!(document_file_name("a.b.c"), "topology-a.b.c.yaml");
        assert_eq!(restore_file_name("a.b.c"), "restore-a.b.c.yaml");
        assert_eq!(domain_from_file_name("topology-a.b.c.yaml"), Some("a.b.c"));
        assert_eq!(domain_from_file_name("restore-x.y.z.yaml"), Some("x.y.z"));
        assert_eq!(domain_from_file_name("a.b.c.yaml"), None);
    }

    #[test]
    fn test_load_documents_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let document = TopologyDocument::new(domain_with_schema());
        std::fs::write(dir.path().join(&document.file_name), document.to_yaml().unwrap()).unwrap();
        std::fs::write(dir.path().join("notes.yaml"), "ignored: true").unwrap();

        let loaded = load_documents(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], document);
    }

    #[test]
    fn test_write_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_restore(&dir.path().join("out"), &domain_with_schema()).unwrap();
        assert!(path.ends_with("restore-a.b.c.yaml"));

        let reloaded = load_document(&path).unwrap();
        assert_eq!(reloaded.domain, domain_with_schema());
        assert_eq!(reloaded.file_name, "restore-a.b.c.yaml");
    }

    #[test]
    fn test_local_schemas_record_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let schema_dir = dir.path().join("events");
        std::fs::create_dir_all(schema_dir.join("a.b.c")).unwrap();
        std::fs::write(
            schema_path(&schema_dir, "a.b.c", "a.b.c.public.orders-value", SchemaType::Json),
            r#"{"type": "object"}"#,
        )
        .unwrap();

        let documents = vec![TopologyDocument::new(domain_with_schema())];
        let schemas = LocalSchemas::load(&schema_dir, &documents).unwrap();

        assert!(schemas
            .parse("a.b.c.public.orders-value", SchemaType::Json)
            .is_ok());
        assert!(schemas.content("a.b.c.public.orders-key").is_none());
        assert!(schemas
            .parse("a.b.c.public.orders-key", SchemaType::Avro)
            .is_err());
    }
}
