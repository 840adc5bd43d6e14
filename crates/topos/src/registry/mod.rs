//! Schema registry client contract
//!
//! Subjects follow `<topic full name>-key` / `-value`. "Subject not found"
//! is its own error variant; the contract methods below already fold it
//! into an absent value wherever absence is meaningful (no versions, no
//! subject-level compatibility, unmatched schema).

mod http;
mod memory;

pub use http::HttpRegistryClient;
pub use memory::MemoryRegistry;

use crate::schema::{CompatibilityMode, ParsedSchema, SchemaType};
use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

/// Registry client errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    #[error("Version not found: {0}")]
    VersionNotFound(String),

    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    #[error("Incompatible schema: {0}")]
    Incompatible(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RegistryError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SubjectNotFound(_) | Self::VersionNotFound(_) | Self::SchemaNotFound(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::Network(err.to_string())
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// One registered version of a subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredSchema {
    pub subject: String,
    pub version: u32,
    pub id: u32,
    pub schema_type: SchemaType,
    pub schema: String,
}

/// Schema registry capability
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// `None` when the subject does not exist
    async fn get_latest_schema(&self, subject: &str) -> RegistryResult<Option<RegisteredSchema>>;

    /// `None` when the subject or the version does not exist
    async fn get_schema(
        &self,
        subject: &str,
        version: u32,
    ) -> RegistryResult<Option<RegisteredSchema>>;

    async fn list_subjects(&self) -> RegistryResult<BTreeSet<String>>;

    /// A subject with no versions accepts any schema
    async fn test_compatibility(&self, subject: &str, schema: &ParsedSchema)
        -> RegistryResult<bool>;

    /// Empty when the subject does not exist
    async fn get_all_versions(&self, subject: &str) -> RegistryResult<Vec<u32>>;

    /// Version already holding this schema, 0 if none does
    async fn get_version(&self, subject: &str, schema: &ParsedSchema) -> RegistryResult<u32>;

    /// Register and return the schema id
    async fn register(&self, subject: &str, schema: &ParsedSchema) -> RegistryResult<u32>;

    /// Subject-level compatibility; `None` when only the global default applies
    async fn get_compatibility(&self, subject: &str) -> RegistryResult<Option<CompatibilityMode>>;

    async fn update_compatibility(&self, subject: &str, mode: CompatibilityMode)
        -> RegistryResult<()>;

    /// Returns the deleted versions
    async fn delete_subject(&self, subject: &str) -> RegistryResult<Vec<u32>>;
}
