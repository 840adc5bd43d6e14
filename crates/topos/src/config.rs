//! Reconciler configuration
//!
//! Loaded from an optional YAML file; every field has a default so an
//! empty file (or no file at all) is a valid configuration.

use crate::error::{Result, TopologyError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcilerConfig {
    #[validate(nested)]
    pub registry: RegistryConfig,

    /// Concurrent describe requests while taking the cluster snapshot
    #[validate(range(min = 1, max = 64))]
    pub snapshot_concurrency: usize,

    /// Topics per describe request
    #[validate(range(min = 1, max = 1000))]
    pub describe_batch_size: usize,

    /// Root of local schema files (`<schema_dir>/<domain>/<subject>.<ext>`)
    pub schema_dir: PathBuf,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            snapshot_concurrency: 4,
            describe_batch_size: 50,
            schema_dir: PathBuf::from("events"),
        }
    }
}

impl ReconcilerConfig {
    /// Read and validate a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| TopologyError::Config(e.to_string()))
    }
}

/// Schema registry connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryConfig {
    #[validate(url(message = "registry url must be a valid URL"))]
    pub url: String,

    /// Basic auth username
    pub username: Option<String>,

    /// Basic auth password
    pub password: Option<String>,

    /// Request timeout in seconds
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8081".to_string(),
            username: None,
            password: None,
            timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: ReconcilerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, ReconcilerConfig::default());
        assert_eq!(config.snapshot_concurrency, 4);
        assert_eq!(config.describe_batch_size, 50);
        assert_eq!(config.schema_dir, PathBuf::from("events"));
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topos.yaml");
        std::fs::write(
            &path,
            "registry:\n  url: https://registry.example.com\n  username: svc\n  password: secret\nsnapshotConcurrency: 8\n",
        )
        .unwrap();

        let config = ReconcilerConfig::load(&path).unwrap();
        assert_eq!(config.registry.url, "https://registry.example.com");
        assert_eq!(config.registry.username.as_deref(), Some("svc"));
        assert_eq!(config.snapshot_concurrency, 8);
        assert_eq!(config.describe_batch_size, 50);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = ReconcilerConfig {
            snapshot_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(config.check(), Err(TopologyError::Config(_))));

        let config = ReconcilerConfig {
            registry: RegistryConfig {
                url: "not a url".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.check().is_err());
    }
}
