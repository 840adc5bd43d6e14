//! Error types for topology reconciliation

use crate::registry::RegistryError;
use crate::validation::ValidationReport;
use thiserror::Error;

/// Errors that can occur while validating, reconciling or restoring a topology
#[derive(Error, Debug)]
pub enum TopologyError {
    /// One or more documents failed validation; nothing is applied
    #[error("Validation failed with {} violation(s)", .0.violations.len())]
    Validation(ValidationReport),

    /// A resource the pass depends on does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cluster admin call failed
    #[error("Cluster communication error: {0}")]
    ClusterCommunication(String),

    /// Schema registry call failed
    #[error("Schema registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Requested policy combination is unsafe
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// A declared partition count is lower than the cluster's
    #[error("Topic {topic} declares {declared} partitions but the cluster has {actual}")]
    PartitionDecrease {
        topic: String,
        declared: i32,
        actual: i32,
    },

    /// The registry rejected a schema under the subject's compatibility level
    #[error("Schema for subject {subject} is incompatible with the registered versions")]
    IncompatibleSchema { subject: String },

    /// Local schema content is missing or does not parse
    #[error("Invalid schema for subject {subject}: {reason}")]
    InvalidSchema { subject: String, reason: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for topology operations
pub type Result<T> = std::result::Result<T, TopologyError>;

impl TopologyError {
    /// Check if re-running the pass may succeed without changing the documents
    pub fn is_retryable(&self) -> bool {
        match self {
            TopologyError::ClusterCommunication(_) => true,
            TopologyError::Registry(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Process exit code for this error.
    ///
    /// Validation failures are distinguished from every other fatal error so
    /// automation can tell "the documents are wrong" from "the run broke".
    pub fn exit_code(&self) -> u8 {
        match self {
            TopologyError::Validation(_) => 2,
            _ => 1,
        }
    }
}
