//! Topology validation
//!
//! Every rule is a plain function from a document and a read-only
//! [`ValidationContext`] to a list of [`Violation`]s. Rules run in a fixed
//! order and never short-circuit, so one pass reports everything that is
//! wrong with a document. Any violation blocks the apply for the whole
//! pass.

mod rules;

use crate::document::{LocalSchemas, TopologyDocument};
use crate::error::{Result, TopologyError};
use crate::snapshot::ClusterSnapshot;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// A single rule violation, addressed by a dotted path into the document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Outcome of validating one or more documents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.violations.extend(other.violations);
    }

    /// `Err(TopologyError::Validation)` unless the report is clean
    pub fn into_result(self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(TopologyError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for violation in &self.violations {
            writeln!(f, "{}", violation)?;
        }
        Ok(())
    }
}

/// Read-only inputs shared by every rule
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Actual cluster state, for partition and cleanup-policy transitions
    pub snapshot: &'a ClusterSnapshot,
    /// Every document processed in this pass, including the one validated
    pub documents: &'a [TopologyDocument],
    pub schemas: &'a LocalSchemas,
}

impl<'a> ValidationContext<'a> {
    pub fn new(
        snapshot: &'a ClusterSnapshot,
        documents: &'a [TopologyDocument],
        schemas: &'a LocalSchemas,
    ) -> Self {
        Self {
            snapshot,
            documents,
            schemas,
        }
    }

    /// Run every rule against one document
    pub fn validate_document(&self, document: &TopologyDocument) -> ValidationReport {
        let violations: Vec<Violation> = rules::RULES
            .iter()
            .flat_map(|rule| rule(document, self))
            .collect();

        for violation in &violations {
            warn!(file = %document.file_name, path = %violation.path, "{}", violation.message);
        }
        debug!(
            file = %document.file_name,
            violations = violations.len(),
            "Validated document"
        );
        ValidationReport { violations }
    }

    /// Validate every document in the context, plus cross-document rules
    pub fn validate_all(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        let mut files_by_domain: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for document in self.documents {
            files_by_domain
                .entry(document.domain.name.as_str())
                .or_default()
                .push(document.file_name.as_str());
        }
        for (domain, files) in files_by_domain {
            if files.len() > 1 {
                report.violations.push(Violation::new(
                    domain,
                    format!("domain is declared by more than one document: {}", files.join(", ")),
                ));
            }
        }

        for document in self.documents {
            report.extend(self.validate_document(document));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Domain;

    fn document(file_name: &str, name: &str) -> TopologyDocument {
        TopologyDocument {
            file_name: file_name.to_string(),
            domain: Domain {
                name: name.to_string(),
                description: String::new(),
                principal: "User:1".to_string(),
                maintainer: None,
                visibilities: vec![],
            },
        }
    }

    #[test]
    fn test_report_into_result() {
        assert!(ValidationReport::default().into_result().is_ok());

        let report = ValidationReport {
            violations: vec![Violation::new("a.b.c", "broken")],
        };
        assert_eq!(report.to_string(), "a.b.c: broken\n");
        assert!(matches!(
            report.into_result(),
            Err(TopologyError::Validation(_))
        ));
    }

    #[test]
    fn test_duplicate_domains_across_documents() {
        let documents = vec![
            document("topology-a.b.c.yaml", "a.b.c"),
            document("restore-a.b.c.yaml", "a.b.c"),
        ];
        let snapshot = ClusterSnapshot::default();
        let schemas = LocalSchemas::new();
        let report = ValidationContext::new(&snapshot, &documents, &schemas).validate_all();

        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].path, "a.b.c");
        assert!(report.violations[0].message.contains("more than one document"));
    }
}
