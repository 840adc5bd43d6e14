//! # Topos
//!
//! Reconciles a declarative description of Kafka topics, ACLs and registry
//! schemas against the live state of a cluster, and rebuilds such a
//! description from live state.
//!
//! ## Model
//!
//! Resources are named by a three-level hierarchy, `domain → visibility →
//! topic`. A domain `a.b.c` owns everything under the `a.b.c.` prefix; its
//! `public` visibility owns `a.b.c.public.`; topic `orders` in it is
//! `a.b.c.public.orders`, with schemas under `a.b.c.public.orders-key` and
//! `a.b.c.public.orders-value`. Names outside this convention are never
//! touched.
//!
//! ## Pass
//!
//! 1. **Snapshot**: topics, configs, ACLs and subjects are fetched once,
//!    concurrently, and frozen for the pass
//! 2. **Validate**: every document is checked against the snapshot and its
//!    siblings; any violation stops the pass
//! 3. **Plan**: topic, ACL and schema reconcilers compute their deltas and
//!    orphan sets
//! 4. **Apply**: creations first, then the deletions the policy allows, or
//!    a log of both under dry-run
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use topos::prelude::*;
//!
//! let reconciler = Reconciler::new(admin, registry, ReconcilerConfig::default());
//! let report = reconciler
//!     .reconcile(&documents, &schemas, &ReconcileOptions::default())
//!     .await?;
//! println!("{}", report);
//! ```
//!
//! ## Modules
//!
//! - [`model`] - declarative domain, visibility and topic types
//! - [`naming`] - resource names derived from the hierarchy and parsed back
//! - [`validation`] - document rules
//! - [`reconcile`] - topic, ACL and schema diffs
//! - [`restore`] - live state back to documents
//! - [`orchestrator`] - pass sequencing and policy
//! - [`cluster`] / [`registry`] - collaborator contracts and implementations

pub mod cluster;
pub mod config;
pub mod document;
pub mod error;
pub mod model;
pub mod naming;
pub mod orchestrator;
pub mod reconcile;
pub mod registry;
pub mod restore;
pub mod schema;
pub mod snapshot;
pub mod validation;

/// Prelude for common imports
pub mod prelude {
    pub use crate::cluster::{AclBinding, ClusterAdmin, MemoryClusterAdmin};
    pub use crate::config::{ReconcilerConfig, RegistryConfig};
    pub use crate::document::{load_documents, write_restore, LocalSchemas, TopologyDocument};
    pub use crate::error::{Result, TopologyError};
    pub use crate::model::{Domain, Topic, Visibility, VisibilityType};
    pub use crate::orchestrator::{Plan, ReconcileOptions, ReconcileReport, Reconciler};
    pub use crate::registry::{HttpRegistryClient, MemoryRegistry, RegistryClient};
    pub use crate::snapshot::ClusterSnapshot;
    pub use crate::validation::{ValidationReport, Violation};
}
