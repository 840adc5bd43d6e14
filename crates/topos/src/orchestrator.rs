//! Reconciliation pass orchestration
//!
//! A pass fetches one [`ClusterSnapshot`], validates every document against
//! it, asks each reconciler for its delta and applies the result: creations
//! first, then deletions of orphans the policy allows. Nothing is rolled
//! back on failure; re-running the pass converges the remainder.

use crate::cluster::{AclBinding, AclFilter, ClusterAdmin};
use crate::config::ReconcilerConfig;
use crate::document::{LocalSchemas, TopologyDocument};
use crate::error::{Result, TopologyError};
use crate::model::Domain;
use crate::reconcile::{acl, schema, topic, SchemaPlan, TopicPlan};
use crate::registry::{RegistryClient, RegistryError};
use crate::restore;
use crate::snapshot::ClusterSnapshot;
use crate::validation::{ValidationContext, ValidationReport};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Policy flags for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Compute and report everything, write nothing
    pub dry_run: bool,
    pub allow_delete_acl: bool,
    pub allow_delete_topics: bool,
    pub allow_delete_schemas: bool,
    /// Restrict the pass to these domains; empty means every document
    pub domains: BTreeSet<String>,
}

impl ReconcileOptions {
    /// Refuse deletions while only part of the topology is in scope.
    ///
    /// Orphans are computed against the domains in scope, so with a subset
    /// every resource of an out-of-scope domain would look orphaned.
    pub fn check(&self) -> Result<()> {
        if self.domains.is_empty() {
            return Ok(());
        }
        let flags: Vec<&str> = [
            (self.allow_delete_acl, "allow-delete-acl"),
            (self.allow_delete_topics, "allow-delete-topics"),
            (self.allow_delete_schemas, "allow-delete-schemas"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect();

        if flags.is_empty() {
            Ok(())
        } else {
            Err(TopologyError::PolicyViolation(format!(
                "{} cannot be combined with a domain restriction",
                flags.join(", ")
            )))
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.domains.is_empty()
    }

    fn in_scope(&self, domain: &str) -> bool {
        self.domains.is_empty() || self.domains.contains(domain)
    }
}

/// Every operation a pass intends to perform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub topics: TopicPlan,
    pub new_acls: BTreeSet<AclBinding>,
    pub schemas: SchemaPlan,
    /// Orphans are only computed when every domain is in scope
    pub orphaned_acls: BTreeSet<AclBinding>,
    pub orphaned_topics: BTreeSet<String>,
    pub orphaned_subjects: BTreeSet<String>,
}

impl Plan {
    /// Nothing to create or change; orphans are not counted
    pub fn is_converged(&self) -> bool {
        self.topics.is_empty() && self.new_acls.is_empty() && self.schemas.is_empty()
    }
}

/// Operation counts of a pass.
///
/// Under dry-run the counts are what would have been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub dry_run: bool,
    pub topics_created: usize,
    pub partitions_increased: usize,
    pub configs_altered: usize,
    pub acls_created: usize,
    pub compatibility_updated: usize,
    pub schemas_registered: usize,
    pub acls_deleted: usize,
    pub topics_deleted: usize,
    pub subjects_deleted: usize,
    /// Orphans found but kept because their delete flag was not set
    pub orphans_skipped: usize,
}

impl ReconcileReport {
    /// Total write operations
    pub fn operations(&self) -> usize {
        self.topics_created
            + self.partitions_increased
            + self.configs_altered
            + self.acls_created
            + self.compatibility_updated
            + self.schemas_registered
            + self.acls_deleted
            + self.topics_deleted
            + self.subjects_deleted
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.dry_run { " (dry-run)" } else { "" };
        writeln!(f, "Reconcile summary{}:", mode)?;
        writeln!(f, "  topics created:        {}", self.topics_created)?;
        writeln!(f, "  partitions increased:  {}", self.partitions_increased)?;
        writeln!(f, "  configs altered:       {}", self.configs_altered)?;
        writeln!(f, "  ACLs created:          {}", self.acls_created)?;
        writeln!(f, "  compatibility updated: {}", self.compatibility_updated)?;
        writeln!(f, "  schemas registered:    {}", self.schemas_registered)?;
        writeln!(f, "  ACLs deleted:          {}", self.acls_deleted)?;
        writeln!(f, "  topics deleted:        {}", self.topics_deleted)?;
        writeln!(f, "  subjects deleted:      {}", self.subjects_deleted)?;
        write!(f, "  orphans kept:          {}", self.orphans_skipped)
    }
}

/// Metrics for reconciliation passes
#[derive(Clone)]
pub struct ReconcileMetrics {
    /// Counter for passes started
    pub passes: metrics::Counter,
    /// Counter for failed passes
    pub errors: metrics::Counter,
    /// Counter for write operations applied
    pub operations_applied: metrics::Counter,
    /// Histogram for pass duration
    pub duration: metrics::Histogram,
}

impl ReconcileMetrics {
    pub fn new() -> Self {
        Self {
            passes: metrics::counter!("topos_reconcile_passes_total"),
            errors: metrics::counter!("topos_reconcile_errors_total"),
            operations_applied: metrics::counter!("topos_operations_applied_total"),
            duration: metrics::histogram!("topos_reconcile_duration_seconds"),
        }
    }
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Composition root: one cluster, one registry, one config
pub struct Reconciler {
    admin: Arc<dyn ClusterAdmin>,
    registry: Arc<dyn RegistryClient>,
    config: ReconcilerConfig,
    metrics: ReconcileMetrics,
}

impl Reconciler {
    pub fn new(
        admin: Arc<dyn ClusterAdmin>,
        registry: Arc<dyn RegistryClient>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            admin,
            registry,
            config,
            metrics: ReconcileMetrics::new(),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Fetch a fresh snapshot for one pass
    pub async fn snapshot(&self) -> Result<ClusterSnapshot> {
        ClusterSnapshot::fetch(self.admin.as_ref(), self.registry.as_ref(), &self.config).await
    }

    /// Validate documents against live state without planning anything
    #[instrument(skip_all, fields(documents = documents.len()))]
    pub async fn validate(
        &self,
        documents: &[TopologyDocument],
        schemas: &LocalSchemas,
    ) -> Result<ValidationReport> {
        let snapshot = self.snapshot().await?;
        Ok(ValidationContext::new(&snapshot, documents, schemas).validate_all())
    }

    /// Validate and compute every operation the pass would perform
    #[instrument(skip_all, fields(documents = documents.len(), dry_run = options.dry_run))]
    pub async fn plan(
        &self,
        documents: &[TopologyDocument],
        schemas: &LocalSchemas,
        options: &ReconcileOptions,
    ) -> Result<Plan> {
        options.check()?;
        let snapshot = self.snapshot().await?;
        self.plan_with(&snapshot, documents, schemas, options).await
    }

    /// Plan against an already fetched snapshot
    pub async fn plan_with(
        &self,
        snapshot: &ClusterSnapshot,
        documents: &[TopologyDocument],
        schemas: &LocalSchemas,
        options: &ReconcileOptions,
    ) -> Result<Plan> {
        ValidationContext::new(snapshot, documents, schemas)
            .validate_all()
            .into_result()?;

        let domains: Vec<&Domain> = documents
            .iter()
            .map(|d| &d.domain)
            .filter(|d| options.in_scope(&d.name))
            .collect();
        for name in &options.domains {
            if !domains.iter().any(|d| &d.name == name) {
                return Err(TopologyError::NotFound(format!(
                    "no document declares domain {}",
                    name
                )));
            }
        }

        let mut plan = Plan {
            topics: topic::plan(domains.iter().copied(), snapshot)?,
            new_acls: acl::new_bindings(domains.iter().copied(), snapshot),
            schemas: schema::plan(domains.iter().copied(), schemas, self.registry.as_ref())
                .await?,
            ..Default::default()
        };

        if options.is_partial() {
            debug!("Domain restriction active, orphan detection skipped");
        } else {
            plan.orphaned_acls = acl::orphaned_bindings(&domains, snapshot);
            plan.orphaned_topics = topic::orphaned_topics(domains.iter().copied(), snapshot);
            plan.orphaned_subjects = schema::orphaned_subjects(domains.iter().copied(), snapshot);
        }

        info!(
            create_topics = plan.topics.create.len(),
            grow_partitions = plan.topics.partitions.len(),
            alter_configs = plan.topics.configs.len(),
            create_acls = plan.new_acls.len(),
            register_schemas = plan.schemas.register.len(),
            orphaned_acls = plan.orphaned_acls.len(),
            orphaned_topics = plan.orphaned_topics.len(),
            orphaned_subjects = plan.orphaned_subjects.len(),
            "Computed plan"
        );
        Ok(plan)
    }

    /// Run one full pass: snapshot, validate, plan, apply
    #[instrument(skip_all, fields(documents = documents.len(), dry_run = options.dry_run))]
    pub async fn reconcile(
        &self,
        documents: &[TopologyDocument],
        schemas: &LocalSchemas,
        options: &ReconcileOptions,
    ) -> Result<ReconcileReport> {
        let start = Instant::now();
        self.metrics.passes.increment(1);

        let result = async {
            let plan = self.plan(documents, schemas, options).await?;
            self.apply(&plan, options).await
        }
        .await;

        self.metrics.duration.record(start.elapsed().as_secs_f64());
        match &result {
            Ok(report) => {
                if !report.dry_run {
                    self.metrics
                        .operations_applied
                        .increment(report.operations() as u64);
                }
                info!(
                    operations = report.operations(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Reconcile pass complete"
                );
            }
            Err(e) => {
                self.metrics.errors.increment(1);
                error!(error = %e, retryable = e.is_retryable(), "Reconcile pass failed");
            }
        }
        result
    }

    /// Execute a plan. Creations run before deletions; under dry-run every
    /// write is logged instead of issued.
    pub async fn apply(&self, plan: &Plan, options: &ReconcileOptions) -> Result<ReconcileReport> {
        options.check()?;
        let dry_run = options.dry_run;
        let mut report = ReconcileReport {
            dry_run,
            ..Default::default()
        };

        if !plan.topics.create.is_empty() {
            for new in &plan.topics.create {
                announce(dry_run, "create topic", &new.name);
            }
            if !dry_run {
                self.admin.create_topics(plan.topics.create.clone()).await?;
            }
            report.topics_created = plan.topics.create.len();
        }

        if !plan.topics.partitions.is_empty() {
            for (name, count) in &plan.topics.partitions {
                announce(dry_run, &format!("increase partitions to {}", count), name);
            }
            if !dry_run {
                self.admin
                    .create_partitions(plan.topics.partitions.clone())
                    .await?;
            }
            report.partitions_increased = plan.topics.partitions.len();
        }

        if !plan.topics.configs.is_empty() {
            for (name, ops) in &plan.topics.configs {
                for op in ops {
                    announce(dry_run, &format!("alter config {}", op), name);
                }
            }
            if !dry_run {
                self.admin
                    .incremental_alter_configs(plan.topics.configs.clone())
                    .await?;
            }
            report.configs_altered = plan.topics.configs.len();
        }

        if !plan.new_acls.is_empty() {
            for binding in &plan.new_acls {
                announce(dry_run, "create ACL", &binding.to_string());
            }
            if !dry_run {
                self.admin
                    .create_acls(plan.new_acls.iter().cloned().collect())
                    .await?;
            }
            report.acls_created = plan.new_acls.len();
        }

        for (subject, mode) in &plan.schemas.compatibility {
            announce(dry_run, &format!("set compatibility {}", mode), subject);
            if !dry_run {
                self.registry.update_compatibility(subject, *mode).await?;
            }
            report.compatibility_updated += 1;
        }

        for registration in &plan.schemas.register {
            announce(dry_run, "register schema", &registration.subject);
            if !dry_run {
                let id = self
                    .registry
                    .register(&registration.subject, &registration.schema)
                    .await
                    .map_err(|e| match e {
                        RegistryError::Incompatible(_) => TopologyError::IncompatibleSchema {
                            subject: registration.subject.clone(),
                        },
                        other => other.into(),
                    })?;
                debug!(subject = %registration.subject, id, "Registered schema");
            }
            report.schemas_registered += 1;
        }

        self.delete_orphans(plan, options, &mut report).await?;
        Ok(report)
    }

    async fn delete_orphans(
        &self,
        plan: &Plan,
        options: &ReconcileOptions,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let dry_run = options.dry_run;

        if options.allow_delete_acl {
            if !plan.orphaned_acls.is_empty() {
                for binding in &plan.orphaned_acls {
                    announce(dry_run, "delete ACL", &binding.to_string());
                }
                if !dry_run {
                    let filters: Vec<AclFilter> =
                        plan.orphaned_acls.iter().map(AclFilter::from).collect();
                    self.admin.delete_acls(filters).await?;
                }
                report.acls_deleted = plan.orphaned_acls.len();
            }
        } else {
            report.orphans_skipped += skip_orphans("ACL", plan.orphaned_acls.iter());
        }

        if options.allow_delete_topics {
            if !plan.orphaned_topics.is_empty() {
                for name in &plan.orphaned_topics {
                    announce(dry_run, "delete topic", name);
                }
                if !dry_run {
                    self.admin
                        .delete_topics(plan.orphaned_topics.iter().cloned().collect())
                        .await?;
                }
                report.topics_deleted = plan.orphaned_topics.len();
            }
        } else {
            report.orphans_skipped += skip_orphans("topic", plan.orphaned_topics.iter());
        }

        if options.allow_delete_schemas {
            for subject in &plan.orphaned_subjects {
                announce(dry_run, "delete subject", subject);
                if !dry_run {
                    match self.registry.delete_subject(subject).await {
                        Ok(_) => {}
                        Err(e) if e.is_not_found() => {
                            debug!(subject = %subject, "Subject already gone");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                report.subjects_deleted += 1;
            }
        } else {
            report.orphans_skipped += skip_orphans("subject", plan.orphaned_subjects.iter());
        }

        Ok(())
    }

    /// Rebuild domains from live state; `domains` must not be empty
    #[instrument(skip(self))]
    pub async fn restore(&self, domains: &BTreeSet<String>) -> Result<Vec<Domain>> {
        if domains.is_empty() {
            return Err(TopologyError::PolicyViolation(
                "restore requires at least one domain".to_string(),
            ));
        }
        let snapshot = self.snapshot().await?;
        let subjects: BTreeMap<String, restore::SubjectInfo> = restore::fetch_subjects(
            self.registry.as_ref(),
            &snapshot,
            domains,
            self.config.snapshot_concurrency,
        )
        .await?;
        let restored = restore::build(&snapshot, &subjects, domains)?;
        info!(domains = restored.len(), "Restored domains");
        Ok(restored)
    }
}

fn announce(dry_run: bool, action: &str, target: &str) {
    if dry_run {
        info!(resource = %target, "[dry-run] would {}", action);
    } else {
        info!(resource = %target, "Applying: {}", action);
    }
}

fn skip_orphans<T: fmt::Display>(kind: &str, orphans: impl Iterator<Item = T>) -> usize {
    let mut count = 0;
    for orphan in orphans {
        warn!(kind, orphan = %orphan, "Orphan kept, deletion not allowed");
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterState, MemoryClusterAdmin, TopicState};
    use crate::model::{Consumer, Topic, Visibility, VisibilityType};
    use crate::registry::MemoryRegistry;
    use crate::schema::{parse_schema, SchemaType};

    fn domain(name: &str, principal: &str) -> Domain {
        let mut topic = Topic::new("orders", 2, 1);
        topic.consumers.push(Consumer::new("User:3"));
        let mut visibility = Visibility::new(VisibilityType::Public);
        visibility.consumers.push(Consumer::new("User:2"));
        visibility.topics.push(topic);
        Domain {
            name: name.to_string(),
            description: String::new(),
            principal: principal.to_string(),
            maintainer: None,
            visibilities: vec![visibility],
        }
    }

    fn reconciler(state: ClusterState) -> (Arc<MemoryClusterAdmin>, Reconciler) {
        let admin = Arc::new(MemoryClusterAdmin::new(state));
        let reconciler = Reconciler::new(
            admin.clone(),
            Arc::new(MemoryRegistry::new()),
            ReconcilerConfig::default(),
        );
        (admin, reconciler)
    }

    #[test]
    fn test_options_check() {
        assert!(ReconcileOptions::default().check().is_ok());

        let subset = ReconcileOptions {
            domains: BTreeSet::from(["a.b.c".to_string()]),
            ..Default::default()
        };
        assert!(subset.check().is_ok());

        let unsafe_subset = ReconcileOptions {
            allow_delete_topics: true,
            ..subset.clone()
        };
        assert!(matches!(
            unsafe_subset.check(),
            Err(TopologyError::PolicyViolation(msg)) if msg.contains("allow-delete-topics")
        ));

        let schemas = ReconcileOptions {
            allow_delete_schemas: true,
            ..subset
        };
        assert!(schemas.check().is_err());
    }

    #[tokio::test]
    async fn test_apply_then_converged() {
        let (admin, reconciler) = reconciler(ClusterState::default());
        let documents = vec![TopologyDocument::new(domain("a.b.c", "User:1"))];
        let schemas = LocalSchemas::new();
        let options = ReconcileOptions::default();

        let report = reconciler
            .reconcile(&documents, &schemas, &options)
            .await
            .unwrap();
        assert_eq!(report.topics_created, 1);
        assert_eq!(report.acls_created, 12);
        assert!(admin.state().topics.contains_key("a.b.c.public.orders"));

        admin.clear_writes();
        let plan = reconciler.plan(&documents, &schemas, &options).await.unwrap();
        assert!(plan.is_converged());
        let second = reconciler.apply(&plan, &options).await.unwrap();
        assert_eq!(second.operations(), 0);
        assert!(admin.writes().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let (admin, reconciler) = reconciler(ClusterState::default());
        let documents = vec![TopologyDocument::new(domain("a.b.c", "User:1"))];
        let schemas = LocalSchemas::new();

        let dry = ReconcileOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = reconciler.reconcile(&documents, &schemas, &dry).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.topics_created, 1);
        assert_eq!(report.acls_created, 12);
        assert!(admin.writes().is_empty());
        assert!(admin.state().topics.is_empty());
    }

    #[tokio::test]
    async fn test_orphans_kept_without_flag() {
        let mut state = ClusterState::default();
        state
            .topics
            .insert("x.y.z.public.old".to_string(), TopicState::new(1, 1));
        let (admin, reconciler) = reconciler(state);
        let documents = vec![TopologyDocument::new(domain("a.b.c", "User:1"))];
        let schemas = LocalSchemas::new();

        let report = reconciler
            .reconcile(&documents, &schemas, &ReconcileOptions::default())
            .await
            .unwrap();
        assert_eq!(report.topics_deleted, 0);
        assert_eq!(report.orphans_skipped, 1);
        assert!(admin.state().topics.contains_key("x.y.z.public.old"));

        let allowed = ReconcileOptions {
            allow_delete_topics: true,
            ..Default::default()
        };
        let report = reconciler
            .reconcile(&documents, &schemas, &allowed)
            .await
            .unwrap();
        assert_eq!(report.topics_deleted, 1);
        assert!(!admin.state().topics.contains_key("x.y.z.public.old"));
    }

    #[tokio::test]
    async fn test_orphaned_subjects_deleted_with_flag() {
        let admin = Arc::new(MemoryClusterAdmin::new(ClusterState::default()));
        let registry = Arc::new(MemoryRegistry::new());
        let reconciler = Reconciler::new(
            admin.clone(),
            registry.clone(),
            ReconcilerConfig::default(),
        );
        let gone = "x.y.z.public.gone-value";
        let schema = parse_schema(SchemaType::Json, r#"{"type": "object"}"#).unwrap();
        registry.register(gone, &schema).await.unwrap();

        let documents = vec![TopologyDocument::new(domain("a.b.c", "User:1"))];
        let schemas = LocalSchemas::new();

        let kept = reconciler
            .reconcile(&documents, &schemas, &ReconcileOptions::default())
            .await
            .unwrap();
        assert_eq!(kept.subjects_deleted, 0);
        assert_eq!(kept.orphans_skipped, 1);
        assert_eq!(registry.versions(gone).len(), 1);

        let allowed = ReconcileOptions {
            allow_delete_schemas: true,
            ..Default::default()
        };
        let plan = reconciler.plan(&documents, &schemas, &allowed).await.unwrap();
        assert_eq!(plan.orphaned_subjects, BTreeSet::from([gone.to_string()]));

        let report = reconciler.apply(&plan, &allowed).await.unwrap();
        assert_eq!(report.subjects_deleted, 1);
        assert!(registry.versions(gone).is_empty());
        assert!(registry.list_subjects().await.unwrap().is_empty());

        // deleted between plan and apply: tolerated, still counted
        let again = reconciler.apply(&plan, &allowed).await.unwrap();
        assert_eq!(again.subjects_deleted, 1);
    }

    #[tokio::test]
    async fn test_subset_skips_orphans_and_unknown_domain_fails() {
        let mut state = ClusterState::default();
        state
            .topics
            .insert("x.y.z.public.old".to_string(), TopicState::new(1, 1));
        let (_, reconciler) = reconciler(state);
        let documents = vec![
            TopologyDocument::new(domain("a.b.c", "User:1")),
            TopologyDocument::new(domain("a.b.d", "User:4")),
        ];
        let schemas = LocalSchemas::new();

        let subset = ReconcileOptions {
            domains: BTreeSet::from(["a.b.c".to_string()]),
            ..Default::default()
        };
        let plan = reconciler.plan(&documents, &schemas, &subset).await.unwrap();
        assert_eq!(plan.topics.create.len(), 1);
        assert_eq!(plan.topics.create[0].name, "a.b.c.public.orders");
        assert!(plan.orphaned_topics.is_empty());
        assert!(plan.orphaned_acls.is_empty());

        let unknown = ReconcileOptions {
            domains: BTreeSet::from(["q.q.q".to_string()]),
            ..Default::default()
        };
        assert!(matches!(
            reconciler.plan(&documents, &schemas, &unknown).await,
            Err(TopologyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_documents_block_apply() {
        let (admin, reconciler) = reconciler(ClusterState::default());
        let mut broken = domain("a.b.c", "User:1");
        broken.visibilities[0].topics[0].num_partitions = 0;
        let documents = vec![TopologyDocument::new(broken)];

        let result = reconciler
            .reconcile(&documents, &LocalSchemas::new(), &ReconcileOptions::default())
            .await;
        let Err(TopologyError::Validation(report)) = result else {
            panic!("expected validation failure");
        };
        assert!(!report.is_valid());
        assert!(admin.writes().is_empty());
    }

    #[test]
    fn test_report_display() {
        let report = ReconcileReport {
            dry_run: true,
            topics_created: 2,
            ..Default::default()
        };
        let text = report.to_string();
        assert!(text.contains("(dry-run)"));
        assert!(text.contains("topics created:        2"));
        assert_eq!(report.operations(), 2);
    }
}
