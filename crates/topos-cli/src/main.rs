//! Topos command line
//!
//! Validates, plans, applies and restores topology documents against a
//! cluster state file and a schema registry.

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use topos::prelude::*;
use tracing::{error, info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// Declarative Kafka topology reconciler
#[derive(Parser, Debug)]
#[command(name = "topos")]
#[command(about = "Reconcile Kafka topics, ACLs and schemas against declarative documents")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TOPOS_LOG_LEVEL", default_value = "info", global = true)]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "TOPOS_LOG_JSON", default_value = "false", global = true)]
    log_json: bool,

    /// Reconciler configuration file (YAML)
    #[arg(long, env = "TOPOS_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Cluster state file; a missing file is an empty cluster
    #[arg(
        long,
        env = "TOPOS_CLUSTER_STATE",
        default_value = "cluster-state.yaml",
        global = true
    )]
    cluster_state: PathBuf,

    /// Schema registry URL, overrides the config file
    #[arg(long, env = "TOPOS_REGISTRY_URL", global = true)]
    registry_url: Option<String>,

    /// Directory holding topology-<domain>.yaml documents
    #[arg(long, env = "TOPOS_DIR", default_value = ".", global = true)]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check documents against live state
    Validate,
    /// Show what apply would do
    Plan(Scope),
    /// Converge the cluster and registry to the documents
    Apply(ApplyArgs),
    /// Rebuild documents from live state
    Restore(RestoreArgs),
}

#[derive(ClapArgs, Debug)]
struct Scope {
    /// Restrict the pass to a domain (repeatable)
    #[arg(long = "domain")]
    domains: Vec<String>,
}

#[derive(ClapArgs, Debug)]
struct ApplyArgs {
    #[command(flatten)]
    scope: Scope,

    /// Log every write instead of issuing it
    #[arg(long, env = "TOPOS_DRY_RUN")]
    dry_run: bool,

    /// Delete ACL bindings no domain justifies
    #[arg(long)]
    allow_delete_acl: bool,

    /// Delete managed topics no domain declares
    #[arg(long)]
    allow_delete_topics: bool,

    /// Delete managed subjects whose topic no domain declares
    #[arg(long)]
    allow_delete_schemas: bool,
}

#[derive(ClapArgs, Debug)]
struct RestoreArgs {
    /// Domain to restore (repeatable, at least one)
    #[arg(long = "domain", required = true)]
    domains: Vec<String>,

    /// Output directory for restore-<domain>.yaml files
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Command failed");
            let code = e
                .downcast_ref::<TopologyError>()
                .map(TopologyError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut config = match &args.config {
        Some(path) => ReconcilerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ReconcilerConfig::default(),
    };
    if let Some(url) = &args.registry_url {
        config.registry.url = url.clone();
        config.check()?;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        cluster_state = %args.cluster_state.display(),
        registry = %config.registry.url,
        "Starting topos"
    );

    let admin = Arc::new(
        MemoryClusterAdmin::load(&args.cluster_state)
            .context("Failed to load cluster state")?,
    );
    let registry = Arc::new(
        HttpRegistryClient::new(&config.registry).context("Failed to create registry client")?,
    );
    let reconciler = Reconciler::new(admin.clone(), registry, config);

    match args.command {
        Command::Validate => {
            let (documents, schemas) = load(&args.dir, &reconciler)?;
            let report = reconciler.validate(&documents, &schemas).await?;
            if report.is_valid() {
                println!("{} document(s) valid", documents.len());
                Ok(ExitCode::SUCCESS)
            } else {
                print!("{}", report);
                Err(TopologyError::Validation(report).into())
            }
        }
        Command::Plan(scope) => {
            let (documents, schemas) = load(&args.dir, &reconciler)?;
            let options = ReconcileOptions {
                dry_run: true,
                domains: scope.domains.into_iter().collect(),
                ..Default::default()
            };
            let report = reconciler.reconcile(&documents, &schemas, &options).await?;
            println!("{}", report);
            Ok(ExitCode::SUCCESS)
        }
        Command::Apply(apply) => {
            let (documents, schemas) = load(&args.dir, &reconciler)?;
            let options = ReconcileOptions {
                dry_run: apply.dry_run,
                allow_delete_acl: apply.allow_delete_acl,
                allow_delete_topics: apply.allow_delete_topics,
                allow_delete_schemas: apply.allow_delete_schemas,
                domains: apply.scope.domains.into_iter().collect(),
            };
            let report = reconciler.reconcile(&documents, &schemas, &options).await?;
            if !options.dry_run {
                admin
                    .save(&args.cluster_state)
                    .context("Failed to write cluster state")?;
            }
            println!("{}", report);
            Ok(ExitCode::SUCCESS)
        }
        Command::Restore(restore) => {
            let domains: BTreeSet<String> = restore.domains.into_iter().collect();
            let output = restore.output.unwrap_or(args.dir);
            for domain in reconciler.restore(&domains).await? {
                let path = write_restore(&output, &domain)?;
                println!("{}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load(dir: &Path, reconciler: &Reconciler) -> Result<(Vec<TopologyDocument>, LocalSchemas)> {
    let documents = load_documents(dir)
        .with_context(|| format!("Failed to read documents from {}", dir.display()))?;
    let schemas = LocalSchemas::load(&reconciler.config().schema_dir, &documents)
        .context("Failed to read schema files")?;
    Ok((documents, schemas))
}

/// Initialize logging subsystem
fn init_logging(args: &Args) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
