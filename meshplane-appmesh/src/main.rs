//! meshplane-appmesh: App Mesh reconciliation daemon.
//!
//! This daemon runs next to a policy translator and:
//! - Reads the desired resource snapshot the translator writes
//! - Creates the mesh and everything in it when the mesh is absent
//! - Otherwise lists existing resources and applies the create/update/delete diff
//! - Repeats on an interval, retrying failed cycles

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshplane_appmesh::{
    AppMeshClient, AppMeshClientConfig, InMemoryMeshApi, MeshApi, MeshReconciler,
    ReconcileReport, ResourceKind, ResourceSnapshot,
};

/// meshplane App Mesh reconciler
#[derive(Parser, Debug)]
#[command(name = "meshplane-appmesh", version, about)]
struct Args {
    /// App Mesh API endpoint
    #[arg(long, default_value = "https://appmesh.us-east-1.amazonaws.com")]
    endpoint: String,

    /// Desired resource snapshot (JSON), re-read every cycle
    #[arg(long)]
    snapshot: PathBuf,

    /// Seconds between reconciliation cycles
    #[arg(long, default_value = "30")]
    interval: u64,

    /// Run a single cycle and exit with its result
    #[arg(long)]
    once: bool,

    /// Reconcile against an empty in-memory mesh store instead of the API
    #[arg(long)]
    dry_run: bool,

    /// Delete everything in the snapshot's mesh, then the mesh, and exit
    #[arg(long)]
    finalize: bool,

    /// Page size for list calls
    #[arg(long, default_value = "100")]
    page_size: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    request_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshplane_appmesh=info,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let api: Arc<dyn MeshApi> = if args.dry_run {
        info!("Dry run: reconciling against an in-memory mesh store");
        Arc::new(InMemoryMeshApi::new())
    } else {
        info!("App Mesh endpoint: {}", args.endpoint);
        Arc::new(
            AppMeshClient::new(AppMeshClientConfig {
                endpoint: args.endpoint.clone(),
                page_size: args.page_size,
                request_timeout: Duration::from_secs(args.request_timeout),
            })
            .context("Failed to create App Mesh client")?,
        )
    };
    let reconciler = MeshReconciler::new(api);

    if args.finalize {
        let snapshot = load_snapshot(&args.snapshot)?;
        let report = reconciler
            .teardown(&snapshot.mesh_name)
            .await
            .with_context(|| format!("Failed to tear down mesh {}", snapshot.mesh_name))?;
        log_report(&report);
        return Ok(());
    }

    let interval = Duration::from_secs(args.interval.max(1));
    loop {
        match run_cycle(&reconciler, &args.snapshot).await {
            Ok(report) => {
                log_report(&report);
                if args.once {
                    break;
                }
            }
            Err(e) if args.once => return Err(e),
            Err(e) => {
                error!("Reconciliation failed: {:#}. Retrying in {:?}...", e, interval);
            }
        }
        tokio::time::sleep(interval).await;
    }

    Ok(())
}

fn load_snapshot(path: &Path) -> Result<ResourceSnapshot> {
    ResourceSnapshot::from_json_file(path)
        .with_context(|| format!("Failed to load snapshot {}", path.display()))
}

async fn run_cycle(reconciler: &MeshReconciler, path: &Path) -> Result<ReconcileReport> {
    let snapshot = load_snapshot(path)?;
    if snapshot.is_empty() {
        warn!(
            "Snapshot for mesh {} is empty; existing resources will be deleted",
            snapshot.mesh_name
        );
    }
    reconciler
        .sync(&snapshot)
        .await
        .with_context(|| format!("Failed to reconcile mesh {}", snapshot.mesh_name))
}

fn log_report(report: &ReconcileReport) {
    info!(
        "Cycle for mesh {} started {} took {:?}",
        report.mesh_name,
        report.started_at.to_rfc3339(),
        report.elapsed
    );
    if report.mesh_created {
        info!("Created mesh {}", report.mesh_name);
    }
    if report.mesh_deleted {
        info!("Deleted mesh {}", report.mesh_name);
    }
    for kind in [
        ResourceKind::VirtualNode,
        ResourceKind::VirtualRouter,
        ResourceKind::Route,
        ResourceKind::VirtualService,
    ] {
        let changes = report.changes(kind);
        if !changes.is_empty() {
            info!(
                "{}: {} created, {} updated, {} deleted",
                kind,
                changes.created.len(),
                changes.updated.len(),
                changes.deleted.len()
            );
        }
    }
}
