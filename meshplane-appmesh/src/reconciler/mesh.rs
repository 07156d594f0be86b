//! Mesh reconciler - converges one mesh to a desired [`ResourceSnapshot`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::diff::{DiffEngine, MarkedResources};
use super::{ReconcileReport, Reconciler};
use crate::clients::{MeshApi, Operation};
use crate::error::{ReconcileError, SnapshotError};
use crate::lister::ResourceLister;
use crate::snapshot::{MeshData, ResourceKind, ResourceSnapshot};

/// Top-level reconciler for a single mesh.
///
/// An absent mesh is created along with everything in the snapshot. An
/// existing mesh is listed and diffed against the snapshot.
#[derive(Clone)]
pub struct MeshReconciler {
    api: Arc<dyn MeshApi>,
    lister: ResourceLister,
}

impl MeshReconciler {
    pub fn new(api: Arc<dyn MeshApi>) -> Self {
        Self {
            lister: ResourceLister::new(Arc::clone(&api)),
            api,
        }
    }

    /// Whether the mesh exists. Only a NotFound answer means "no".
    pub async fn mesh_exists(&self, mesh: &str) -> Result<bool, ReconcileError> {
        Ok(self.current_mesh(mesh).await?.is_some())
    }

    async fn current_mesh(&self, mesh: &str) -> Result<Option<MeshData>, ReconcileError> {
        match self.api.describe_mesh(mesh).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(ReconcileError::operation(
                Operation::Describe,
                ResourceKind::Mesh,
                mesh,
                mesh,
                e,
            )),
        }
    }

    /// Run one reconciliation cycle for `snapshot`.
    ///
    /// The mesh spec is only applied when the mesh is created. An existing
    /// mesh whose spec differs is left as is and logged.
    #[instrument(skip(self, snapshot), fields(mesh = %snapshot.mesh_name, resources = snapshot.len()))]
    pub async fn sync(&self, snapshot: &ResourceSnapshot) -> Result<ReconcileReport, ReconcileError> {
        snapshot.validate()?;

        let mesh = snapshot.mesh_name.as_str();
        let started = Instant::now();
        let mut report = ReconcileReport::new(mesh);
        let engine = DiffEngine::new(self.api.as_ref(), mesh);

        if let Some(current) = self.current_mesh(mesh).await? {
            if current.spec != snapshot.mesh {
                warn!(
                    "Mesh {} spec differs from the snapshot; mesh specs are only applied on create",
                    mesh
                );
            }
            let existing = self.lister.list(mesh).await?;
            engine.apply(snapshot, &existing, &mut report).await?;
        } else {
            info!("Mesh {} does not exist, creating it", mesh);
            self.api
                .create_mesh(mesh, &snapshot.mesh)
                .await
                .map_err(|e| {
                    ReconcileError::operation(Operation::Create, ResourceKind::Mesh, mesh, mesh, e)
                })?;
            report.mesh_created = true;
            // Nothing exists yet, so every desired name is a create.
            engine
                .upsert(snapshot, &mut MarkedResources::default(), &mut report)
                .await?;
        }

        report.elapsed = started.elapsed();
        info!(
            "Reconciled mesh {} in {:?}: {} changes",
            mesh,
            report.elapsed,
            report.mutations()
        );
        Ok(report)
    }

    /// Delete everything under `mesh`, then the mesh itself.
    ///
    /// An absent mesh is left alone.
    #[instrument(skip(self))]
    pub async fn teardown(&self, mesh: &str) -> Result<ReconcileReport, ReconcileError> {
        let started = Instant::now();
        let mut report = ReconcileReport::new(mesh);

        if !self.mesh_exists(mesh).await? {
            info!("Mesh {} already absent", mesh);
            return Ok(report);
        }

        let existing = self.lister.list(mesh).await?;
        let engine = DiffEngine::new(self.api.as_ref(), mesh);
        engine
            .sweep(&MarkedResources::from_existing(&existing), &mut report)
            .await?;

        match self.api.delete_mesh(mesh).await {
            Ok(()) => report.mesh_deleted = true,
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(ReconcileError::operation(
                    Operation::Delete,
                    ResourceKind::Mesh,
                    mesh,
                    mesh,
                    e,
                ))
            }
        }

        report.elapsed = started.elapsed();
        info!(
            "Tore down mesh {} in {:?}: {} deletions",
            mesh,
            report.elapsed,
            report.mutations()
        );
        Ok(report)
    }
}

#[async_trait]
impl Reconciler for MeshReconciler {
    type Spec = ResourceSnapshot;
    type Status = ReconcileReport;

    async fn reconcile(&self, id: &str, spec: &Self::Spec) -> Result<Self::Status, ReconcileError> {
        if spec.mesh_name != id {
            return Err(SnapshotError::MeshMismatch {
                kind: ResourceKind::Mesh,
                name: id.to_string(),
                expected: id.to_string(),
                found: spec.mesh_name.clone(),
            }
            .into());
        }
        self.sync(spec).await
    }

    async fn finalize(&self, id: &str) -> Result<(), ReconcileError> {
        self.teardown(id).await.map(|_| ())
    }
}
