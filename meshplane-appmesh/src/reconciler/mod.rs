//! Reconcilers for App Mesh resources.
//!
//! Each reconciler compares desired state (a snapshot from a translator) with
//! actual state (from the mesh control API) and takes actions to converge.

pub mod diff;
pub mod mesh;

pub use mesh::MeshReconciler;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ReconcileError;
use crate::snapshot::ResourceKind;

/// Trait for resource reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// The desired state handed in by the caller.
    type Spec: Send + Sync;
    /// The outcome reported back.
    type Status;

    /// Reconcile the resource - compare desired vs actual state and take action.
    async fn reconcile(&self, id: &str, spec: &Self::Spec) -> Result<Self::Status, ReconcileError>;

    /// Handle resource deletion (finalization).
    async fn finalize(&self, id: &str) -> Result<(), ReconcileError>;
}

/// Names touched for one resource kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KindChanges {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
}

impl KindChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

static NO_CHANGES: KindChanges = KindChanges {
    created: Vec::new(),
    updated: Vec::new(),
    deleted: Vec::new(),
};

/// What one reconciliation cycle did.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub mesh_name: String,
    /// The mesh was absent and has been created.
    pub mesh_created: bool,
    /// The mesh has been removed (finalization only).
    pub mesh_deleted: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub virtual_nodes: KindChanges,
    pub virtual_routers: KindChanges,
    pub routes: KindChanges,
    pub virtual_services: KindChanges,
}

impl ReconcileReport {
    pub fn new(mesh_name: &str) -> Self {
        Self {
            mesh_name: mesh_name.to_string(),
            mesh_created: false,
            mesh_deleted: false,
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            virtual_nodes: KindChanges::default(),
            virtual_routers: KindChanges::default(),
            routes: KindChanges::default(),
            virtual_services: KindChanges::default(),
        }
    }

    pub fn changes(&self, kind: ResourceKind) -> &KindChanges {
        match kind {
            ResourceKind::Mesh => &NO_CHANGES,
            ResourceKind::VirtualNode => &self.virtual_nodes,
            ResourceKind::VirtualRouter => &self.virtual_routers,
            ResourceKind::Route => &self.routes,
            ResourceKind::VirtualService => &self.virtual_services,
        }
    }

    pub(crate) fn changes_mut(&mut self, kind: ResourceKind) -> Option<&mut KindChanges> {
        match kind {
            ResourceKind::Mesh => None,
            ResourceKind::VirtualNode => Some(&mut self.virtual_nodes),
            ResourceKind::VirtualRouter => Some(&mut self.virtual_routers),
            ResourceKind::Route => Some(&mut self.routes),
            ResourceKind::VirtualService => Some(&mut self.virtual_services),
        }
    }

    /// Number of create, update and delete calls applied below the mesh.
    pub fn mutations(&self) -> usize {
        [
            &self.virtual_nodes,
            &self.virtual_routers,
            &self.routes,
            &self.virtual_services,
        ]
        .iter()
        .map(|c| c.created.len() + c.updated.len() + c.deleted.len())
        .sum()
    }
}
