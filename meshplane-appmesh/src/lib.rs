//! meshplane-appmesh: converges an App Mesh control API to a desired snapshot.
//!
//! A translator produces a [`ResourceSnapshot`] for one mesh. The
//! [`MeshReconciler`] creates the mesh if it is absent, otherwise lists what
//! exists with the [`ResourceLister`] and applies a create/update/delete diff
//! in dependency order through a [`MeshApi`] implementation.

pub mod clients;
pub mod error;
pub mod lister;
pub mod reconciler;
pub mod snapshot;

pub use clients::{
    ApiCall, AppMeshClient, AppMeshClientConfig, InMemoryMeshApi, MeshApi, Operation,
};
pub use error::{AggregateError, ApiError, ReconcileError, SnapshotError};
pub use lister::ResourceLister;
pub use reconciler::{KindChanges, MeshReconciler, ReconcileReport, Reconciler};
pub use snapshot::{ExistingResources, ResourceKind, ResourceSnapshot};
