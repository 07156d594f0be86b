//! Clients for the mesh control API.
//!
//! - `appmesh`: the App Mesh REST API
//! - `memory`: an in-process mesh store with call recording and fault injection

pub mod appmesh;
pub mod memory;

pub use appmesh::{AppMeshClient, AppMeshClientConfig};
pub use memory::{ApiCall, InMemoryMeshApi};

use std::fmt;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::snapshot::{
    MeshData, MeshSpec, RouteData, VirtualNodeData, VirtualRouterData, VirtualServiceData,
};

pub type Result<T> = std::result::Result<T, ApiError>;

/// Kind of remote call, used for error context and call records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Describe,
    List,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Operation::Describe => "describe",
            Operation::List => "list",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(verb)
    }
}

/// Typed operations against a mesh control API.
///
/// List calls return names only and drain every page before returning.
/// Missing objects are reported as [`ApiError::NotFound`]. Deleting a name
/// that does not exist is an error, so callers only delete names they have
/// just enumerated.
#[async_trait]
pub trait MeshApi: Send + Sync {
    async fn describe_mesh(&self, mesh: &str) -> Result<MeshData>;
    async fn create_mesh(&self, mesh: &str, spec: &MeshSpec) -> Result<MeshData>;
    async fn delete_mesh(&self, mesh: &str) -> Result<()>;

    async fn describe_virtual_node(&self, mesh: &str, name: &str) -> Result<VirtualNodeData>;
    async fn list_virtual_nodes(&self, mesh: &str) -> Result<Vec<String>>;
    async fn create_virtual_node(&self, mesh: &str, node: &VirtualNodeData)
        -> Result<VirtualNodeData>;
    async fn update_virtual_node(&self, mesh: &str, node: &VirtualNodeData)
        -> Result<VirtualNodeData>;
    async fn delete_virtual_node(&self, mesh: &str, name: &str) -> Result<()>;

    async fn describe_virtual_router(&self, mesh: &str, name: &str) -> Result<VirtualRouterData>;
    async fn list_virtual_routers(&self, mesh: &str) -> Result<Vec<String>>;
    async fn create_virtual_router(
        &self,
        mesh: &str,
        router: &VirtualRouterData,
    ) -> Result<VirtualRouterData>;
    async fn update_virtual_router(
        &self,
        mesh: &str,
        router: &VirtualRouterData,
    ) -> Result<VirtualRouterData>;
    async fn delete_virtual_router(&self, mesh: &str, name: &str) -> Result<()>;

    async fn describe_route(&self, mesh: &str, router: &str, name: &str) -> Result<RouteData>;
    async fn list_routes(&self, mesh: &str, router: &str) -> Result<Vec<String>>;
    async fn create_route(&self, mesh: &str, route: &RouteData) -> Result<RouteData>;
    async fn update_route(&self, mesh: &str, route: &RouteData) -> Result<RouteData>;
    async fn delete_route(&self, mesh: &str, router: &str, name: &str) -> Result<()>;

    async fn describe_virtual_service(&self, mesh: &str, name: &str)
        -> Result<VirtualServiceData>;
    async fn list_virtual_services(&self, mesh: &str) -> Result<Vec<String>>;
    async fn create_virtual_service(
        &self,
        mesh: &str,
        service: &VirtualServiceData,
    ) -> Result<VirtualServiceData>;
    async fn update_virtual_service(
        &self,
        mesh: &str,
        service: &VirtualServiceData,
    ) -> Result<VirtualServiceData>;
    async fn delete_virtual_service(&self, mesh: &str, name: &str) -> Result<()>;
}
