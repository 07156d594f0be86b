//! In-process mesh store implementing [`MeshApi`].
//!
//! Behaves like the remote API where it matters to reconciliation: missing
//! objects are `NotFound`, duplicate creates conflict, and routers or meshes
//! that still own resources refuse deletion. Every call is recorded, and
//! failures can be injected per call.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{MeshApi, Operation, Result};
use crate::error::ApiError;
use crate::snapshot::{
    ExistingResources, MeshData, MeshSpec, ResourceKind, ResourceMetadata, ResourceSnapshot,
    RouteData, VirtualNodeData, VirtualRouterData, VirtualServiceData,
};

/// One recorded call.
///
/// `name` is the resource name; for list calls it is the scope (the router
/// for routes, the mesh otherwise).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCall {
    pub op: Operation,
    pub kind: ResourceKind,
    pub name: String,
}

#[derive(Debug, Default)]
struct MeshStore {
    mesh: MeshData,
    virtual_nodes: BTreeMap<String, VirtualNodeData>,
    virtual_routers: BTreeMap<String, VirtualRouterData>,
    /// Routes keyed by router, then route name.
    routes: BTreeMap<String, BTreeMap<String, RouteData>>,
    virtual_services: BTreeMap<String, VirtualServiceData>,
}

impl MeshStore {
    fn is_empty(&self) -> bool {
        self.virtual_nodes.is_empty()
            && self.virtual_routers.is_empty()
            && self.virtual_services.is_empty()
    }
}

#[derive(Debug, Default)]
struct State {
    meshes: HashMap<String, MeshStore>,
    calls: Vec<ApiCall>,
    failures: HashMap<(Operation, ResourceKind, String), String>,
    next_version: i64,
}

impl State {
    /// Record the call and return an injected failure if one matches.
    fn enter(&mut self, op: Operation, kind: ResourceKind, name: &str) -> Result<()> {
        debug!("In-memory {} {} {}", op, kind, name);
        self.calls.push(ApiCall {
            op,
            kind,
            name: name.to_string(),
        });
        match self.failures.get(&(op, kind, name.to_string())) {
            Some(message) => Err(ApiError::Internal(message.clone())),
            None => Ok(()),
        }
    }

    fn metadata(&mut self, mesh: &str, path: &str) -> Option<ResourceMetadata> {
        self.next_version += 1;
        Some(ResourceMetadata {
            arn: format!("arn:aws:appmesh:local:000000000000:mesh/{}{}", mesh, path),
            uid: uuid::Uuid::new_v4().to_string(),
            version: self.next_version,
        })
    }

    fn mesh(&self, mesh: &str) -> Result<&MeshStore> {
        self.meshes.get(mesh).ok_or_else(|| not_found(ResourceKind::Mesh, mesh))
    }

    fn mesh_mut(&mut self, mesh: &str) -> Result<&mut MeshStore> {
        self.meshes
            .get_mut(mesh)
            .ok_or_else(|| not_found(ResourceKind::Mesh, mesh))
    }
}

fn not_found(kind: ResourceKind, name: &str) -> ApiError {
    ApiError::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn conflict(kind: ResourceKind, name: &str) -> ApiError {
    ApiError::Status {
        status: 409,
        code: "ConflictException".to_string(),
        message: format!("{} {} already exists", kind, name),
    }
}

fn in_use(kind: ResourceKind, name: &str, holder: &str) -> ApiError {
    ApiError::Status {
        status: 409,
        code: "ResourceInUseException".to_string(),
        message: format!("{} {} still has {}", kind, name, holder),
    }
}

/// In-memory [`MeshApi`].
#[derive(Debug, Default)]
pub struct InMemoryMeshApi {
    state: Mutex<State>,
}

impl InMemoryMeshApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store everything in `snapshot` (mesh included) without recording calls.
    pub async fn seed(&self, snapshot: &ResourceSnapshot) {
        let mesh_name = snapshot.mesh_name.as_str();
        let mut state = self.state.lock().await;
        let mut store = state.meshes.remove(mesh_name).unwrap_or_default();
        store.mesh = MeshData {
            mesh_name: mesh_name.to_string(),
            spec: snapshot.mesh.clone(),
            metadata: state.metadata(mesh_name, ""),
        };
        for (name, node) in &snapshot.virtual_nodes {
            let mut node = node.clone();
            node.mesh_name = mesh_name.to_string();
            store.virtual_nodes.insert(name.clone(), node);
        }
        for (name, router) in &snapshot.virtual_routers {
            let mut router = router.clone();
            router.mesh_name = mesh_name.to_string();
            store.virtual_routers.insert(name.clone(), router);
            store.routes.entry(name.clone()).or_default();
        }
        for (name, route) in &snapshot.routes {
            let mut route = route.clone();
            route.mesh_name = mesh_name.to_string();
            store
                .routes
                .entry(route.virtual_router_name.clone())
                .or_default()
                .insert(name.clone(), route);
        }
        for (name, service) in &snapshot.virtual_services {
            let mut service = service.clone();
            service.mesh_name = mesh_name.to_string();
            store.virtual_services.insert(name.clone(), service);
        }
        state.meshes.insert(mesh_name.to_string(), store);
    }

    /// Fail every subsequent `op` on `kind` named `name` with `message`.
    pub async fn fail_on(&self, op: Operation, kind: ResourceKind, name: &str, message: &str) {
        self.state
            .lock()
            .await
            .failures
            .insert((op, kind, name.to_string()), message.to_string());
    }

    /// Remove every injected failure.
    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<ApiCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Names passed to `op` on `kind`, in call order.
    pub async fn names(&self, op: Operation, kind: ResourceKind) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| call.op == op && call.kind == kind)
            .map(|call| call.name.clone())
            .collect()
    }

    pub async fn count(&self, op: Operation, kind: ResourceKind) -> usize {
        self.names(op, kind).await.len()
    }

    /// Current contents of `mesh`, in the lister's shape.
    pub async fn existing(&self, mesh: &str) -> Option<ExistingResources> {
        let state = self.state.lock().await;
        let store = state.meshes.get(mesh)?;
        Some(ExistingResources {
            virtual_nodes: store.virtual_nodes.keys().cloned().collect(),
            virtual_services: store.virtual_services.keys().cloned().collect(),
            routes_by_router: store
                .virtual_routers
                .keys()
                .map(|router| {
                    let routes = store
                        .routes
                        .get(router)
                        .map(|routes| routes.keys().cloned().collect())
                        .unwrap_or_default();
                    (router.clone(), routes)
                })
                .collect(),
        })
    }

    pub async fn has_mesh(&self, mesh: &str) -> bool {
        self.state.lock().await.meshes.contains_key(mesh)
    }
}

#[async_trait]
impl MeshApi for InMemoryMeshApi {
    async fn describe_mesh(&self, mesh: &str) -> Result<MeshData> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Describe, ResourceKind::Mesh, mesh)?;
        Ok(state.mesh(mesh)?.mesh.clone())
    }

    async fn create_mesh(&self, mesh: &str, spec: &MeshSpec) -> Result<MeshData> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Create, ResourceKind::Mesh, mesh)?;
        if state.meshes.contains_key(mesh) {
            return Err(conflict(ResourceKind::Mesh, mesh));
        }
        let data = MeshData {
            mesh_name: mesh.to_string(),
            spec: spec.clone(),
            metadata: state.metadata(mesh, ""),
        };
        state.meshes.insert(
            mesh.to_string(),
            MeshStore {
                mesh: data.clone(),
                ..Default::default()
            },
        );
        Ok(data)
    }

    async fn delete_mesh(&self, mesh: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Delete, ResourceKind::Mesh, mesh)?;
        if !state.mesh(mesh)?.is_empty() {
            return Err(in_use(ResourceKind::Mesh, mesh, "resources"));
        }
        state.meshes.remove(mesh);
        Ok(())
    }

    async fn describe_virtual_node(&self, mesh: &str, name: &str) -> Result<VirtualNodeData> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Describe, ResourceKind::VirtualNode, name)?;
        state
            .mesh(mesh)?
            .virtual_nodes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::VirtualNode, name))
    }

    async fn list_virtual_nodes(&self, mesh: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.enter(Operation::List, ResourceKind::VirtualNode, mesh)?;
        Ok(state.mesh(mesh)?.virtual_nodes.keys().cloned().collect())
    }

    async fn create_virtual_node(
        &self,
        mesh: &str,
        node: &VirtualNodeData,
    ) -> Result<VirtualNodeData> {
        let name = node.virtual_node_name.as_str();
        let mut state = self.state.lock().await;
        state.enter(Operation::Create, ResourceKind::VirtualNode, name)?;
        if state.mesh(mesh)?.virtual_nodes.contains_key(name) {
            return Err(conflict(ResourceKind::VirtualNode, name));
        }
        let mut data = node.clone();
        data.mesh_name = mesh.to_string();
        data.metadata = state.metadata(mesh, &format!("/virtualNode/{}", name));
        state
            .mesh_mut(mesh)?
            .virtual_nodes
            .insert(name.to_string(), data.clone());
        Ok(data)
    }

    async fn update_virtual_node(
        &self,
        mesh: &str,
        node: &VirtualNodeData,
    ) -> Result<VirtualNodeData> {
        let name = node.virtual_node_name.as_str();
        let mut state = self.state.lock().await;
        state.enter(Operation::Update, ResourceKind::VirtualNode, name)?;
        if !state.mesh(mesh)?.virtual_nodes.contains_key(name) {
            return Err(not_found(ResourceKind::VirtualNode, name));
        }
        let mut data = node.clone();
        data.mesh_name = mesh.to_string();
        data.metadata = state.metadata(mesh, &format!("/virtualNode/{}", name));
        state
            .mesh_mut(mesh)?
            .virtual_nodes
            .insert(name.to_string(), data.clone());
        Ok(data)
    }

    async fn delete_virtual_node(&self, mesh: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Delete, ResourceKind::VirtualNode, name)?;
        state
            .mesh_mut(mesh)?
            .virtual_nodes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(ResourceKind::VirtualNode, name))
    }

    async fn describe_virtual_router(&self, mesh: &str, name: &str) -> Result<VirtualRouterData> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Describe, ResourceKind::VirtualRouter, name)?;
        state
            .mesh(mesh)?
            .virtual_routers
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::VirtualRouter, name))
    }

    async fn list_virtual_routers(&self, mesh: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.enter(Operation::List, ResourceKind::VirtualRouter, mesh)?;
        Ok(state.mesh(mesh)?.virtual_routers.keys().cloned().collect())
    }

    async fn create_virtual_router(
        &self,
        mesh: &str,
        router: &VirtualRouterData,
    ) -> Result<VirtualRouterData> {
        let name = router.virtual_router_name.as_str();
        let mut state = self.state.lock().await;
        state.enter(Operation::Create, ResourceKind::VirtualRouter, name)?;
        if state.mesh(mesh)?.virtual_routers.contains_key(name) {
            return Err(conflict(ResourceKind::VirtualRouter, name));
        }
        let mut data = router.clone();
        data.mesh_name = mesh.to_string();
        data.metadata = state.metadata(mesh, &format!("/virtualRouter/{}", name));
        let store = state.mesh_mut(mesh)?;
        store
            .virtual_routers
            .insert(name.to_string(), data.clone());
        store.routes.entry(name.to_string()).or_default();
        Ok(data)
    }

    async fn update_virtual_router(
        &self,
        mesh: &str,
        router: &VirtualRouterData,
    ) -> Result<VirtualRouterData> {
        let name = router.virtual_router_name.as_str();
        let mut state = self.state.lock().await;
        state.enter(Operation::Update, ResourceKind::VirtualRouter, name)?;
        if !state.mesh(mesh)?.virtual_routers.contains_key(name) {
            return Err(not_found(ResourceKind::VirtualRouter, name));
        }
        let mut data = router.clone();
        data.mesh_name = mesh.to_string();
        data.metadata = state.metadata(mesh, &format!("/virtualRouter/{}", name));
        state
            .mesh_mut(mesh)?
            .virtual_routers
            .insert(name.to_string(), data.clone());
        Ok(data)
    }

    async fn delete_virtual_router(&self, mesh: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Delete, ResourceKind::VirtualRouter, name)?;
        let store = state.mesh_mut(mesh)?;
        if !store.virtual_routers.contains_key(name) {
            return Err(not_found(ResourceKind::VirtualRouter, name));
        }
        if store.routes.get(name).is_some_and(|routes| !routes.is_empty()) {
            return Err(in_use(ResourceKind::VirtualRouter, name, "routes"));
        }
        store.virtual_routers.remove(name);
        store.routes.remove(name);
        Ok(())
    }

    async fn describe_route(&self, mesh: &str, router: &str, name: &str) -> Result<RouteData> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Describe, ResourceKind::Route, name)?;
        state
            .mesh(mesh)?
            .routes
            .get(router)
            .and_then(|routes| routes.get(name))
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Route, name))
    }

    async fn list_routes(&self, mesh: &str, router: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.enter(Operation::List, ResourceKind::Route, router)?;
        let store = state.mesh(mesh)?;
        if !store.virtual_routers.contains_key(router) {
            return Err(not_found(ResourceKind::VirtualRouter, router));
        }
        Ok(store
            .routes
            .get(router)
            .map(|routes| routes.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_route(&self, mesh: &str, route: &RouteData) -> Result<RouteData> {
        let name = route.route_name.as_str();
        let router = route.virtual_router_name.as_str();
        let mut state = self.state.lock().await;
        state.enter(Operation::Create, ResourceKind::Route, name)?;
        let store = state.mesh(mesh)?;
        if !store.virtual_routers.contains_key(router) {
            return Err(not_found(ResourceKind::VirtualRouter, router));
        }
        if store
            .routes
            .get(router)
            .is_some_and(|routes| routes.contains_key(name))
        {
            return Err(conflict(ResourceKind::Route, name));
        }
        let mut data = route.clone();
        data.mesh_name = mesh.to_string();
        data.metadata = state.metadata(
            mesh,
            &format!("/virtualRouter/{}/route/{}", router, name),
        );
        state
            .mesh_mut(mesh)?
            .routes
            .entry(router.to_string())
            .or_default()
            .insert(name.to_string(), data.clone());
        Ok(data)
    }

    async fn update_route(&self, mesh: &str, route: &RouteData) -> Result<RouteData> {
        let name = route.route_name.as_str();
        let router = route.virtual_router_name.as_str();
        let mut state = self.state.lock().await;
        state.enter(Operation::Update, ResourceKind::Route, name)?;
        let exists = state
            .mesh(mesh)?
            .routes
            .get(router)
            .is_some_and(|routes| routes.contains_key(name));
        if !exists {
            return Err(not_found(ResourceKind::Route, name));
        }
        let mut data = route.clone();
        data.mesh_name = mesh.to_string();
        data.metadata = state.metadata(
            mesh,
            &format!("/virtualRouter/{}/route/{}", router, name),
        );
        state
            .mesh_mut(mesh)?
            .routes
            .entry(router.to_string())
            .or_default()
            .insert(name.to_string(), data.clone());
        Ok(data)
    }

    async fn delete_route(&self, mesh: &str, router: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Delete, ResourceKind::Route, name)?;
        state
            .mesh_mut(mesh)?
            .routes
            .get_mut(router)
            .and_then(|routes| routes.remove(name))
            .map(|_| ())
            .ok_or_else(|| not_found(ResourceKind::Route, name))
    }

    async fn describe_virtual_service(
        &self,
        mesh: &str,
        name: &str,
    ) -> Result<VirtualServiceData> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Describe, ResourceKind::VirtualService, name)?;
        state
            .mesh(mesh)?
            .virtual_services
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::VirtualService, name))
    }

    async fn list_virtual_services(&self, mesh: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.enter(Operation::List, ResourceKind::VirtualService, mesh)?;
        Ok(state.mesh(mesh)?.virtual_services.keys().cloned().collect())
    }

    async fn create_virtual_service(
        &self,
        mesh: &str,
        service: &VirtualServiceData,
    ) -> Result<VirtualServiceData> {
        let name = service.virtual_service_name.as_str();
        let mut state = self.state.lock().await;
        state.enter(Operation::Create, ResourceKind::VirtualService, name)?;
        if state.mesh(mesh)?.virtual_services.contains_key(name) {
            return Err(conflict(ResourceKind::VirtualService, name));
        }
        let mut data = service.clone();
        data.mesh_name = mesh.to_string();
        data.metadata = state.metadata(mesh, &format!("/virtualService/{}", name));
        state
            .mesh_mut(mesh)?
            .virtual_services
            .insert(name.to_string(), data.clone());
        Ok(data)
    }

    async fn update_virtual_service(
        &self,
        mesh: &str,
        service: &VirtualServiceData,
    ) -> Result<VirtualServiceData> {
        let name = service.virtual_service_name.as_str();
        let mut state = self.state.lock().await;
        state.enter(Operation::Update, ResourceKind::VirtualService, name)?;
        if !state.mesh(mesh)?.virtual_services.contains_key(name) {
            return Err(not_found(ResourceKind::VirtualService, name));
        }
        let mut data = service.clone();
        data.mesh_name = mesh.to_string();
        data.metadata = state.metadata(mesh, &format!("/virtualService/{}", name));
        state
            .mesh_mut(mesh)?
            .virtual_services
            .insert(name.to_string(), data.clone());
        Ok(data)
    }

    async fn delete_virtual_service(&self, mesh: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.enter(Operation::Delete, ResourceKind::VirtualService, name)?;
        state
            .mesh_mut(mesh)?
            .virtual_services
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(ResourceKind::VirtualService, name))
    }
}
