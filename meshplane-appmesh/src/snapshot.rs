//! Resource model: App Mesh resource records, the desired snapshot and the
//! existing-state view produced by the lister.
//!
//! Records mirror the App Mesh REST shapes (camelCase JSON) closely enough to
//! round-trip through the API, but only carry the fields the reconciler and
//! its translators actually use.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;

/// The resource kinds managed under a mesh, plus the mesh itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Mesh,
    VirtualNode,
    VirtualRouter,
    Route,
    VirtualService,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Mesh => "mesh",
            ResourceKind::VirtualNode => "virtual node",
            ResourceKind::VirtualRouter => "virtual router",
            ResourceKind::Route => "route",
            ResourceKind::VirtualService => "virtual service",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Specs
// =============================================================================

/// Mesh-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_filter: Option<EgressFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EgressFilter {
    #[serde(rename = "type")]
    pub filter_type: EgressFilterType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EgressFilterType {
    AllowAll,
    DropAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Http2,
    Grpc,
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub port_mapping: PortMapping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsServiceDiscovery {
    pub hostname: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDiscovery {
    pub dns: DnsServiceDiscovery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceBackend {
    pub virtual_service_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub virtual_service: VirtualServiceBackend,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNodeSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<Listener>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_discovery: Option<ServiceDiscovery>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<Backend>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualRouterSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<Listener>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedTarget {
    pub virtual_node: String,
    pub weight: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteAction {
    pub weighted_targets: Vec<WeightedTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    #[serde(rename = "match")]
    pub route_match: HttpRouteMatch,
    pub action: RouteAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpRoute {
    pub action: RouteAction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_route: Option<HttpRoute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_route: Option<TcpRoute>,
}

impl RouteSpec {
    /// Virtual nodes this route sends traffic to.
    pub fn target_nodes(&self) -> impl Iterator<Item = &str> {
        let http = self.http_route.iter().map(|r| &r.action);
        let tcp = self.tcp_route.iter().map(|r| &r.action);
        http.chain(tcp)
            .flat_map(|action| action.weighted_targets.iter())
            .map(|target| target.virtual_node.as_str())
    }
}

/// Who answers for a virtual service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VirtualServiceProvider {
    VirtualRouter {
        #[serde(rename = "virtualRouterName")]
        virtual_router_name: String,
    },
    VirtualNode {
        #[serde(rename = "virtualNodeName")]
        virtual_node_name: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<VirtualServiceProvider>,
}

// =============================================================================
// Records
// =============================================================================

/// Server-assigned metadata echoed back by the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetadata {
    #[serde(default)]
    pub arn: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub version: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshData {
    pub mesh_name: String,
    #[serde(default)]
    pub spec: MeshSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResourceMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNodeData {
    #[serde(default)]
    pub mesh_name: String,
    pub virtual_node_name: String,
    #[serde(default)]
    pub spec: VirtualNodeSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResourceMetadata>,
}

impl VirtualNodeData {
    pub fn new(name: impl Into<String>, spec: VirtualNodeSpec) -> Self {
        Self {
            virtual_node_name: name.into(),
            spec,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualRouterData {
    #[serde(default)]
    pub mesh_name: String,
    pub virtual_router_name: String,
    #[serde(default)]
    pub spec: VirtualRouterSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResourceMetadata>,
}

impl VirtualRouterData {
    pub fn new(name: impl Into<String>, spec: VirtualRouterSpec) -> Self {
        Self {
            virtual_router_name: name.into(),
            spec,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteData {
    #[serde(default)]
    pub mesh_name: String,
    pub virtual_router_name: String,
    pub route_name: String,
    #[serde(default)]
    pub spec: RouteSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResourceMetadata>,
}

impl RouteData {
    pub fn new(
        router: impl Into<String>,
        name: impl Into<String>,
        spec: RouteSpec,
    ) -> Self {
        Self {
            virtual_router_name: router.into(),
            route_name: name.into(),
            spec,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceData {
    #[serde(default)]
    pub mesh_name: String,
    pub virtual_service_name: String,
    #[serde(default)]
    pub spec: VirtualServiceSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResourceMetadata>,
}

impl VirtualServiceData {
    pub fn new(name: impl Into<String>, spec: VirtualServiceSpec) -> Self {
        Self {
            virtual_service_name: name.into(),
            spec,
            ..Default::default()
        }
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Desired configuration for one mesh, produced by a translator.
///
/// Maps are keyed by resource name. Route names are unique within the mesh;
/// each route record names its owning virtual router.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    pub mesh_name: String,
    #[serde(default)]
    pub mesh: MeshSpec,
    #[serde(default)]
    pub virtual_nodes: HashMap<String, VirtualNodeData>,
    #[serde(default)]
    pub virtual_routers: HashMap<String, VirtualRouterData>,
    #[serde(default)]
    pub routes: HashMap<String, RouteData>,
    #[serde(default)]
    pub virtual_services: HashMap<String, VirtualServiceData>,
}

impl ResourceSnapshot {
    pub fn new(mesh_name: impl Into<String>) -> Self {
        Self {
            mesh_name: mesh_name.into(),
            ..Default::default()
        }
    }

    /// Load a snapshot written by a translator.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| SnapshotError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn with_virtual_node(mut self, mut node: VirtualNodeData) -> Self {
        node.mesh_name = self.mesh_name.clone();
        self.virtual_nodes
            .insert(node.virtual_node_name.clone(), node);
        self
    }

    pub fn with_virtual_router(mut self, mut router: VirtualRouterData) -> Self {
        router.mesh_name = self.mesh_name.clone();
        self.virtual_routers
            .insert(router.virtual_router_name.clone(), router);
        self
    }

    pub fn with_route(mut self, mut route: RouteData) -> Self {
        route.mesh_name = self.mesh_name.clone();
        self.routes.insert(route.route_name.clone(), route);
        self
    }

    pub fn with_virtual_service(mut self, mut service: VirtualServiceData) -> Self {
        service.mesh_name = self.mesh_name.clone();
        self.virtual_services
            .insert(service.virtual_service_name.clone(), service);
        self
    }

    /// Total number of resources below the mesh.
    pub fn len(&self) -> usize {
        self.virtual_nodes.len()
            + self.virtual_routers.len()
            + self.routes.len()
            + self.virtual_services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check keys, mesh membership and cross-references.
    ///
    /// Routes must name a router in the snapshot and services must name a
    /// provider in the snapshot, otherwise creation order cannot be honored.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        for (key, node) in &self.virtual_nodes {
            self.check_record(ResourceKind::VirtualNode, key, &node.virtual_node_name, &node.mesh_name)?;
        }
        for (key, router) in &self.virtual_routers {
            self.check_record(
                ResourceKind::VirtualRouter,
                key,
                &router.virtual_router_name,
                &router.mesh_name,
            )?;
        }
        for (key, route) in &self.routes {
            self.check_record(ResourceKind::Route, key, &route.route_name, &route.mesh_name)?;
            if !self.virtual_routers.contains_key(&route.virtual_router_name) {
                return Err(SnapshotError::DanglingReference {
                    kind: ResourceKind::Route,
                    name: key.clone(),
                    target_kind: ResourceKind::VirtualRouter,
                    target: route.virtual_router_name.clone(),
                });
            }
            if let Some(target) = route
                .spec
                .target_nodes()
                .find(|node| !self.virtual_nodes.contains_key(*node))
            {
                return Err(SnapshotError::DanglingReference {
                    kind: ResourceKind::Route,
                    name: key.clone(),
                    target_kind: ResourceKind::VirtualNode,
                    target: target.to_string(),
                });
            }
        }
        for (key, service) in &self.virtual_services {
            self.check_record(
                ResourceKind::VirtualService,
                key,
                &service.virtual_service_name,
                &service.mesh_name,
            )?;
            let (target_kind, target, present) = match &service.spec.provider {
                None => continue,
                Some(VirtualServiceProvider::VirtualRouter { virtual_router_name }) => (
                    ResourceKind::VirtualRouter,
                    virtual_router_name,
                    self.virtual_routers.contains_key(virtual_router_name),
                ),
                Some(VirtualServiceProvider::VirtualNode { virtual_node_name }) => (
                    ResourceKind::VirtualNode,
                    virtual_node_name,
                    self.virtual_nodes.contains_key(virtual_node_name),
                ),
            };
            if !present {
                return Err(SnapshotError::DanglingReference {
                    kind: ResourceKind::VirtualService,
                    name: key.clone(),
                    target_kind,
                    target: target.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_record(
        &self,
        kind: ResourceKind,
        key: &str,
        name: &str,
        mesh_name: &str,
    ) -> Result<(), SnapshotError> {
        if key != name {
            return Err(SnapshotError::NameMismatch {
                kind,
                key: key.to_string(),
                name: name.to_string(),
            });
        }
        // Records loaded from a file may leave the mesh empty; it is implied.
        if !mesh_name.is_empty() && mesh_name != self.mesh_name {
            return Err(SnapshotError::MeshMismatch {
                kind,
                name: name.to_string(),
                expected: self.mesh_name.clone(),
                found: mesh_name.to_string(),
            });
        }
        Ok(())
    }
}

/// Names of what currently exists under a mesh, as enumerated by the lister.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingResources {
    pub virtual_nodes: Vec<String>,
    pub virtual_services: Vec<String>,
    /// Every existing virtual router, with the names of its routes.
    pub routes_by_router: HashMap<String, Vec<String>>,
}

impl ExistingResources {
    pub fn virtual_routers(&self) -> impl Iterator<Item = &str> {
        self.routes_by_router.keys().map(String::as_str)
    }
}
