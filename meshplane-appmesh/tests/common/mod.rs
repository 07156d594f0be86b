//! Shared fixtures for meshplane-appmesh integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use meshplane_appmesh::snapshot::{
    DnsServiceDiscovery, HttpRoute, HttpRouteMatch, Listener, PortMapping, Protocol,
    RouteAction, RouteData, RouteSpec, ServiceDiscovery, VirtualNodeData, VirtualNodeSpec,
    VirtualRouterData, VirtualRouterSpec, VirtualServiceData, VirtualServiceProvider,
    VirtualServiceSpec, WeightedTarget,
};
use meshplane_appmesh::{InMemoryMeshApi, MeshApi, MeshReconciler, ResourceSnapshot};

pub const MESH: &str = "mesh-test";

pub fn listener(port: u16) -> Listener {
    Listener {
        port_mapping: PortMapping {
            port,
            protocol: Protocol::Http,
        },
    }
}

pub fn node(name: &str) -> VirtualNodeData {
    VirtualNodeData::new(
        name,
        VirtualNodeSpec {
            listeners: vec![listener(8080)],
            service_discovery: Some(ServiceDiscovery {
                dns: DnsServiceDiscovery {
                    hostname: format!("{}.default.svc.cluster.local", name),
                },
            }),
            backends: Vec::new(),
        },
    )
}

pub fn router(name: &str) -> VirtualRouterData {
    VirtualRouterData::new(
        name,
        VirtualRouterSpec {
            listeners: vec![listener(8080)],
        },
    )
}

/// HTTP route on `router` sending everything to `target`.
pub fn route(router: &str, name: &str, target: &str) -> RouteData {
    RouteData::new(
        router,
        name,
        RouteSpec {
            http_route: Some(HttpRoute {
                route_match: HttpRouteMatch {
                    prefix: "/".to_string(),
                },
                action: RouteAction {
                    weighted_targets: vec![WeightedTarget {
                        virtual_node: target.to_string(),
                        weight: 100,
                    }],
                },
            }),
            ..Default::default()
        },
    )
}

pub fn service_via_router(name: &str, router: &str) -> VirtualServiceData {
    VirtualServiceData::new(
        name,
        VirtualServiceSpec {
            provider: Some(VirtualServiceProvider::VirtualRouter {
                virtual_router_name: router.to_string(),
            }),
        },
    )
}

pub fn service_via_node(name: &str, node: &str) -> VirtualServiceData {
    VirtualServiceData::new(
        name,
        VirtualServiceSpec {
            provider: Some(VirtualServiceProvider::VirtualNode {
                virtual_node_name: node.to_string(),
            }),
        },
    )
}

/// In-memory API plus a reconciler driving it.
pub fn harness() -> (Arc<InMemoryMeshApi>, MeshReconciler) {
    let api = Arc::new(InMemoryMeshApi::new());
    let dyn_api: Arc<dyn MeshApi> = api.clone();
    (api, MeshReconciler::new(dyn_api))
}

pub fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

pub fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Snapshot with three nodes, two routers, two routes and two services.
pub fn full_snapshot() -> ResourceSnapshot {
    ResourceSnapshot::new(MESH)
        .with_virtual_node(node("vn-1"))
        .with_virtual_node(node("vn-2"))
        .with_virtual_node(node("vn-3"))
        .with_virtual_router(router("vr-1"))
        .with_virtual_router(router("vr-2"))
        .with_route(route("vr-1", "r-1", "vn-1"))
        .with_route(route("vr-2", "r-2", "vn-2"))
        .with_virtual_service(service_via_router("vs-1", "vr-1"))
        .with_virtual_service(service_via_node("vs-2", "vn-3"))
}
