//! Mark-and-sweep diff between a desired snapshot and existing state.
//!
//! Upserts run Node → Router → Route → Service so that every reference
//! points at something that already exists; deletes run the other way,
//! Service → (Route, then Router) → Node. Both phases stop at the first
//! failed call. Nothing is rolled back: a retried cycle converges because
//! names that now exist are updated rather than created.

use std::collections::HashMap;

use tracing::{debug, info};

use super::ReconcileReport;
use crate::clients::{MeshApi, Operation};
use crate::error::{ApiError, ReconcileError};
use crate::snapshot::{ExistingResources, ResourceKind, ResourceSnapshot};

/// Existing names, flagged once the desired snapshot claims them.
///
/// Names that only appear in the desired snapshot never enter the table.
#[derive(Debug, Clone, Default)]
pub struct MarkedResources {
    virtual_nodes: HashMap<String, bool>,
    virtual_routers: HashMap<String, bool>,
    /// Route flags keyed by owning router, then route name.
    routes: HashMap<String, HashMap<String, bool>>,
    virtual_services: HashMap<String, bool>,
}

impl MarkedResources {
    pub fn from_existing(existing: &ExistingResources) -> Self {
        let flags = |names: &[String]| -> HashMap<String, bool> {
            names.iter().map(|name| (name.clone(), false)).collect()
        };
        Self {
            virtual_nodes: flags(&existing.virtual_nodes),
            virtual_services: flags(&existing.virtual_services),
            virtual_routers: existing
                .virtual_routers()
                .map(|router| (router.to_string(), false))
                .collect(),
            routes: existing
                .routes_by_router
                .iter()
                .map(|(router, routes)| (router.clone(), flags(routes)))
                .collect(),
        }
    }

    /// Flag an existing name as wanted. Returns false if it does not exist.
    ///
    /// Routes go through [`MarkedResources::mark_route`].
    pub fn mark(&mut self, kind: ResourceKind, name: &str) -> bool {
        let table = match kind {
            ResourceKind::VirtualNode => &mut self.virtual_nodes,
            ResourceKind::VirtualRouter => &mut self.virtual_routers,
            ResourceKind::VirtualService => &mut self.virtual_services,
            ResourceKind::Mesh | ResourceKind::Route => return false,
        };
        set_flag(table, name)
    }

    pub fn mark_route(&mut self, router: &str, route: &str) -> bool {
        self.routes
            .get_mut(router)
            .is_some_and(|routes| set_flag(routes, route))
    }

    pub fn is_marked(&self, kind: ResourceKind, name: &str) -> Option<bool> {
        let table = match kind {
            ResourceKind::VirtualNode => &self.virtual_nodes,
            ResourceKind::VirtualRouter => &self.virtual_routers,
            ResourceKind::VirtualService => &self.virtual_services,
            ResourceKind::Mesh | ResourceKind::Route => return None,
        };
        table.get(name).copied()
    }

    pub fn is_route_marked(&self, router: &str, route: &str) -> Option<bool> {
        self.routes.get(router)?.get(route).copied()
    }

    /// Existing routers in name order.
    fn routers(&self) -> Vec<(&str, bool)> {
        let mut routers: Vec<(&str, bool)> = self
            .virtual_routers
            .iter()
            .map(|(name, marked)| (name.as_str(), *marked))
            .collect();
        routers.sort_unstable();
        routers
    }

    fn unmarked_routes(&self, router: &str) -> Vec<&str> {
        self.routes.get(router).map(unmarked).unwrap_or_default()
    }
}

fn set_flag(table: &mut HashMap<String, bool>, name: &str) -> bool {
    match table.get_mut(name) {
        Some(flag) => {
            *flag = true;
            true
        }
        None => false,
    }
}

/// Unflagged names, sorted so deletions happen in a stable order.
fn unmarked(table: &HashMap<String, bool>) -> Vec<&str> {
    let mut names: Vec<&str> = table
        .iter()
        .filter(|(_, marked)| !**marked)
        .map(|(name, _)| name.as_str())
        .collect();
    names.sort_unstable();
    names
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort_unstable();
    keys
}

/// Applies a diff for one mesh through a [`MeshApi`].
pub struct DiffEngine<'a> {
    api: &'a dyn MeshApi,
    mesh: &'a str,
}

impl<'a> DiffEngine<'a> {
    pub fn new(api: &'a dyn MeshApi, mesh: &'a str) -> Self {
        Self { api, mesh }
    }

    /// Converge `existing` to `desired`: upsert and mark, then sweep.
    pub async fn apply(
        &self,
        desired: &ResourceSnapshot,
        existing: &ExistingResources,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let mut marks = MarkedResources::from_existing(existing);
        self.upsert(desired, &mut marks, report).await?;
        self.sweep(&marks, report).await
    }

    /// Update every desired name already in `marks`, create the rest.
    pub async fn upsert(
        &self,
        desired: &ResourceSnapshot,
        marks: &mut MarkedResources,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let api = self.api;
        let mesh = self.mesh;

        for name in sorted_keys(&desired.virtual_nodes) {
            let node = &desired.virtual_nodes[name];
            let kind = ResourceKind::VirtualNode;
            if marks.mark(kind, name) {
                let result = api.update_virtual_node(mesh, node).await;
                self.settle(Operation::Update, kind, name, result, report)?;
            } else {
                let result = api.create_virtual_node(mesh, node).await;
                self.settle(Operation::Create, kind, name, result, report)?;
            }
        }

        for name in sorted_keys(&desired.virtual_routers) {
            let router = &desired.virtual_routers[name];
            let kind = ResourceKind::VirtualRouter;
            if marks.mark(kind, name) {
                let result = api.update_virtual_router(mesh, router).await;
                self.settle(Operation::Update, kind, name, result, report)?;
            } else {
                let result = api.create_virtual_router(mesh, router).await;
                self.settle(Operation::Create, kind, name, result, report)?;
            }
        }

        for name in sorted_keys(&desired.routes) {
            let route = &desired.routes[name];
            let kind = ResourceKind::Route;
            if marks.mark_route(&route.virtual_router_name, name) {
                let result = api.update_route(mesh, route).await;
                self.settle(Operation::Update, kind, name, result, report)?;
            } else {
                let result = api.create_route(mesh, route).await;
                self.settle(Operation::Create, kind, name, result, report)?;
            }
        }

        for name in sorted_keys(&desired.virtual_services) {
            let service = &desired.virtual_services[name];
            let kind = ResourceKind::VirtualService;
            if marks.mark(kind, name) {
                let result = api.update_virtual_service(mesh, service).await;
                self.settle(Operation::Update, kind, name, result, report)?;
            } else {
                let result = api.create_virtual_service(mesh, service).await;
                self.settle(Operation::Create, kind, name, result, report)?;
            }
        }

        Ok(())
    }

    /// Delete every existing name left unmarked.
    pub async fn sweep(
        &self,
        marks: &MarkedResources,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        let api = self.api;
        let mesh = self.mesh;

        for name in unmarked(&marks.virtual_services) {
            let result = api.delete_virtual_service(mesh, name).await;
            self.settle_delete(ResourceKind::VirtualService, name, result, report)?;
        }

        // A router can only go once its obsolete routes are gone.
        for (router, router_marked) in marks.routers() {
            for route in marks.unmarked_routes(router) {
                let result = api.delete_route(mesh, router, route).await;
                self.settle_delete(ResourceKind::Route, route, result, report)?;
            }
            if !router_marked {
                let result = api.delete_virtual_router(mesh, router).await;
                self.settle_delete(ResourceKind::VirtualRouter, router, result, report)?;
            }
        }

        for name in unmarked(&marks.virtual_nodes) {
            let result = api.delete_virtual_node(mesh, name).await;
            self.settle_delete(ResourceKind::VirtualNode, name, result, report)?;
        }

        Ok(())
    }

    /// Record a create or update, or wrap its failure.
    fn settle<T>(
        &self,
        op: Operation,
        kind: ResourceKind,
        name: &str,
        result: Result<T, ApiError>,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        result.map_err(|e| ReconcileError::operation(op, kind, self.mesh, name, e))?;

        if let Some(changes) = report.changes_mut(kind) {
            match op {
                Operation::Create => {
                    info!("Created {} {} in mesh {}", kind, name, self.mesh);
                    changes.created.push(name.to_string());
                }
                _ => {
                    debug!("Updated {} {} in mesh {}", kind, name, self.mesh);
                    changes.updated.push(name.to_string());
                }
            }
        }
        Ok(())
    }

    /// Record a delete. A name the API no longer knows is already converged.
    fn settle_delete(
        &self,
        kind: ResourceKind,
        name: &str,
        result: Result<(), ApiError>,
        report: &mut ReconcileReport,
    ) -> Result<(), ReconcileError> {
        match result {
            Ok(()) => {
                info!("Deleted {} {} in mesh {}", kind, name, self.mesh);
                if let Some(changes) = report.changes_mut(kind) {
                    changes.deleted.push(name.to_string());
                }
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("{} {} already gone from mesh {}", kind, name, self.mesh);
                Ok(())
            }
            Err(e) => Err(ReconcileError::operation(
                Operation::Delete,
                kind,
                self.mesh,
                name,
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn existing() -> ExistingResources {
        ExistingResources {
            virtual_nodes: vec!["vn-1".to_string(), "vn-2".to_string()],
            virtual_services: vec!["svc.local".to_string()],
            routes_by_router: HashMap::from([
                (
                    "vr-1".to_string(),
                    vec!["r-1".to_string(), "r-2".to_string()],
                ),
                ("vr-2".to_string(), Vec::new()),
            ]),
        }
    }

    #[test]
    fn test_table_starts_unmarked() {
        let marks = MarkedResources::from_existing(&existing());

        assert_eq!(marks.is_marked(ResourceKind::VirtualNode, "vn-1"), Some(false));
        assert_eq!(marks.is_marked(ResourceKind::VirtualRouter, "vr-2"), Some(false));
        assert_eq!(marks.is_route_marked("vr-1", "r-2"), Some(false));
        assert_eq!(marks.is_marked(ResourceKind::VirtualNode, "vn-9"), None);
    }

    #[test]
    fn test_mark_only_flags_existing_names() {
        let mut marks = MarkedResources::from_existing(&existing());

        assert!(marks.mark(ResourceKind::VirtualNode, "vn-2"));
        assert!(!marks.mark(ResourceKind::VirtualNode, "vn-3"));
        assert_eq!(marks.is_marked(ResourceKind::VirtualNode, "vn-2"), Some(true));
        assert_eq!(marks.is_marked(ResourceKind::VirtualNode, "vn-3"), None);
        assert_eq!(unmarked(&marks.virtual_nodes), vec!["vn-1"]);
    }

    #[test]
    fn test_routes_are_marked_per_router() {
        let mut marks = MarkedResources::from_existing(&existing());

        assert!(marks.mark_route("vr-1", "r-1"));
        // Same route name under a different router is a different route.
        assert!(!marks.mark_route("vr-2", "r-2"));

        assert_eq!(marks.unmarked_routes("vr-1"), vec!["r-2"]);
        assert!(marks.unmarked_routes("vr-2").is_empty());
        assert!(!marks.mark(ResourceKind::Route, "r-1"));
    }

    #[test]
    fn test_routers_listed_in_name_order() {
        let mut marks = MarkedResources::from_existing(&existing());
        marks.mark(ResourceKind::VirtualRouter, "vr-2");

        assert_eq!(marks.routers(), vec![("vr-1", false), ("vr-2", true)]);
    }
}
