//! Enumerates what currently exists under a mesh.
//!
//! Virtual nodes, virtual services and virtual routers are listed
//! concurrently; once routers are known, the routes of each router are
//! listed concurrently as well. A failing listing does not cancel its
//! siblings: every task runs to completion and all failures are reported
//! together as one [`AggregateError`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::clients::{MeshApi, Operation};
use crate::error::{AggregateError, ApiError, ReconcileError};
use crate::snapshot::{ExistingResources, ResourceKind};

/// Buffer for listing failures. The channel is drained while producers run,
/// so this only bounds how many errors may be queued at once.
const ERROR_CHANNEL_CAPACITY: usize = 16;

type RouteMap = Arc<Mutex<HashMap<String, Vec<String>>>>;

/// Result of one top-level listing task.
enum Listed {
    VirtualNodes(Vec<String>),
    VirtualServices(Vec<String>),
    /// Routes were written into the shared route map.
    VirtualRouters,
    Failed,
}

/// Concurrent enumerator of existing mesh resources.
#[derive(Clone)]
pub struct ResourceLister {
    api: Arc<dyn MeshApi>,
}

impl ResourceLister {
    pub fn new(api: Arc<dyn MeshApi>) -> Self {
        Self { api }
    }

    /// List every existing resource under `mesh`.
    ///
    /// Partial results are discarded if any listing failed. Dropping the
    /// returned future aborts all in-flight listing tasks.
    #[instrument(skip(self))]
    pub async fn list(&self, mesh: &str) -> Result<ExistingResources, ReconcileError> {
        let (err_tx, mut err_rx) = mpsc::channel::<ReconcileError>(ERROR_CHANNEL_CAPACITY);
        let routes: RouteMap = Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = JoinSet::new();

        {
            let api = Arc::clone(&self.api);
            let err_tx = err_tx.clone();
            let mesh = mesh.to_string();
            tasks.spawn(async move {
                match api.list_virtual_nodes(&mesh).await {
                    Ok(names) => Listed::VirtualNodes(names),
                    Err(source) => {
                        report(&err_tx, list_error(ResourceKind::VirtualNode, &mesh, &mesh, source))
                            .await;
                        Listed::Failed
                    }
                }
            });
        }

        {
            let api = Arc::clone(&self.api);
            let err_tx = err_tx.clone();
            let mesh = mesh.to_string();
            tasks.spawn(async move {
                match api.list_virtual_services(&mesh).await {
                    Ok(names) => Listed::VirtualServices(names),
                    Err(source) => {
                        report(
                            &err_tx,
                            list_error(ResourceKind::VirtualService, &mesh, &mesh, source),
                        )
                        .await;
                        Listed::Failed
                    }
                }
            });
        }

        tasks.spawn(list_routers(
            Arc::clone(&self.api),
            mesh.to_string(),
            Arc::clone(&routes),
            err_tx.clone(),
        ));

        // The receiver completes once every task, nested ones included, has
        // dropped its sender.
        drop(err_tx);

        let drain = async {
            let mut errors = AggregateError::new();
            while let Some(err) = err_rx.recv().await {
                errors.push(err);
            }
            errors
        };

        let join = async {
            let mut virtual_nodes = Vec::new();
            let mut virtual_services = Vec::new();
            let mut panicked = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Listed::VirtualNodes(names)) => virtual_nodes = names,
                    Ok(Listed::VirtualServices(names)) => virtual_services = names,
                    Ok(Listed::VirtualRouters) | Ok(Listed::Failed) => {}
                    Err(e) => panicked.push(ReconcileError::Task(e)),
                }
            }
            (virtual_nodes, virtual_services, panicked)
        };

        let (mut errors, (virtual_nodes, virtual_services, panicked)) = tokio::join!(drain, join);
        for err in panicked {
            errors.push(err);
        }

        if let Err(errors) = errors.into_result() {
            warn!("Listing mesh {} failed: {}", mesh, errors);
            return Err(ReconcileError::Listing(errors));
        }

        let routes_by_router = std::mem::take(&mut *routes.lock().await);
        debug!(
            "Mesh {}: {} virtual nodes, {} virtual services, {} virtual routers",
            mesh,
            virtual_nodes.len(),
            virtual_services.len(),
            routes_by_router.len()
        );

        Ok(ExistingResources {
            virtual_nodes,
            virtual_services,
            routes_by_router,
        })
    }
}

/// List routers, then the routes of each router concurrently.
async fn list_routers(
    api: Arc<dyn MeshApi>,
    mesh: String,
    routes: RouteMap,
    err_tx: mpsc::Sender<ReconcileError>,
) -> Listed {
    let routers = match api.list_virtual_routers(&mesh).await {
        Ok(routers) => routers,
        Err(source) => {
            report(&err_tx, list_error(ResourceKind::VirtualRouter, &mesh, &mesh, source)).await;
            return Listed::Failed;
        }
    };

    let mut route_tasks = JoinSet::new();
    for router in routers {
        let api = Arc::clone(&api);
        let err_tx = err_tx.clone();
        let routes = Arc::clone(&routes);
        let mesh = mesh.clone();
        route_tasks.spawn(async move {
            match api.list_routes(&mesh, &router).await {
                Ok(names) => {
                    routes.lock().await.insert(router, names);
                }
                Err(source) => {
                    report(&err_tx, list_error(ResourceKind::Route, &mesh, &router, source)).await;
                }
            }
        });
    }

    while let Some(joined) = route_tasks.join_next().await {
        if let Err(e) = joined {
            report(&err_tx, ReconcileError::Task(e)).await;
        }
    }

    Listed::VirtualRouters
}

fn list_error(
    kind: ResourceKind,
    mesh: &str,
    scope: &str,
    source: ApiError,
) -> ReconcileError {
    ReconcileError::operation(Operation::List, kind, mesh, scope, source)
}

async fn report(err_tx: &mpsc::Sender<ReconcileError>, err: ReconcileError) {
    // The receiver lives until every sender is gone, so this only fails if
    // the whole listing was dropped.
    if let Err(mpsc::error::SendError(err)) = err_tx.send(err).await {
        debug!("Dropping listing error after cancellation: {}", err);
    }
}
