//! AppMeshClient against a stub App Mesh REST server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use meshplane_appmesh::snapshot::{RouteData, RouteSpec, VirtualNodeData, VirtualNodeSpec};
use meshplane_appmesh::{
    ApiError, AppMeshClient, AppMeshClientConfig, MeshApi, MeshReconciler, ResourceKind,
};

/// Requests seen by the stub.
#[derive(Default)]
struct Recorded {
    bodies: Mutex<Vec<Value>>,
    list_queries: Mutex<Vec<HashMap<String, String>>>,
}

type Shared = Arc<Recorded>;

fn metadata() -> Value {
    json!({"arn": "arn:aws:appmesh:us-east-1:000000000000:mesh/mesh-a", "uid": "uid-1", "version": 1})
}

async fn describe_mesh(Path(mesh): Path<String>) -> Response {
    if mesh == "mesh-a" {
        Json(json!({"meshName": mesh, "spec": {}, "metadata": metadata()})).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            [("x-amzn-errortype", "NotFoundException:http://internal.amazon.com/coral/")],
            Json(json!({"message": "Mesh not found"})),
        )
            .into_response()
    }
}

async fn list_nodes(
    State(recorded): State<Shared>,
    Path(mesh): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let token = query.get("nextToken").cloned();
    recorded.list_queries.lock().await.push(query);
    match token.as_deref() {
        None => Json(json!({
            "virtualNodes": [
                {"meshName": mesh, "virtualNodeName": "vn-1", "arn": "a1"},
                {"meshName": mesh, "virtualNodeName": "vn-2", "arn": "a2"}
            ],
            "nextToken": "page-2"
        })),
        Some("page-2") => Json(json!({
            "virtualNodes": [{"meshName": mesh, "virtualNodeName": "vn-3", "arn": "a3"}]
        })),
        Some(_) => Json(json!({"virtualNodes": []})),
    }
}

async fn create_node(
    State(recorded): State<Shared>,
    Path(mesh): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    recorded.bodies.lock().await.push(body.clone());
    Json(json!({
        "meshName": mesh,
        "virtualNodeName": body["virtualNodeName"],
        "spec": body["spec"],
        "metadata": metadata()
    }))
}

async fn list_routes(Path((mesh, router)): Path<(String, String)>) -> Json<Value> {
    Json(json!({
        "routes": [
            {"meshName": mesh, "virtualRouterName": router, "routeName": "r-1"},
            {"meshName": mesh, "virtualRouterName": router, "routeName": "r-2"}
        ]
    }))
}

async fn update_route(
    State(recorded): State<Shared>,
    Path((mesh, router, route)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Json<Value> {
    recorded.bodies.lock().await.push(body.clone());
    Json(json!({
        "meshName": mesh,
        "virtualRouterName": router,
        "routeName": route,
        "spec": body["spec"],
        "metadata": metadata()
    }))
}

async fn delete_service() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"__type": "InternalServerErrorException", "message": "boom"})),
    )
        .into_response()
}

/// Spawn the stub on an OS-assigned port and return a client pointed at it.
async fn spawn_stub() -> (AppMeshClient, Shared) {
    let recorded = Shared::default();
    let app = Router::new()
        .route("/v20190125/meshes/{mesh}", get(describe_mesh))
        .route(
            "/v20190125/meshes/{mesh}/virtualNodes",
            get(list_nodes).put(create_node),
        )
        .route(
            "/v20190125/meshes/{mesh}/virtualRouter/{router}/routes",
            get(list_routes),
        )
        .route(
            "/v20190125/meshes/{mesh}/virtualRouter/{router}/routes/{route}",
            put(update_route),
        )
        .route(
            "/v20190125/meshes/{mesh}/virtualServices/{name}",
            delete(delete_service),
        )
        .with_state(recorded.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server error");
    });

    let client = AppMeshClient::new(AppMeshClientConfig {
        endpoint: format!("http://{}", addr),
        page_size: 2,
        request_timeout: Duration::from_secs(5),
    })
    .unwrap();
    (client, recorded)
}

#[tokio::test]
async fn test_describe_mesh() {
    let (client, _) = spawn_stub().await;

    let mesh = client.describe_mesh("mesh-a").await.unwrap();

    assert_eq!(mesh.mesh_name, "mesh-a");
    assert_eq!(mesh.metadata.unwrap().version, 1);
}

#[tokio::test]
async fn test_missing_mesh_is_not_found() {
    let (client, _) = spawn_stub().await;

    let err = client.describe_mesh("mesh-missing").await.unwrap_err();

    assert!(err.is_not_found());
    assert!(matches!(
        err,
        ApiError::NotFound { kind: ResourceKind::Mesh, ref name } if name == "mesh-missing"
    ));
}

#[tokio::test]
async fn test_list_drains_every_page() {
    let (client, recorded) = spawn_stub().await;

    let names = client.list_virtual_nodes("mesh-a").await.unwrap();

    assert_eq!(names, vec!["vn-1", "vn-2", "vn-3"]);
    let queries = recorded.list_queries.lock().await;
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].get("limit").map(String::as_str), Some("2"));
    assert!(queries[0].get("nextToken").is_none());
    assert_eq!(queries[1].get("nextToken").map(String::as_str), Some("page-2"));
}

#[tokio::test]
async fn test_create_sends_name_spec_and_client_token() {
    let (client, recorded) = spawn_stub().await;
    let node = VirtualNodeData::new("vn-9", VirtualNodeSpec::default());

    let created = client.create_virtual_node("mesh-a", &node).await.unwrap();

    assert_eq!(created.virtual_node_name, "vn-9");
    assert_eq!(created.mesh_name, "mesh-a");
    assert!(created.metadata.is_some());

    let bodies = recorded.bodies.lock().await;
    assert_eq!(bodies[0]["virtualNodeName"], "vn-9");
    assert_eq!(bodies[0]["spec"], json!({}));
    let token = bodies[0]["clientToken"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(token).is_ok());
}

#[tokio::test]
async fn test_route_calls_use_router_path() {
    let (client, recorded) = spawn_stub().await;

    let names = client.list_routes("mesh-a", "vr-1").await.unwrap();
    assert_eq!(names, vec!["r-1", "r-2"]);

    let route = RouteData::new("vr-1", "r-1", RouteSpec::default());
    let updated = client.update_route("mesh-a", &route).await.unwrap();
    assert_eq!(updated.virtual_router_name, "vr-1");
    assert_eq!(updated.route_name, "r-1");

    let bodies = recorded.bodies.lock().await;
    // Updates carry the spec; the name is in the path.
    assert!(bodies[0].get("routeName").is_none());
    assert!(bodies[0].get("clientToken").is_some());
}

#[tokio::test]
async fn test_server_error_is_opaque() {
    let (client, _) = spawn_stub().await;

    let err = client
        .delete_virtual_service("mesh-a", "vs-1")
        .await
        .unwrap_err();

    assert!(!err.is_not_found());
    match err {
        ApiError::Status {
            status,
            code,
            message,
        } => {
            assert_eq!(status, 500);
            assert_eq!(code, "InternalServerErrorException");
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unrouted_path_is_opaque() {
    let (client, _) = spawn_stub().await;

    // The stub has no virtual router routes, so axum answers a bare 404.
    let err = client
        .describe_virtual_router("mesh-a", "vr-1")
        .await
        .unwrap_err();

    assert!(!err.is_not_found());
    assert!(matches!(err, ApiError::Status { status: 404, .. }));
}

#[tokio::test]
async fn test_teardown_through_wrong_prefix_fails() {
    // Every path answers a bare 404, as a misconfigured gateway would.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, Router::new()).await.expect("Server error");
    });

    let client = AppMeshClient::new(AppMeshClientConfig {
        endpoint: format!("http://{}/wrong-prefix", addr),
        page_size: 2,
        request_timeout: Duration::from_secs(5),
    })
    .unwrap();
    let api: Arc<dyn MeshApi> = Arc::new(client);
    let reconciler = MeshReconciler::new(api);

    let err = reconciler.teardown("prod-mesh").await.unwrap_err();

    assert!(!err.is_not_found());
    assert!(err.to_string().contains("failed to describe mesh prod-mesh"), "{err}");
}
