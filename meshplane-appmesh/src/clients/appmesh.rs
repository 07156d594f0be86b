//! Client for the App Mesh REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{MeshApi, Result};
use crate::error::ApiError;
use crate::snapshot::{
    MeshData, MeshSpec, ResourceKind, RouteData, VirtualNodeData, VirtualRouterData,
    VirtualServiceData,
};

const API_VERSION: &str = "v20190125";

/// Header App Mesh uses to carry the error code.
const ERROR_TYPE_HEADER: &str = "x-amzn-errortype";

/// Error code App Mesh returns for missing objects.
const NOT_FOUND_CODE: &str = "NotFoundException";

/// Connection settings for [`AppMeshClient`].
#[derive(Debug, Clone)]
pub struct AppMeshClientConfig {
    /// Base URL, e.g. `https://appmesh.us-east-1.amazonaws.com`.
    pub endpoint: String,
    /// Requested page size for list calls.
    pub page_size: u32,
    pub request_timeout: Duration,
}

impl Default for AppMeshClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://appmesh.us-east-1.amazonaws.com".to_string(),
            page_size: 100,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Client for interacting with App Mesh.
#[derive(Debug, Clone)]
pub struct AppMeshClient {
    http: reqwest::Client,
    base: Url,
    page_size: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default, rename = "__type")]
    error_type: Option<String>,
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

/// One page of a list response. Items only carry what is needed to name them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage<T> {
    #[serde(
        default = "Vec::new",
        alias = "virtualNodes",
        alias = "virtualRouters",
        alias = "routes",
        alias = "virtualServices"
    )]
    items: Vec<T>,
    #[serde(default)]
    next_token: Option<String>,
}

trait NamedRef: DeserializeOwned {
    fn into_name(self) -> String;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VirtualNodeRef {
    virtual_node_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VirtualRouterRef {
    virtual_router_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteRef {
    route_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VirtualServiceRef {
    virtual_service_name: String,
}

impl NamedRef for VirtualNodeRef {
    fn into_name(self) -> String {
        self.virtual_node_name
    }
}

impl NamedRef for VirtualRouterRef {
    fn into_name(self) -> String {
        self.virtual_router_name
    }
}

impl NamedRef for RouteRef {
    fn into_name(self) -> String {
        self.route_name
    }
}

impl NamedRef for VirtualServiceRef {
    fn into_name(self) -> String {
        self.virtual_service_name
    }
}

/// Map a failed response onto [`ApiError`].
///
/// The error code comes from the `x-amzn-ErrorType` header (which may carry a
/// `:`-separated suffix) or the `__type` body field. Only `NotFoundException`
/// becomes [`ApiError::NotFound`]; a 404 without a code comes from something
/// other than App Mesh (wrong endpoint or path prefix) and stays opaque.
pub fn classify_error(
    kind: ResourceKind,
    name: &str,
    status: u16,
    error_type: Option<&str>,
    body: &[u8],
) -> ApiError {
    let payload: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let code = error_type
        .map(str::to_string)
        .or(payload.error_type)
        .map(|code| match code.split_once(':') {
            Some((head, _)) => head.to_string(),
            None => code,
        })
        // `__type` may be namespaced, e.g. `com.amazonaws.appmesh#NotFoundException`.
        .map(|code| match code.rsplit_once('#') {
            Some((_, tail)) => tail.to_string(),
            None => code,
        });

    match code {
        Some(code) if code == NOT_FOUND_CODE => ApiError::NotFound {
            kind,
            name: name.to_string(),
        },
        code => ApiError::Status {
            status,
            code: code.unwrap_or_else(|| "UnknownError".to_string()),
            message: payload
                .message
                .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned()),
        },
    }
}

impl AppMeshClient {
    pub fn new(config: AppMeshClientConfig) -> Result<Self> {
        let base = Url::parse(&config.endpoint)
            .map_err(|e| ApiError::InvalidEndpoint(format!("{}: {}", config.endpoint, e)))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidEndpoint(config.endpoint));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base,
            page_size: config.page_size.max(1),
        })
    }

    /// Build `{base}/v20190125/meshes/{segments...}` with each segment escaped.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .push(API_VERSION)
            .push("meshes")
            .extend(segments);
        Ok(url)
    }

    /// Send a request, returning the raw body of a successful response.
    async fn execute(
        &self,
        request: RequestBuilder,
        kind: ResourceKind,
        name: &str,
    ) -> Result<Vec<u8>> {
        let response = request.send().await?;
        let status = response.status();
        let error_type = response
            .headers()
            .get(ERROR_TYPE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        if status.is_success() {
            Ok(body.to_vec())
        } else {
            Err(classify_error(
                kind,
                name,
                status.as_u16(),
                error_type.as_deref(),
                &body,
            ))
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        kind: ResourceKind,
        name: &str,
    ) -> Result<T> {
        let body = self.execute(request, kind, name).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Drain every page of a list call.
    async fn list_names<T: NamedRef>(
        &self,
        segments: &[&str],
        kind: ResourceKind,
        scope: &str,
    ) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;
        let mut pages = 0;

        loop {
            let mut url = self.url(segments)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("limit", &self.page_size.to_string());
                if let Some(token) = &next_token {
                    query.append_pair("nextToken", token);
                }
            }

            let page: ListPage<T> = self.fetch(self.http.get(url), kind, scope).await?;
            pages += 1;
            names.extend(page.items.into_iter().map(NamedRef::into_name));

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        debug!("Listed {} {}s in {} ({} pages)", names.len(), kind, scope, pages);
        Ok(names)
    }

    fn client_token() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[async_trait]
impl MeshApi for AppMeshClient {
    async fn describe_mesh(&self, mesh: &str) -> Result<MeshData> {
        debug!("Describing mesh {}", mesh);
        let url = self.url(&[mesh])?;
        self.fetch(self.http.get(url), ResourceKind::Mesh, mesh)
            .await
    }

    async fn create_mesh(&self, mesh: &str, spec: &MeshSpec) -> Result<MeshData> {
        debug!("Creating mesh {}", mesh);
        let url = self.url(&[])?;
        let body = json!({
            "meshName": mesh,
            "spec": spec,
            "clientToken": Self::client_token(),
        });
        self.fetch(self.http.put(url).json(&body), ResourceKind::Mesh, mesh)
            .await
    }

    async fn delete_mesh(&self, mesh: &str) -> Result<()> {
        debug!("Deleting mesh {}", mesh);
        let url = self.url(&[mesh])?;
        self.execute(self.http.delete(url), ResourceKind::Mesh, mesh)
            .await?;
        Ok(())
    }

    async fn describe_virtual_node(&self, mesh: &str, name: &str) -> Result<VirtualNodeData> {
        debug!("Describing virtual node {} in {}", name, mesh);
        let url = self.url(&[mesh, "virtualNodes", name])?;
        self.fetch(self.http.get(url), ResourceKind::VirtualNode, name)
            .await
    }

    async fn list_virtual_nodes(&self, mesh: &str) -> Result<Vec<String>> {
        self.list_names::<VirtualNodeRef>(&[mesh, "virtualNodes"], ResourceKind::VirtualNode, mesh)
            .await
    }

    async fn create_virtual_node(
        &self,
        mesh: &str,
        node: &VirtualNodeData,
    ) -> Result<VirtualNodeData> {
        debug!("Creating virtual node {} in {}", node.virtual_node_name, mesh);
        let url = self.url(&[mesh, "virtualNodes"])?;
        let body = json!({
            "virtualNodeName": node.virtual_node_name,
            "spec": node.spec,
            "clientToken": Self::client_token(),
        });
        self.fetch(
            self.http.put(url).json(&body),
            ResourceKind::VirtualNode,
            &node.virtual_node_name,
        )
        .await
    }

    async fn update_virtual_node(
        &self,
        mesh: &str,
        node: &VirtualNodeData,
    ) -> Result<VirtualNodeData> {
        debug!("Updating virtual node {} in {}", node.virtual_node_name, mesh);
        let url = self.url(&[mesh, "virtualNodes", &node.virtual_node_name])?;
        let body = json!({
            "spec": node.spec,
            "clientToken": Self::client_token(),
        });
        self.fetch(
            self.http.put(url).json(&body),
            ResourceKind::VirtualNode,
            &node.virtual_node_name,
        )
        .await
    }

    async fn delete_virtual_node(&self, mesh: &str, name: &str) -> Result<()> {
        debug!("Deleting virtual node {} in {}", name, mesh);
        let url = self.url(&[mesh, "virtualNodes", name])?;
        self.execute(self.http.delete(url), ResourceKind::VirtualNode, name)
            .await?;
        Ok(())
    }

    async fn describe_virtual_router(&self, mesh: &str, name: &str) -> Result<VirtualRouterData> {
        debug!("Describing virtual router {} in {}", name, mesh);
        let url = self.url(&[mesh, "virtualRouters", name])?;
        self.fetch(self.http.get(url), ResourceKind::VirtualRouter, name)
            .await
    }

    async fn list_virtual_routers(&self, mesh: &str) -> Result<Vec<String>> {
        self.list_names::<VirtualRouterRef>(
            &[mesh, "virtualRouters"],
            ResourceKind::VirtualRouter,
            mesh,
        )
        .await
    }

    async fn create_virtual_router(
        &self,
        mesh: &str,
        router: &VirtualRouterData,
    ) -> Result<VirtualRouterData> {
        debug!("Creating virtual router {} in {}", router.virtual_router_name, mesh);
        let url = self.url(&[mesh, "virtualRouters"])?;
        let body = json!({
            "virtualRouterName": router.virtual_router_name,
            "spec": router.spec,
            "clientToken": Self::client_token(),
        });
        self.fetch(
            self.http.put(url).json(&body),
            ResourceKind::VirtualRouter,
            &router.virtual_router_name,
        )
        .await
    }

    async fn update_virtual_router(
        &self,
        mesh: &str,
        router: &VirtualRouterData,
    ) -> Result<VirtualRouterData> {
        debug!("Updating virtual router {} in {}", router.virtual_router_name, mesh);
        let url = self.url(&[mesh, "virtualRouters", &router.virtual_router_name])?;
        let body = json!({
            "spec": router.spec,
            "clientToken": Self::client_token(),
        });
        self.fetch(
            self.http.put(url).json(&body),
            ResourceKind::VirtualRouter,
            &router.virtual_router_name,
        )
        .await
    }

    async fn delete_virtual_router(&self, mesh: &str, name: &str) -> Result<()> {
        debug!("Deleting virtual router {} in {}", name, mesh);
        let url = self.url(&[mesh, "virtualRouters", name])?;
        self.execute(self.http.delete(url), ResourceKind::VirtualRouter, name)
            .await?;
        Ok(())
    }

    // Route paths use the singular `virtualRouter` segment.

    async fn describe_route(&self, mesh: &str, router: &str, name: &str) -> Result<RouteData> {
        debug!("Describing route {} of {} in {}", name, router, mesh);
        let url = self.url(&[mesh, "virtualRouter", router, "routes", name])?;
        self.fetch(self.http.get(url), ResourceKind::Route, name)
            .await
    }

    async fn list_routes(&self, mesh: &str, router: &str) -> Result<Vec<String>> {
        self.list_names::<RouteRef>(
            &[mesh, "virtualRouter", router, "routes"],
            ResourceKind::Route,
            router,
        )
        .await
    }

    async fn create_route(&self, mesh: &str, route: &RouteData) -> Result<RouteData> {
        debug!(
            "Creating route {} of {} in {}",
            route.route_name, route.virtual_router_name, mesh
        );
        let url = self.url(&[mesh, "virtualRouter", &route.virtual_router_name, "routes"])?;
        let body = json!({
            "routeName": route.route_name,
            "spec": route.spec,
            "clientToken": Self::client_token(),
        });
        self.fetch(
            self.http.put(url).json(&body),
            ResourceKind::Route,
            &route.route_name,
        )
        .await
    }

    async fn update_route(&self, mesh: &str, route: &RouteData) -> Result<RouteData> {
        debug!(
            "Updating route {} of {} in {}",
            route.route_name, route.virtual_router_name, mesh
        );
        let url = self.url(&[
            mesh,
            "virtualRouter",
            &route.virtual_router_name,
            "routes",
            &route.route_name,
        ])?;
        let body = json!({
            "spec": route.spec,
            "clientToken": Self::client_token(),
        });
        self.fetch(
            self.http.put(url).json(&body),
            ResourceKind::Route,
            &route.route_name,
        )
        .await
    }

    async fn delete_route(&self, mesh: &str, router: &str, name: &str) -> Result<()> {
        debug!("Deleting route {} of {} in {}", name, router, mesh);
        let url = self.url(&[mesh, "virtualRouter", router, "routes", name])?;
        self.execute(self.http.delete(url), ResourceKind::Route, name)
            .await?;
        Ok(())
    }

    async fn describe_virtual_service(
        &self,
        mesh: &str,
        name: &str,
    ) -> Result<VirtualServiceData> {
        debug!("Describing virtual service {} in {}", name, mesh);
        let url = self.url(&[mesh, "virtualServices", name])?;
        self.fetch(self.http.get(url), ResourceKind::VirtualService, name)
            .await
    }

    async fn list_virtual_services(&self, mesh: &str) -> Result<Vec<String>> {
        self.list_names::<VirtualServiceRef>(
            &[mesh, "virtualServices"],
            ResourceKind::VirtualService,
            mesh,
        )
        .await
    }

    async fn create_virtual_service(
        &self,
        mesh: &str,
        service: &VirtualServiceData,
    ) -> Result<VirtualServiceData> {
        debug!(
            "Creating virtual service {} in {}",
            service.virtual_service_name, mesh
        );
        let url = self.url(&[mesh, "virtualServices"])?;
        let body = json!({
            "virtualServiceName": service.virtual_service_name,
            "spec": service.spec,
            "clientToken": Self::client_token(),
        });
        self.fetch(
            self.http.put(url).json(&body),
            ResourceKind::VirtualService,
            &service.virtual_service_name,
        )
        .await
    }

    async fn update_virtual_service(
        &self,
        mesh: &str,
        service: &VirtualServiceData,
    ) -> Result<VirtualServiceData> {
        debug!(
            "Updating virtual service {} in {}",
            service.virtual_service_name, mesh
        );
        let url = self.url(&[mesh, "virtualServices", &service.virtual_service_name])?;
        let body = json!({
            "spec": service.spec,
            "clientToken": Self::client_token(),
        });
        self.fetch(
            self.http.put(url).json(&body),
            ResourceKind::VirtualService,
            &service.virtual_service_name,
        )
        .await
    }

    async fn delete_virtual_service(&self, mesh: &str, name: &str) -> Result<()> {
        debug!("Deleting virtual service {} in {}", name, mesh);
        let url = self.url(&[mesh, "virtualServices", name])?;
        self.execute(self.http.delete(url), ResourceKind::VirtualService, name)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found_from_header() {
        let err = classify_error(
            ResourceKind::Mesh,
            "mesh-a",
            404,
            Some("NotFoundException:http://internal.amazon.com/coral/com.amazonaws.appmesh/"),
            b"{\"message\":\"Mesh not found\"}",
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_not_found_from_body_type() {
        let err = classify_error(
            ResourceKind::VirtualNode,
            "vn-1",
            400,
            None,
            b"{\"__type\":\"com.amazonaws.appmesh#NotFoundException\",\"message\":\"nope\"}",
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_bare_404_is_opaque() {
        let err = classify_error(ResourceKind::Route, "r-1", 404, None, b"");
        assert!(!err.is_not_found());
        assert!(matches!(err, ApiError::Status { status: 404, .. }));
    }

    #[test]
    fn test_classify_other_codes_are_opaque() {
        let err = classify_error(
            ResourceKind::VirtualRouter,
            "vr-1",
            409,
            Some("ResourceInUseException"),
            b"{\"message\":\"router has routes\"}",
        );
        assert!(!err.is_not_found());
        match err {
            ApiError::Status {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 409);
                assert_eq!(code, "ResourceInUseException");
                assert_eq!(message, "router has routes");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_classify_unparseable_body_keeps_text() {
        let err = classify_error(ResourceKind::Mesh, "mesh-a", 503, None, b"upstream timeout");
        assert_eq!(err.to_string(), "UnknownError (HTTP 503): upstream timeout");
    }

    #[test]
    fn test_url_escapes_segments() {
        let client = AppMeshClient::new(AppMeshClientConfig {
            endpoint: "http://localhost:9000/".to_string(),
            ..Default::default()
        })
        .unwrap();

        let url = client.url(&["mesh a", "virtualNodes"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9000/v20190125/meshes/mesh%20a/virtualNodes"
        );
    }

    #[test]
    fn test_rejects_invalid_endpoint() {
        let err = AppMeshClient::new(AppMeshClientConfig {
            endpoint: "not a url".to_string(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidEndpoint(_)));
    }
}
