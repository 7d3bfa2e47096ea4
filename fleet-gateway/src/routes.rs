//! Axum route handlers for the fleet gateway API.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use fleet_core::ResourceKind;
use fleet_executor::{CreateVmRequest, StartOptions, VmLifecycleController};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::GatewayError;

// ── Shared state ─────────────────────────────────────────────────────────────

type Controller = Arc<VmLifecycleController>;

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVmBody {
    pub name: String,
    pub cores: Option<u32>,
    pub memory_mib: Option<u64>,
    pub disk_gib: Option<u32>,
    pub storage: Option<String>,
    pub bridge: Option<String>,
    #[serde(default)]
    pub extra: IndexMap<String, Value>,
}

impl CreateVmBody {
    fn into_request(self) -> CreateVmRequest {
        let mut request = CreateVmRequest::new(self.name);
        if let Some(cores) = self.cores {
            request.cores = cores;
        }
        if let Some(memory_mib) = self.memory_mib {
            request.memory_mib = memory_mib;
        }
        if let Some(disk_gib) = self.disk_gib {
            request.disk_gib = disk_gib;
        }
        if let Some(storage) = self.storage {
            request.storage = storage;
        }
        if let Some(bridge) = self.bridge {
            request.bridge = bridge;
        }
        request.extra = self.extra;
        request
    }
}

/// Optional IP wait window, in seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitQuery {
    pub wait_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct BootOrderBody {
    pub order: String,
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Build the application router around one lifecycle controller.
pub fn create_router(controller: Controller) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/health", get(node_health))
        .route("/v1/auth", post(authenticate))
        .route("/v1/vms", post(create_vm))
        .route("/v1/vms/{name}", get(read_vm).delete(delete_vm))
        .route("/v1/vms/{name}/lookup", post(lookup_vm))
        .route("/v1/vms/{name}/start", post(start_vm))
        .route("/v1/vms/{name}/stop", post(stop_vm))
        .route("/v1/vms/{name}/boot-order", put(set_boot_order))
        .route("/v1/vms/{name}/config", put(set_config))
        .route("/v1/sync", post(sync))
        .route("/v1/resources/{kind}/{name}", get(read_resource))
        .with_state(controller)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// `GET /health`: liveness probe; does not contact the hypervisor.
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

/// `GET /v1/health`: hypervisor reachability and credentials.
///
/// # Errors
/// Returns the session or HTTP error from the node status query.
pub async fn node_health(State(controller): State<Controller>) -> Result<impl IntoResponse, GatewayError> {
    let node = controller.health_check().await?;
    Ok(Json(node))
}

/// `POST /v1/auth`: mint a fresh session, bypassing the cache.
///
/// # Errors
/// Returns a configuration or authentication error.
pub async fn authenticate(State(controller): State<Controller>) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(controller.authenticate().await?))
}

/// `POST /v1/vms`: create a VM.
///
/// # Errors
/// Propagates lifecycle errors.
pub async fn create_vm(
    State(controller): State<Controller>,
    Json(body): Json<CreateVmBody>,
) -> Result<impl IntoResponse, GatewayError> {
    let outcome = controller.create(&body.into_request()).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// `POST /v1/vms/{name}/start?waitSecs=&pollIntervalSecs=`
///
/// # Errors
/// Propagates lifecycle errors, including the IP discovery timeout.
pub async fn start_vm(
    State(controller): State<Controller>,
    Path(name): Path<String>,
    Query(wait): Query<WaitQuery>,
) -> Result<impl IntoResponse, GatewayError> {
    let defaults = controller.default_start_options();
    let options = StartOptions::new(
        wait.wait_secs.map_or(defaults.wait, Duration::from_secs),
        wait.poll_interval_secs.map_or(defaults.poll_interval, Duration::from_secs),
    );
    Ok(Json(controller.start(&name, options).await?))
}

/// `POST /v1/vms/{name}/stop`
///
/// # Errors
/// Propagates lifecycle errors.
pub async fn stop_vm(
    State(controller): State<Controller>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(controller.stop(&name).await?))
}

/// `DELETE /v1/vms/{name}`
///
/// # Errors
/// Propagates lifecycle errors.
pub async fn delete_vm(
    State(controller): State<Controller>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(controller.delete(&name).await?))
}

/// `PUT /v1/vms/{name}/boot-order` with `{"order": "order=scsi0;net0"}`.
///
/// # Errors
/// Propagates lifecycle errors.
pub async fn set_boot_order(
    State(controller): State<Controller>,
    Path(name): Path<String>,
    Json(body): Json<BootOrderBody>,
) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(controller.set_boot_order(&name, &body.order).await?))
}

/// `PUT /v1/vms/{name}/config` with a JSON object of raw config keys.
///
/// # Errors
/// Returns 400 for an empty object; otherwise propagates lifecycle errors.
pub async fn set_config(
    State(controller): State<Controller>,
    Path(name): Path<String>,
    Json(config): Json<IndexMap<String, Value>>,
) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(controller.set_config(&name, &config).await?))
}

/// `GET /v1/vms/{name}`: latest recorded state; makes no hypervisor call.
///
/// # Errors
/// Returns 404 when no record exists for `name`.
pub async fn read_vm(
    State(controller): State<Controller>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(controller.read_latest(&ResourceKind::vm(), &name).await?))
}

/// `POST /v1/vms/{name}/lookup?waitSecs=`: resolve the VM and record a new
/// version of its current state.
///
/// # Errors
/// Propagates lifecycle errors.
pub async fn lookup_vm(
    State(controller): State<Controller>,
    Path(name): Path<String>,
    Query(wait): Query<WaitQuery>,
) -> Result<impl IntoResponse, GatewayError> {
    let wait = wait.wait_secs.map(Duration::from_secs);
    Ok(Json(controller.lookup(&name, wait).await?))
}

/// `POST /v1/sync`: record every VM on the node.
///
/// # Errors
/// Propagates lifecycle errors.
pub async fn sync(State(controller): State<Controller>) -> Result<impl IntoResponse, GatewayError> {
    Ok(Json(controller.sync().await?))
}

/// `GET /v1/resources/{kind}/{name}`: latest stored version.
///
/// # Errors
/// Returns 400 for an invalid kind and 404 when nothing was recorded.
pub async fn read_resource(
    State(controller): State<Controller>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, GatewayError> {
    let kind = ResourceKind::new(kind)?;
    if kind == ResourceKind::auth_session() {
        return Err(GatewayError::InvalidRequest(
            "auth sessions are not readable over HTTP".to_owned(),
        ));
    }
    Ok(Json(controller.read_latest(&kind, &name).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use fleet_executor::{
        ApiRequest, ApiResponse, ConnectionParams, ExecutorError, FleetConfig, HypervisorTransport,
        MemoryResourceStore,
    };
    use tower::ServiceExt;

    /// Node with one stopped VM named `alpha`.
    struct OneVmNode;

    #[async_trait]
    impl HypervisorTransport for OneVmNode {
        async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ExecutorError> {
            let body = match (request.method.as_str(), request.path.as_str()) {
                ("POST", "/access/ticket") => {
                    r#"{"data":{"ticket":"PVE:t","CSRFPreventionToken":"c","username":"root@pam"}}"#
                }
                ("GET", "/nodes/pve/qemu") => r#"{"data":[{"vmid":101,"name":"alpha","status":"stopped"}]}"#,
                ("GET", "/nodes/pve/status") => r#"{"data":{"uptime":42,"pveversion":"pve-manager/8.2.2"}}"#,
                _ => return Ok(ApiResponse::new(501, "not scripted")),
            };
            Ok(ApiResponse::new(200, body))
        }
    }

    fn test_router() -> Router {
        let config = FleetConfig::new(
            ConnectionParams::new("https://pve:8006/api2/json", "pve").with_password("root@pam", "pw"),
        );
        let controller =
            VmLifecycleController::new(Arc::new(OneVmNode), Arc::new(MemoryResourceStore::new()), config);
        create_router(Arc::new(controller))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        };
        let req = match req {
            Ok(r) => r,
            Err(e) => panic!("failed to build request: {e}"),
        };
        let resp = match app.clone().oneshot(req).await {
            Ok(r) => r,
            Err(e) => panic!("handler error: {e}"),
        };
        let status = resp.status();
        let bytes = match axum::body::to_bytes(resp.into_body(), 64 * 1024).await {
            Ok(b) => b,
            Err(e) => panic!("failed to read body: {e}"),
        };
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_response_format_returns_ok_with_status_field() {
        let (status, body) = send(&test_router(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn node_health_reports_version() {
        let (status, body) = send(&test_router(), Method::GET, "/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pveversion"], "pve-manager/8.2.2");
    }

    #[tokio::test]
    async fn stop_then_read_resource_returns_latest_record() {
        let app = test_router();

        let (status, _) = send(&app, Method::GET, "/v1/resources/vm/alpha", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "nothing recorded yet");

        let (status, body) = send(&app, Method::POST, "/v1/vms/alpha/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"]["version"], 1);
        assert_eq!(body["report"]["stopIssued"], false);

        let (status, body) = send(&app, Method::GET, "/v1/resources/vm/alpha", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["attributes"]["status"], "stopped");
        assert_eq!(body["attributes"]["vmid"], 101);
    }

    #[tokio::test]
    async fn reading_a_vm_does_not_record_and_lookup_does() {
        let app = test_router();

        let (status, _) = send(&app, Method::GET, "/v1/vms/alpha", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "GET must not create a record");

        let (status, body) = send(&app, Method::POST, "/v1/vms/alpha/lookup", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"]["version"], 1);

        for _ in 0..2 {
            let (status, body) = send(&app, Method::GET, "/v1/vms/alpha", None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["version"], 1);
            assert_eq!(body["attributes"]["operation"], "lookup");
        }
    }

    #[tokio::test]
    async fn maximal_wait_query_is_accepted() {
        let (status, body) = send(
            &test_router(),
            Method::POST,
            "/v1/vms/alpha/lookup?waitSecs=18446744073709551615",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
        assert_eq!(body["report"]["status"], "stopped");
    }

    #[tokio::test]
    async fn unknown_vm_is_not_found_with_available_names() {
        let (status, body) = send(&test_router(), Method::POST, "/v1/vms/delta/stop", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let message = body["error"].as_str().unwrap_or_default();
        assert!(message.contains("alpha"), "error should list available VMs: {message}");
    }

    #[tokio::test]
    async fn empty_config_is_bad_request() {
        let body = serde_json::json!({});
        let (status, _) = send(&test_router(), Method::PUT, "/v1/vms/alpha/config", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn auth_session_resource_is_not_exposed() {
        let (status, _) = send(&test_router(), Method::GET, "/v1/resources/auth-session/current", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn create_body_applies_overrides() {
        let body: CreateVmBody = match serde_json::from_value(serde_json::json!({
            "name": "game-01",
            "cores": 4,
            "diskGib": 32,
            "extra": {"ostype": "l26"}
        })) {
            Ok(b) => b,
            Err(e) => panic!("invalid body: {e}"),
        };
        let request = body.into_request();
        assert_eq!(request.cores, 4);
        assert_eq!(request.memory_mib, 1024, "default memory kept");
        assert_eq!(request.boot_order(), "order=scsi0;net0");
        assert_eq!(request.extra["ostype"], "l26");
    }
}
