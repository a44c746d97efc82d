// SPDX-License-Identifier: Apache-2.0

//! The REST surface, matching the route table in `blockade/api/rest.py`
//! one for one (names, methods, status codes), wired the way the
//! reference orchestrator's `presentation::api` builds its `axum::Router`
//! around an `AppState` holding `Arc`-shared services.

use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::application::facade::ControllerFacade;
use crate::domain::chaos::ChaosOptions;
use crate::domain::config::BlockadeConfig;
use crate::domain::errors::BlockadeError;
use crate::domain::topology::Topology;

#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<ControllerFacade>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/blockade", get(list_blockades))
        .route(
            "/blockade/{name}",
            post(create_blockade).put(add_containers).get(get_status).delete(destroy_blockade),
        )
        .route("/blockade/{name}/action", post(container_action))
        .route(
            "/blockade/{name}/partitions",
            post(create_partitions).delete(clear_partitions),
        )
        .route("/blockade/{name}/network_state", post(network_state))
        .route("/blockade/{name}/events", get(get_events))
        .route(
            "/blockade/{name}/chaos",
            post(start_chaos).put(update_chaos).delete(delete_chaos).get(chaos_status),
        )
        .layer(middleware::from_fn(require_json_content_type))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST/PUT bodies must be declared `Content-Type: application/json`, per
/// the REST surface's contract; everything else (GET/DELETE, which carry
/// no body) passes through untouched.
async fn require_json_content_type(request: Request, next: Next) -> Response {
    let needs_json = matches!(request.method().as_str(), "POST" | "PUT");
    if needs_json {
        let is_json = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);
        if !is_json {
            return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Content-Type must be application/json").into_response();
        }
    }
    next.run(request).await
}

struct ApiError(BlockadeError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<BlockadeError> for ApiError {
    fn from(e: BlockadeError) -> Self {
        ApiError(e)
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct ListBlockadesResponse {
    blockades: Vec<String>,
}

async fn list_blockades(State(state): State<AppState>) -> ApiResult<Json<ListBlockadesResponse>> {
    // Reports only topologies already touched by this process, matching
    // `blockade/core.py`'s module-level registry rather than scanning the
    // data directory for orphaned state left by other processes.
    let mut blockades = state.facade.known_ids().await;
    blockades.sort();
    Ok(Json(ListBlockadesResponse { blockades }))
}

#[derive(Debug, Deserialize)]
struct CreateBlockadeRequest {
    #[serde(flatten)]
    raw: serde_yaml::Value,
}

#[derive(Debug, Deserialize, Default)]
struct CreateBlockadeQuery {
    #[serde(default)]
    force: Option<String>,
}

async fn create_blockade(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<CreateBlockadeQuery>,
    Json(body): Json<CreateBlockadeRequest>,
) -> ApiResult<StatusCode> {
    let yaml = serde_yaml::to_string(&body.raw).map_err(|e| BlockadeError::ConfigError(e.to_string()))?;
    let config = BlockadeConfig::from_yaml_str(&yaml)?;
    state.facade.up(&name, &config, query.force.is_some()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Default)]
struct AddContainersRequest {
    #[serde(default)]
    containers: Vec<String>,
}

async fn add_containers(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<AddContainersRequest>,
) -> ApiResult<StatusCode> {
    for container_ref in &body.containers {
        state.facade.add(&name, container_ref, container_ref).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn get_status(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<Topology>> {
    Ok(Json(state.facade.status(&name).await?))
}

async fn destroy_blockade(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<StatusCode> {
    state.facade.destroy(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    action: String,
    #[serde(default)]
    containers: Vec<String>,
    #[serde(default)]
    signal: Option<String>,
}

async fn container_action(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ActionRequest>,
) -> ApiResult<StatusCode> {
    match body.action.as_str() {
        "start" => state.facade.start(&name, &body.containers).await?,
        "stop" => state.facade.stop(&name, &body.containers).await?,
        "restart" => state.facade.restart(&name, &body.containers).await?,
        "kill" => {
            let signal = body.signal.as_deref().unwrap_or("SIGKILL");
            state.facade.kill(&name, &body.containers, signal).await?
        }
        other => return Err(BlockadeError::UsageError(format!("unknown action '{other}'")).into()),
    };
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Default)]
struct PartitionsRequest {
    #[serde(default)]
    partitions: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct PartitionsQuery {
    #[serde(default)]
    random: Option<String>,
}

async fn create_partitions(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<PartitionsQuery>,
    body: String,
) -> ApiResult<StatusCode> {
    if query.random.is_some() {
        state.facade.random_partition(&name).await?;
    } else {
        let parsed: PartitionsRequest = if body.trim().is_empty() {
            PartitionsRequest::default()
        } else {
            serde_json::from_str(&body).map_err(|e| BlockadeError::UsageError(e.to_string()))?
        };
        state.facade.partition(&name, &parsed.partitions).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_partitions(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<StatusCode> {
    state.facade.join(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct NetworkStateRequest {
    state: String,
    #[serde(default)]
    containers: Vec<String>,
    #[serde(default)]
    params: Option<String>,
}

async fn network_state(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<NetworkStateRequest>,
) -> ApiResult<StatusCode> {
    match body.state.as_str() {
        "flaky" => state.facade.flaky(&name, &body.containers, body.params.as_deref()).await?,
        "slow" => state.facade.slow(&name, &body.containers, body.params.as_deref()).await?,
        "duplicate" => {
            state.facade.duplicate(&name, &body.containers, body.params.as_deref()).await?
        }
        "fast" | "normal" => state.facade.fast(&name, &body.containers).await?,
        other => return Err(BlockadeError::UsageError(format!("unknown network state '{other}'")).into()),
    };
    Ok(StatusCode::NO_CONTENT)
}

async fn get_events(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<crate::domain::audit::AuditEvent>>> {
    Ok(Json(state.facade.events(&name).await?))
}

#[derive(Debug, Deserialize, Default)]
struct ChaosRequest {
    #[serde(flatten)]
    options: Option<ChaosOptions>,
}

async fn start_chaos(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ChaosRequest>,
) -> ApiResult<(StatusCode, Json<ChaosStateResponse>)> {
    let options = body.options.unwrap_or_default();
    let chaos_state = state.facade.chaos_start(&name, options).await?;
    Ok((StatusCode::CREATED, Json(ChaosStateResponse { state: chaos_state })))
}

async fn update_chaos(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ChaosRequest>,
) -> ApiResult<StatusCode> {
    let options = body.options.ok_or_else(|| BlockadeError::UsageError("missing chaos options".into()))?;
    state.facade.chaos_update_options(&name, options).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_chaos(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<ChaosStateResponse>> {
    let chaos_state = state.facade.chaos_delete(&name).await?;
    Ok(Json(ChaosStateResponse { state: chaos_state }))
}

#[derive(Debug, Deserialize)]
struct ChaosStatusQuery {
    #[serde(default)]
    #[allow(dead_code)]
    verbose: Option<bool>,
}

async fn chaos_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(_query): Query<ChaosStatusQuery>,
) -> ApiResult<Json<Option<ChaosStateResponse>>> {
    let chaos_state = state.facade.chaos_status(&name).await?;
    Ok(Json(chaos_state.map(|s| ChaosStateResponse { state: s })))
}

#[derive(Debug, Serialize)]
struct ChaosStateResponse {
    state: crate::domain::chaos::ChaosState,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    /// A `ControllerFacade` talking to an unreachable Docker socket. Every
    /// route below either never touches the runtime (`list_blockades`) or
    /// fails before it would (`status`/`get_status` on an uninitialized
    /// topology short-circuit on `StateStore::load`), so none of these
    /// actually dial out.
    fn test_app() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let facade = Arc::new(ControllerFacade::new(dir.path()).expect("docker client construction is lazy"));
        (router(AppState { facade }), dir)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_blockades_starts_empty() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/blockade").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body, serde_json::json!({ "blockades": [] }));
    }

    #[tokio::test]
    async fn get_status_on_unknown_blockade_is_404() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/blockade/never-created").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("not been initialized"));
    }

    #[tokio::test]
    async fn post_without_json_content_type_is_rejected() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/blockade/demo")
                    .body(Body::from("containers: {}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn delete_chaos_with_no_session_is_usage_error() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(Request::builder().method("DELETE").uri("/blockade/demo/chaos").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("no chaos session"));
    }

    #[tokio::test]
    async fn get_chaos_status_with_no_session_is_null() {
        let (app, _dir) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/blockade/demo/chaos").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body.is_null());
    }
}
