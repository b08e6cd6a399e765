//! Coordinator HTTP surface: the `/api/git` read and push routes plus the
//! `/workerhub` websocket the worker attaches through.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use gitbridge_core::{GetCommitsRequest, PushBranchRequest, DEFAULT_COMMIT_COUNT};

use crate::coordinator::{WorkerClient, WorkerRegistry, WorkerSession};
use crate::error::RelayError;
use crate::protocol::{RpcResponse, API_KEY_HEADER, WORKER_HUB_PATH};

/// Twice the worker's default keepalive interval.
pub const DEFAULT_WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    registry: Arc<WorkerRegistry>,
    client: WorkerClient,
    worker_api_key: Arc<str>,
    worker_idle_timeout: Duration,
}

impl AppState {
    pub fn new(registry: Arc<WorkerRegistry>, client: WorkerClient, worker_api_key: &str) -> Self {
        Self {
            registry,
            client,
            worker_api_key: Arc::from(worker_api_key),
            worker_idle_timeout: DEFAULT_WORKER_IDLE_TIMEOUT,
        }
    }

    /// Drop an attached worker that sends no frame for `timeout`.
    pub fn with_worker_idle_timeout(mut self, timeout: Duration) -> Self {
        self.worker_idle_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/git/status", get(status))
        .route("/api/git/repositories", get(repositories))
        .route("/api/git/branches/:repository", get(branches))
        .route("/api/git/commits/:repository/*branch", get(commits))
        .route("/api/git/push", post(push))
        .route(WORKER_HUB_PATH, get(worker_hub))
        .with_state(state)
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::WorkerOffline | RelayError::WorkerDisconnected => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RelayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Worker(_) | RelayError::Protocol(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// /api/git
// ---------------------------------------------------------------------------

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "connected": state.client.is_worker_connected() }))
}

async fn repositories(State(state): State<AppState>) -> Response {
    match state.client.get_repository_configs().await {
        Ok(repos) => Json(repos).into_response(),
        Err(err) => failed("repositories", err),
    }
}

async fn branches(State(state): State<AppState>, Path(repository): Path<String>) -> Response {
    match state.client.get_branches(&repository).await {
        Ok(branches) => Json(branches).into_response(),
        Err(err) => failed("branches", err),
    }
}

#[derive(Debug, Deserialize)]
struct CommitsQuery {
    count: Option<usize>,
}

async fn commits(
    State(state): State<AppState>,
    Path((repository, branch)): Path<(String, String)>,
    Query(query): Query<CommitsQuery>,
) -> Response {
    let request = GetCommitsRequest {
        repository,
        branch: branch.trim_start_matches('/').to_string(),
        count: query.count.unwrap_or(DEFAULT_COMMIT_COUNT),
    };
    match state.client.get_commits(request).await {
        Ok(commits) => Json(commits).into_response(),
        Err(err) => failed("commits", err),
    }
}

/// Logical push failures are a 200 with `success: false`.
async fn push(
    State(state): State<AppState>,
    body: Result<Json<PushBranchRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "malformed push request");
            return (
                rejection.status(),
                Json(json!({ "error": rejection.body_text() })),
            )
                .into_response();
        }
    };
    tracing::info!(
        branch = %request.branch,
        from = %request.from_repository,
        to = %request.to_repository,
        force = request.force,
        "push requested",
    );
    match state.client.push_branch(request).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => failed("push", err),
    }
}

fn failed(route: &'static str, err: RelayError) -> Response {
    match &err {
        RelayError::WorkerOffline => tracing::warn!(route, "request while worker offline"),
        _ => tracing::error!(route, error = %err, "relayed call failed"),
    }
    err.into_response()
}

// ---------------------------------------------------------------------------
// /workerhub
// ---------------------------------------------------------------------------

async fn worker_hub(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let presented = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    if presented != Some(&*state.worker_api_key) {
        tracing::warn!("worker connection rejected: missing or invalid api key");
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response();
    }
    if state.registry.is_connected() {
        tracing::warn!("worker connection rejected: a worker is already attached");
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "A worker is already connected" })),
        )
            .into_response();
    }
    let idle_timeout = state.worker_idle_timeout;
    ws.on_upgrade(move |socket| serve_worker(socket, state.registry, idle_timeout))
}

/// Relay frames for one worker until it closes, errors or goes quiet for
/// `idle_timeout`. Any inbound frame, pings included, counts as activity.
async fn serve_worker(socket: WebSocket, registry: Arc<WorkerRegistry>, idle_timeout: Duration) {
    let (session, mut outbound) = WorkerSession::new();
    if registry.attach(session.clone()).is_err() {
        tracing::warn!("worker attached concurrently, closing the newer connection");
        let mut socket = socket;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    tracing::info!("worker connected");

    let (mut sink, mut stream) = socket.split();
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);
    loop {
        tokio::select! {
            _ = &mut idle => {
                tracing::warn!(
                    idle_secs = idle_timeout.as_secs_f64(),
                    "no frame from worker, dropping the connection",
                );
                break;
            }
            Some(frame) = outbound.recv() => {
                if sink.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                idle.as_mut().reset(tokio::time::Instant::now() + idle_timeout);
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<RpcResponse>(&text) {
                            Ok(response) => session.complete(response),
                            Err(err) => tracing::warn!(error = %err, "unparseable worker frame"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "worker socket error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    registry.detach(&session);
    session.close();
    tracing::info!("worker disconnected");
}
