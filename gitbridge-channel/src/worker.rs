//! Worker side of the channel: dial the coordinator, then answer its calls
//! against the local sync engine until the connection drops.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use gitbridge_core::{
    BranchInfo, CommitInfo, PushBranchRequest, RepositoryInfo, SyncResult, WorkerConfig,
};
use gitbridge_sync::{SyncEngine, SyncError};

use crate::error::ChannelError;
use crate::protocol::{
    RpcRequest, RpcResponse, WorkerCall, API_KEY_HEADER, UNKNOWN_REQUEST_ID, WORKER_HUB_PATH,
};
use crate::reconnect::{run_with_reconnect, AttemptOutcome, ConnectionState, ReconnectPolicy, StateHandle};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The operations a worker serves. [`SyncEngine`] is the production backend.
pub trait SyncBackend: Send + Sync + 'static {
    fn repository_configs(&self) -> Vec<RepositoryInfo>;
    fn branches(&self, repository: &str) -> Result<Vec<BranchInfo>, SyncError>;
    fn commits(&self, repository: &str, branch: &str, count: usize)
        -> Result<Vec<CommitInfo>, SyncError>;
    fn push_branch(&self, request: &PushBranchRequest) -> Result<SyncResult, SyncError>;
}

impl SyncBackend for SyncEngine {
    fn repository_configs(&self) -> Vec<RepositoryInfo> {
        SyncEngine::repository_configs(self)
    }

    fn branches(&self, repository: &str) -> Result<Vec<BranchInfo>, SyncError> {
        SyncEngine::branches(self, repository)
    }

    fn commits(
        &self,
        repository: &str,
        branch: &str,
        count: usize,
    ) -> Result<Vec<CommitInfo>, SyncError> {
        SyncEngine::commits(self, repository, branch, count)
    }

    fn push_branch(&self, request: &PushBranchRequest) -> Result<SyncResult, SyncError> {
        SyncEngine::push_branch(self, request)
    }
}

/// Connection settings taken from [`WorkerConfig`].
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub hub_url: String,
    pub api_key: String,
    pub reconnect: ReconnectPolicy,
    pub handshake_timeout: Duration,
    pub server_timeout: Duration,
    pub keep_alive_interval: Duration,
}

impl WorkerOptions {
    pub fn from_config(config: &WorkerConfig) -> Self {
        let timeouts = &config.timeouts;
        Self {
            hub_url: hub_url(&config.server_url),
            api_key: config.api_key.clone(),
            reconnect: ReconnectPolicy::new(timeouts.reconnect_delays()),
            handshake_timeout: timeouts.handshake_timeout(),
            server_timeout: timeouts.server_timeout(),
            keep_alive_interval: timeouts.keep_alive_interval(),
        }
    }
}

/// `<server_url>/workerhub`, with `http(s)` mapped to `ws(s)`.
pub fn hub_url(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    if base.ends_with(WORKER_HUB_PATH) {
        base
    } else {
        format!("{base}{WORKER_HUB_PATH}")
    }
}

pub struct Worker {
    options: WorkerOptions,
    backend: Arc<dyn SyncBackend>,
    state: StateHandle,
}

impl Worker {
    pub fn new(options: WorkerOptions, backend: Arc<dyn SyncBackend>, state: StateHandle) -> Self {
        Self {
            options,
            backend,
            state,
        }
    }

    /// Keep a connection to the coordinator until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(url = %self.options.hub_url, "starting worker connection");
        run_with_reconnect(&self.options.reconnect, &self.state, &cancel, || self.attempt()).await;
        tracing::info!("worker connection stopped");
    }

    async fn attempt(&self) -> AttemptOutcome {
        let ws = match connect(&self.options).await {
            Ok(ws) => ws,
            Err(err) => return AttemptOutcome::Failed(err),
        };
        self.state.set(ConnectionState::Connected);
        AttemptOutcome::Disconnected(serve(ws, self.backend.clone(), &self.options).await.err())
    }
}

async fn connect(options: &WorkerOptions) -> Result<WsStream, ChannelError> {
    let mut request = options.hub_url.as_str().into_client_request()?;
    let key = HeaderValue::from_str(&options.api_key)
        .map_err(|err| ChannelError::Protocol(format!("api key is not a valid header value: {err}")))?;
    request.headers_mut().insert(API_KEY_HEADER, key);

    let connected = tokio::time::timeout(
        options.handshake_timeout,
        tokio_tungstenite::connect_async(request),
    )
    .await
    .map_err(|_| {
        ChannelError::Protocol(format!(
            "handshake timed out after {}s",
            options.handshake_timeout.as_secs()
        ))
    })?;

    match connected {
        Ok((ws, _response)) => Ok(ws),
        Err(tungstenite::Error::Http(response)) => Err(ChannelError::Rejected {
            status: response.status().as_u16(),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Answer calls until the connection closes or goes quiet for `server_timeout`.
///
/// Each request runs on the blocking pool; responses are written as they
/// complete. Responses still computing when the session ends are dropped.
async fn serve(
    ws: WsStream,
    backend: Arc<dyn SyncBackend>,
    options: &WorkerOptions,
) -> Result<(), ChannelError> {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<RpcResponse>();

    let mut keep_alive = tokio::time::interval(options.keep_alive_interval);
    keep_alive.tick().await;
    let idle = tokio::time::sleep(options.server_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            _ = &mut idle => {
                return Err(ChannelError::Protocol(format!(
                    "no frame from coordinator for {}s",
                    options.server_timeout.as_secs()
                )));
            }
            _ = keep_alive.tick() => {
                sink.send(Message::Ping(Vec::new())).await?;
            }
            Some(response) = out_rx.recv() => {
                let frame = serde_json::to_string(&response)?;
                sink.send(Message::Text(frame)).await?;
            }
            incoming = stream.next() => {
                let Some(message) = incoming else { return Ok(()) };
                idle.as_mut().reset(Instant::now() + options.server_timeout);
                match message? {
                    Message::Text(text) => spawn_dispatch(&text, backend.clone(), out_tx.clone()),
                    Message::Close(frame) => {
                        tracing::info!(reason = ?frame, "coordinator closed the connection");
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }
}

fn spawn_dispatch(text: &str, backend: Arc<dyn SyncBackend>, out: mpsc::UnboundedSender<RpcResponse>) {
    let request: RpcRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(error = %err, "unparseable request frame");
            let _ = out.send(RpcResponse::error(UNKNOWN_REQUEST_ID, format!("invalid request: {err}")));
            return;
        }
    };

    tokio::spawn(async move {
        let id = request.id;
        let method = request.method.clone();
        let response = match tokio::task::spawn_blocking(move || dispatch(backend.as_ref(), &request)).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(id, method = %method, error = %err, "request task failed");
                RpcResponse::error(id, format!("{method} failed: {err}"))
            }
        };
        // The session may have ended; its responses are never replayed.
        let _ = out.send(response);
    });
}

/// Run one decoded call against `backend`. Engine errors become error responses.
pub fn dispatch(backend: &dyn SyncBackend, request: &RpcRequest) -> RpcResponse {
    let call = match WorkerCall::from_request(request) {
        Ok(call) => call,
        Err(message) => {
            tracing::warn!(id = request.id, method = %request.method, error = %message, "rejected request");
            return RpcResponse::error(request.id, message);
        }
    };
    let method = call.method();
    tracing::debug!(id = request.id, method, "handling request");

    let result = match call {
        WorkerCall::GetRepositoryConfigs => to_value(Ok(backend.repository_configs())),
        WorkerCall::GetBranches(repository) => to_value(backend.branches(&repository)),
        WorkerCall::GetCommits(req) => to_value(backend.commits(&req.repository, &req.branch, req.count)),
        WorkerCall::PushBranch(req) => to_value(backend.push_branch(&req)),
    };

    match result {
        Ok(data) => RpcResponse::ok(request.id, data),
        Err(message) => {
            tracing::error!(id = request.id, method, error = %message, "request failed");
            RpcResponse::error(request.id, message)
        }
    }
}

fn to_value<T: serde::Serialize>(result: Result<T, SyncError>) -> Result<Value, String> {
    let value = result.map_err(|err| err.to_string())?;
    serde_json::to_value(value).map_err(|err| err.to_string())
}
