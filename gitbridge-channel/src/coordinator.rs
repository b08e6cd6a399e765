//! Coordinator side of the channel: the single-worker registry and the call
//! relay with a bounded operation timeout.
//!
//! Calls are sent once. A call whose connection drops fails with
//! [`RelayError::WorkerDisconnected`]; a response arriving after its caller
//! gave up is discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};

use gitbridge_core::{
    BranchInfo, CommitInfo, GetCommitsRequest, PushBranchRequest, RepositoryInfo, SyncResult,
};

use crate::error::RelayError;
use crate::protocol::{RpcResponse, WorkerCall};

type Pending = HashMap<u64, oneshot::Sender<RpcResponse>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One attached worker connection. Outbound frames go through `outbound`;
/// the socket task feeds inbound responses to [`WorkerSession::complete`].
#[derive(Debug)]
pub struct WorkerSession {
    outbound: mpsc::UnboundedSender<String>,
    /// `None` once the connection has closed.
    pending: Mutex<Option<Pending>>,
    next_id: AtomicU64,
}

impl WorkerSession {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            outbound,
            pending: Mutex::new(Some(HashMap::new())),
            next_id: AtomicU64::new(1),
        });
        (session, rx)
    }

    pub async fn call(
        &self,
        call: WorkerCall,
        timeout: Duration,
    ) -> Result<serde_json::Value, RelayError> {
        let operation = call.method();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = call
            .into_request(id)
            .and_then(|request| serde_json::to_string(&request))
            .map_err(|err| RelayError::Protocol(err.to_string()))?;

        let (tx, rx) = oneshot::channel();
        match lock(&self.pending).as_mut() {
            Some(pending) => {
                pending.insert(id, tx);
            }
            None => return Err(RelayError::WorkerDisconnected),
        }
        if self.outbound.send(frame).is_err() {
            self.forget(id);
            return Err(RelayError::WorkerDisconnected);
        }
        tracing::debug!(id, operation, "relayed call to worker");

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                self.forget(id);
                tracing::warn!(id, operation, timeout_secs = timeout.as_secs_f64(), "worker call timed out");
                Err(RelayError::Timeout {
                    operation,
                    after: timeout,
                })
            }
            Ok(Err(_)) => Err(RelayError::WorkerDisconnected),
            Ok(Ok(response)) if response.ok => Ok(response.data.unwrap_or(serde_json::Value::Null)),
            Ok(Ok(response)) => Err(RelayError::Worker(
                response
                    .error
                    .unwrap_or_else(|| format!("{operation} failed on the worker")),
            )),
        }
    }

    /// Route an inbound response to its waiting caller, if any.
    pub fn complete(&self, response: RpcResponse) {
        let waiter = lock(&self.pending)
            .as_mut()
            .and_then(|pending| pending.remove(&response.id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => tracing::debug!(id = response.id, "discarding response with no waiting caller"),
        }
    }

    /// Fail every in-flight call and refuse new ones.
    pub fn close(&self) {
        let dropped = lock(&self.pending).take().map(|p| p.len()).unwrap_or(0);
        if dropped > 0 {
            tracing::warn!(in_flight = dropped, "worker connection closed with calls in flight");
        }
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.pending).as_ref().map(HashMap::len).unwrap_or(0)
    }

    fn forget(&self, id: u64) {
        if let Some(pending) = lock(&self.pending).as_mut() {
            pending.remove(&id);
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds at most one attached worker.
#[derive(Default)]
pub struct WorkerRegistry {
    current: Mutex<Option<Arc<WorkerSession>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `session` unless another worker is already attached.
    pub fn attach(&self, session: Arc<WorkerSession>) -> Result<(), Arc<WorkerSession>> {
        let mut current = lock(&self.current);
        if current.is_some() {
            return Err(session);
        }
        *current = Some(session);
        Ok(())
    }

    pub fn current(&self) -> Option<Arc<WorkerSession>> {
        lock(&self.current).clone()
    }

    /// Detach `session` if it is still the attached one.
    pub fn detach(&self, session: &Arc<WorkerSession>) {
        let mut current = lock(&self.current);
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, session)) {
            *current = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.current).is_some()
    }
}

// ---------------------------------------------------------------------------
// Typed client
// ---------------------------------------------------------------------------

/// Typed facade over the registry: one method per worker operation.
#[derive(Clone)]
pub struct WorkerClient {
    registry: Arc<WorkerRegistry>,
    timeout: Duration,
}

impl WorkerClient {
    pub fn new(registry: Arc<WorkerRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn is_worker_connected(&self) -> bool {
        self.registry.is_connected()
    }

    pub async fn get_repository_configs(&self) -> Result<Vec<RepositoryInfo>, RelayError> {
        self.invoke(WorkerCall::GetRepositoryConfigs).await
    }

    pub async fn get_branches(&self, repository: &str) -> Result<Vec<BranchInfo>, RelayError> {
        self.invoke(WorkerCall::GetBranches(repository.to_string()))
            .await
    }

    pub async fn get_commits(&self, request: GetCommitsRequest) -> Result<Vec<CommitInfo>, RelayError> {
        self.invoke(WorkerCall::GetCommits(request)).await
    }

    pub async fn push_branch(&self, request: PushBranchRequest) -> Result<SyncResult, RelayError> {
        self.invoke(WorkerCall::PushBranch(request)).await
    }

    async fn invoke<T: DeserializeOwned>(&self, call: WorkerCall) -> Result<T, RelayError> {
        let session = self.registry.current().ok_or(RelayError::WorkerOffline)?;
        let operation = call.method();
        let data = session.call(call, self.timeout).await?;
        serde_json::from_value(data)
            .map_err(|err| RelayError::Protocol(format!("bad {operation} response: {err}")))
    }
}
