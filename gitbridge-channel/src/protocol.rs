//! JSON frames exchanged over the worker websocket.
//!
//! The coordinator sends [`RpcRequest`]s, the worker answers each with one
//! [`RpcResponse`] carrying the same `id`. Responses may arrive out of order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use gitbridge_core::{GetCommitsRequest, PushBranchRequest};

/// Upgrade path the worker dials on the coordinator.
pub const WORKER_HUB_PATH: &str = "/workerhub";

/// Header carrying the shared secret on the upgrade request.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Response id used when the request frame could not be parsed at all.
pub const UNKNOWN_REQUEST_ID: u64 = 0;

/// One coordinator-to-worker call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

/// Worker answer to one [`RpcRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: u64, data: Value) -> Self {
        Self {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// The four operations the worker exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCall {
    GetRepositoryConfigs,
    GetBranches(String),
    GetCommits(GetCommitsRequest),
    PushBranch(PushBranchRequest),
}

impl WorkerCall {
    pub fn method(&self) -> &'static str {
        match self {
            WorkerCall::GetRepositoryConfigs => "GetRepositoryConfigs",
            WorkerCall::GetBranches(_) => "GetBranches",
            WorkerCall::GetCommits(_) => "GetCommits",
            WorkerCall::PushBranch(_) => "PushBranch",
        }
    }

    pub fn into_request(self, id: u64) -> Result<RpcRequest, serde_json::Error> {
        let method = self.method().to_string();
        let args = match self {
            WorkerCall::GetRepositoryConfigs => Value::Null,
            WorkerCall::GetBranches(repository) => Value::String(repository),
            WorkerCall::GetCommits(request) => serde_json::to_value(request)?,
            WorkerCall::PushBranch(request) => serde_json::to_value(request)?,
        };
        Ok(RpcRequest { id, method, args })
    }

    /// Decode the call carried by `request`. The error text is sent back to
    /// the coordinator verbatim.
    pub fn from_request(request: &RpcRequest) -> Result<Self, String> {
        let args = request.args.clone();
        let bad_args = |err: serde_json::Error| format!("invalid arguments for {}: {err}", request.method);
        match request.method.as_str() {
            "GetRepositoryConfigs" => Ok(WorkerCall::GetRepositoryConfigs),
            "GetBranches" => serde_json::from_value(args)
                .map(WorkerCall::GetBranches)
                .map_err(bad_args),
            "GetCommits" => serde_json::from_value(args)
                .map(WorkerCall::GetCommits)
                .map_err(bad_args),
            "PushBranch" => serde_json::from_value(args)
                .map(WorkerCall::PushBranch)
                .map_err(bad_args),
            other => Err(format!("unknown method: {other}")),
        }
    }
}
