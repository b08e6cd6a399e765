//! RPC channel between the worker and the coordinator, plus the coordinator's
//! HTTP surface and both process entrypoints.

mod error;
pub mod coordinator;
pub mod http;
pub mod protocol;
pub mod reconnect;
mod runtime;
pub mod worker;

pub use coordinator::{WorkerClient, WorkerRegistry, WorkerSession};
pub use error::{ChannelError, RelayError};
pub use http::{router, AppState, DEFAULT_WORKER_IDLE_TIMEOUT};
pub use protocol::{RpcRequest, RpcResponse, WorkerCall, API_KEY_HEADER, WORKER_HUB_PATH};
pub use reconnect::{ConnectionState, ReconnectPolicy, StateHandle};
pub use runtime::{
    coordinator_state, init_tracing, run_coordinator, run_worker, run_worker_with,
    serve_coordinator,
};
pub use worker::{SyncBackend, Worker, WorkerOptions};
