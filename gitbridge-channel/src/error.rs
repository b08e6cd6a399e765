use std::time::Duration;

use thiserror::Error;

/// Error surface for the worker connection and the coordinator runtime.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("I/O error at {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("config error: {0}")]
    Config(#[from] gitbridge_core::ConfigError),

    #[error("channel protocol error: {0}")]
    Protocol(String),

    /// The coordinator answered the upgrade with a non-101 status.
    #[error("coordinator rejected the connection with HTTP {status}")]
    Rejected { status: u16 },

    #[error("{task} task join failure: {message}")]
    JoinFailure { task: &'static str, message: String },
}

pub(crate) fn io_err(context: impl Into<String>, source: std::io::Error) -> ChannelError {
    ChannelError::Io {
        context: context.into(),
        source,
    }
}

/// Outcome of relaying one call to the worker, as seen by the coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("Git worker is offline")]
    WorkerOffline,

    #[error("{operation} timed out after {}s", .after.as_secs_f64())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The connection dropped while the call was in flight.
    #[error("Git worker disconnected before answering")]
    WorkerDisconnected,

    /// The worker ran the call and its engine raised.
    #[error("{0}")]
    Worker(String),

    #[error("relay protocol error: {0}")]
    Protocol(String),
}
