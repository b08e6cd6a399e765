//! Process entrypoints for the worker and the coordinator.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use gitbridge_core::{CoordinatorConfig, LogFormat, WorkerConfig};
use gitbridge_sync::SyncEngine;

use crate::coordinator::{WorkerClient, WorkerRegistry};
use crate::error::{io_err, ChannelError};
use crate::http::{router, AppState};
use crate::reconnect::{log_state_changes, StateHandle};
use crate::worker::{SyncBackend, Worker, WorkerOptions};

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = match format {
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).try_init(),
        LogFormat::Json => fmt().json().with_env_filter(filter).try_init(),
    };
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Run the worker until ctrl-c.
pub async fn run_worker(config: WorkerConfig) -> Result<(), ChannelError> {
    let engine = SyncEngine::with_system_git(
        config.repositories.clone(),
        config.timeouts.git_process_timeout(),
    );
    let options = WorkerOptions::from_config(&config);
    let cancel = CancellationToken::new();

    let signal_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => Ok(()),
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        tracing::info!("received ctrl-c, stopping worker");
                        cancel.cancel();
                        Ok(())
                    }
                    Err(err) => {
                        cancel.cancel();
                        Err(io_err("ctrl-c handler", err))
                    }
                },
            }
        })
    };

    let result = run_worker_with(options, Arc::new(engine), cancel.clone()).await;
    cancel.cancel();
    handle_join("signal_handler", signal_handle.await)?;
    result
}

/// Run a worker over `backend` until `cancel` fires, logging state changes.
pub async fn run_worker_with(
    options: WorkerOptions,
    backend: Arc<dyn SyncBackend>,
    cancel: CancellationToken,
) -> Result<(), ChannelError> {
    let (state, rx) = StateHandle::new();
    let observer = tokio::spawn(log_state_changes(rx));

    let worker = Worker::new(options, backend, state);
    worker.run(cancel).await;
    drop(worker);

    observer
        .await
        .map_err(|err| ChannelError::JoinFailure {
            task: "state_observer",
            message: err.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Bind `listen_addr` and serve until ctrl-c.
pub async fn run_coordinator(config: CoordinatorConfig) -> Result<(), ChannelError> {
    let addr: SocketAddr = config.listen_addr.parse().map_err(|err| {
        ChannelError::Protocol(format!("invalid listen_addr {}: {err}", config.listen_addr))
    })?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| io_err(format!("bind {addr}"), e))?;
    tracing::info!(addr = %addr, "coordinator listening");

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("received ctrl-c, shutting down coordinator"),
            Err(err) => tracing::error!(error = %err, "ctrl-c handler failed"),
        }
    };
    serve_coordinator(listener, coordinator_state(&config), shutdown).await
}

pub fn coordinator_state(config: &CoordinatorConfig) -> AppState {
    let registry = Arc::new(WorkerRegistry::new());
    let client = WorkerClient::new(registry.clone(), config.operation_timeout());
    AppState::new(registry, client, &config.worker_api_key)
        .with_worker_idle_timeout(config.worker_idle_timeout())
}

pub async fn serve_coordinator<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
) -> Result<(), ChannelError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| io_err("coordinator server", e))
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), ChannelError>, tokio::task::JoinError>,
) -> Result<(), ChannelError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(ChannelError::JoinFailure {
            task,
            message: err.to_string(),
        }),
    }
}
