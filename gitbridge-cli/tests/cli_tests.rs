use std::net::{SocketAddr, TcpListener as StdListener};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use gitbridge_channel::{serve_coordinator, AppState, WorkerClient, WorkerRegistry};

fn gitbridge_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("gitbridge"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("GITBRIDGE_SERVER")
        .env_remove("GITBRIDGE_API_KEY")
        .env_remove("GITBRIDGE_WORKER_API_KEY");
    cmd
}

/// Coordinator with no worker attached, served from a background runtime.
fn start_offline_coordinator() -> (SocketAddr, tokio::runtime::Runtime) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .expect("runtime");
    let addr = runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let registry = Arc::new(WorkerRegistry::new());
        let client = WorkerClient::new(registry.clone(), Duration::from_secs(5));
        let state = AppState::new(registry, client, "secret");
        tokio::spawn(serve_coordinator(listener, state, std::future::pending()));
        addr
    });
    (addr, runtime)
}

fn unused_port() -> u16 {
    let listener = StdListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("addr").port()
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

#[test]
fn init_writes_default_path_and_refuses_overwrite() {
    let home = TempDir::new().expect("home");

    gitbridge_cmd(home.path())
        .args(["init", "worker"])
        .assert()
        .success()
        .stdout(contains("worker.yaml"));
    let path = home.path().join(".gitbridge/worker.yaml");
    assert!(path.exists());

    gitbridge_cmd(home.path())
        .args(["init", "worker"])
        .assert()
        .failure()
        .stderr(contains("already exists"));

    gitbridge_cmd(home.path())
        .args(["init", "worker", "--force"])
        .assert()
        .success();
}

#[test]
fn init_coordinator_at_explicit_path() {
    let home = TempDir::new().expect("home");
    let path = home.path().join("etc/coordinator.yaml");

    gitbridge_cmd(home.path())
        .args(["init", "coordinator", "--path"])
        .arg(&path)
        .assert()
        .success();

    let contents = std::fs::read_to_string(&path).expect("read");
    assert!(contents.contains("worker_api_key"));
}

// ---------------------------------------------------------------------------
// worker / coordinator startup errors
// ---------------------------------------------------------------------------

#[test]
fn worker_without_config_points_at_init() {
    let home = TempDir::new().expect("home");
    gitbridge_cmd(home.path())
        .arg("worker")
        .assert()
        .failure()
        .stderr(contains("gitbridge init worker"))
        .stderr(contains("config not found"));
}

#[test]
fn coordinator_rejects_invalid_config() {
    let home = TempDir::new().expect("home");
    let path = home.path().join("coordinator.yaml");
    std::fs::write(&path, "listen_addr: 127.0.0.1:0\nworker_api_key: \"\"\n").expect("write");

    gitbridge_cmd(home.path())
        .args(["coordinator", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(contains("invalid config"));
}

// ---------------------------------------------------------------------------
// operator commands
// ---------------------------------------------------------------------------

#[test]
fn status_reports_unreachable_coordinator() {
    let home = TempDir::new().expect("home");
    let server = format!("http://127.0.0.1:{}", unused_port());

    gitbridge_cmd(home.path())
        .args(["status", "--server", &server])
        .assert()
        .failure()
        .stderr(contains("failed to reach coordinator"));
}

#[test]
fn status_and_reads_against_offline_coordinator() {
    let home = TempDir::new().expect("home");
    let (addr, _runtime) = start_offline_coordinator();
    let server = format!("http://{addr}");

    gitbridge_cmd(home.path())
        .args(["status", "--json"])
        .env("GITBRIDGE_SERVER", &server)
        .assert()
        .success()
        .stdout(contains("\"connected\": false"));

    gitbridge_cmd(home.path())
        .args(["repos", "--server", &server])
        .assert()
        .failure()
        .stderr(contains("HTTP 503"))
        .stderr(contains("Git worker is offline"));

    gitbridge_cmd(home.path())
        .args(["push", "main", "--from", "internal", "--to", "customer", "--server", &server])
        .assert()
        .failure()
        .stderr(contains("HTTP 503"));
}

#[test]
fn push_requires_from_and_to() {
    let home = TempDir::new().expect("home");
    gitbridge_cmd(home.path())
        .args(["push", "main", "--from", "internal"])
        .assert()
        .failure()
        .stderr(contains("--to"));
}
