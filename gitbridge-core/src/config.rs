//! Worker and coordinator configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.gitbridge/
//!   worker.yaml        (mode 0600: contains the shared secret)
//!   coordinator.yaml   (mode 0600)
//! ```
//!
//! # API pattern
//!
//! Loaders come in two forms, as with every path-bearing function here:
//! - `fn_at(path: &Path, …)`: explicit location; used by tests and `--config`
//! - `fn(…)`: derives the location from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::RepositoryConfig;

pub const CONFIG_DIR: &str = ".gitbridge";
pub const WORKER_CONFIG_FILE: &str = "worker.yaml";
pub const COORDINATOR_CONFIG_FILE: &str = "coordinator.yaml";

/// Overrides `WorkerConfig::api_key` when set.
pub const WORKER_API_KEY_ENV: &str = "GITBRIDGE_API_KEY";
/// Overrides `CoordinatorConfig::worker_api_key` when set.
pub const COORDINATOR_API_KEY_ENV: &str = "GITBRIDGE_WORKER_API_KEY";

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Timing knobs for the worker. All values are whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerTimeouts {
    pub git_process_timeout_seconds: u64,
    /// Ordered reconnect delay table; the last entry repeats forever.
    pub reconnect_delays_seconds: Vec<u64>,
    pub server_timeout_seconds: u64,
    pub handshake_timeout_seconds: u64,
    pub keep_alive_interval_seconds: u64,
}

impl Default for WorkerTimeouts {
    fn default() -> Self {
        Self {
            git_process_timeout_seconds: 90,
            reconnect_delays_seconds: vec![2, 5, 10, 15, 30],
            server_timeout_seconds: 120,
            handshake_timeout_seconds: 30,
            keep_alive_interval_seconds: 15,
        }
    }
}

impl WorkerTimeouts {
    pub fn git_process_timeout(&self) -> Duration {
        Duration::from_secs(self.git_process_timeout_seconds)
    }

    pub fn reconnect_delays(&self) -> Vec<Duration> {
        self.reconnect_delays_seconds
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }

    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout_seconds)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_seconds)
    }
}

/// Exactly two repositories, by role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryPairConfig {
    pub internal: RepositoryConfig,
    pub customer: RepositoryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Coordinator base URL (`ws://`, `wss://`, `http://` or `https://`).
    pub server_url: String,
    pub api_key: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub timeouts: WorkerTimeouts,
    pub repositories: RepositoryPairConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_operation_timeout_seconds() -> u64 {
    30
}

fn default_worker_idle_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub worker_api_key: String,
    /// Upper bound on a single relayed call.
    #[serde(default = "default_operation_timeout_seconds")]
    pub operation_timeout_seconds: u64,
    /// An attached worker silent for this long is dropped. Keep it above the
    /// worker's keepalive interval.
    #[serde(default = "default_worker_idle_timeout_seconds")]
    pub worker_idle_timeout_seconds: u64,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl CoordinatorConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_seconds)
    }

    pub fn worker_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_idle_timeout_seconds)
    }
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.gitbridge/`, pure, no I/O.
pub fn config_dir_at(home: &Path) -> PathBuf {
    home.join(CONFIG_DIR)
}

pub fn worker_config_path_at(home: &Path) -> PathBuf {
    config_dir_at(home).join(WORKER_CONFIG_FILE)
}

pub fn coordinator_config_path_at(home: &Path) -> PathBuf {
    config_dir_at(home).join(COORDINATOR_CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load, apply the `GITBRIDGE_API_KEY` override, and validate a worker config.
///
/// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse` (with path +
/// line context) if malformed, `ConfigError::Invalid` if validation fails.
pub fn load_worker_at(path: &Path) -> Result<WorkerConfig, ConfigError> {
    let mut config: WorkerConfig = load_yaml(path)?;
    config.apply_api_key_override(std::env::var(WORKER_API_KEY_ENV).ok());
    config.validate()?;
    Ok(config)
}

/// `load_worker_at` convenience wrapper for `~/.gitbridge/worker.yaml`.
pub fn load_worker() -> Result<WorkerConfig, ConfigError> {
    load_worker_at(&worker_config_path_at(&home()?))
}

/// Load, apply the `GITBRIDGE_WORKER_API_KEY` override, and validate a
/// coordinator config.
pub fn load_coordinator_at(path: &Path) -> Result<CoordinatorConfig, ConfigError> {
    let mut config: CoordinatorConfig = load_yaml(path)?;
    config.apply_api_key_override(std::env::var(COORDINATOR_API_KEY_ENV).ok());
    config.validate()?;
    Ok(config)
}

/// `load_coordinator_at` convenience wrapper for `~/.gitbridge/coordinator.yaml`.
pub fn load_coordinator() -> Result<CoordinatorConfig, ConfigError> {
    load_coordinator_at(&coordinator_config_path_at(&home()?))
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// 3. Overrides + validation
// ---------------------------------------------------------------------------

impl WorkerConfig {
    pub fn apply_api_key_override(&mut self, value: Option<String>) {
        if let Some(key) = value.filter(|k| !k.trim().is_empty()) {
            self.api_key = key;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server_url must not be empty".into()));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "api_key must not be empty (set it in the file or via {WORKER_API_KEY_ENV})"
            )));
        }
        validate_repository("internal", &self.repositories.internal)?;
        validate_repository("customer", &self.repositories.customer)?;
        if self.repositories.internal.name == self.repositories.customer.name {
            return Err(ConfigError::Invalid(format!(
                "repository names must differ (both are '{}')",
                self.repositories.internal.name
            )));
        }

        let t = &self.timeouts;
        if t.reconnect_delays_seconds.is_empty() {
            return Err(ConfigError::Invalid(
                "timeouts.reconnect_delays_seconds must list at least one delay".into(),
            ));
        }
        for (field, value) in [
            ("git_process_timeout_seconds", t.git_process_timeout_seconds),
            ("server_timeout_seconds", t.server_timeout_seconds),
            ("handshake_timeout_seconds", t.handshake_timeout_seconds),
            ("keep_alive_interval_seconds", t.keep_alive_interval_seconds),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "timeouts.{field} must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

impl CoordinatorConfig {
    pub fn apply_api_key_override(&mut self, value: Option<String>) {
        if let Some(key) = value.filter(|k| !k.trim().is_empty()) {
            self.worker_api_key = key;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_api_key.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "worker_api_key must not be empty (set it in the file or via {COORDINATOR_API_KEY_ENV})"
            )));
        }
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("listen_addr must not be empty".into()));
        }
        if self.operation_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "operation_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.worker_idle_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "worker_idle_timeout_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn validate_repository(role: &str, repo: &RepositoryConfig) -> Result<(), ConfigError> {
    if repo.name.0.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "repositories.{role}.name must not be empty"
        )));
    }
    if repo.remote_url.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "repositories.{role}.remote_url must not be empty"
        )));
    }
    if repo.local_path.as_os_str().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "repositories.{role}.local_path must not be empty"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Templates (atomic write)
// ---------------------------------------------------------------------------

/// Which config file a template is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    Worker,
    Coordinator,
}

impl ConfigKind {
    pub fn default_path_at(self, home: &Path) -> PathBuf {
        match self {
            ConfigKind::Worker => worker_config_path_at(home),
            ConfigKind::Coordinator => coordinator_config_path_at(home),
        }
    }

    pub fn template(self) -> &'static str {
        match self {
            ConfigKind::Worker => WORKER_TEMPLATE,
            ConfigKind::Coordinator => COORDINATOR_TEMPLATE,
        }
    }
}

const WORKER_TEMPLATE: &str = r#"# gitbridge worker configuration
server_url: ws://127.0.0.1:5000
# Shared secret presented once when connecting; GITBRIDGE_API_KEY overrides it.
api_key: change-me
log_format: text
timeouts:
  git_process_timeout_seconds: 90
  reconnect_delays_seconds: [2, 5, 10, 15, 30]
  server_timeout_seconds: 120
  handshake_timeout_seconds: 30
  keep_alive_interval_seconds: 15
repositories:
  internal:
    name: internal
    local_path: /srv/gitbridge/internal
    remote_url: git@internal.example.com:team/product.git
  customer:
    name: customer
    local_path: /srv/gitbridge/customer
    remote_url: git@customer.example.com:vendor/product.git
"#;

const COORDINATOR_TEMPLATE: &str = r#"# gitbridge coordinator configuration
listen_addr: 0.0.0.0:5000
# Must match the worker's api_key; GITBRIDGE_WORKER_API_KEY overrides it.
worker_api_key: change-me
operation_timeout_seconds: 30
# Drop a worker that sends nothing (not even its keepalive pings) for this long.
worker_idle_timeout_seconds: 30
log_format: text
"#;

/// Write the template for `kind` to `path`.
///
/// Write flow: `.tmp` sibling → `chmod 0600` → `rename`. Refuses to replace an
/// existing file unless `force` is set.
pub fn write_template_at(path: &Path, kind: ConfigKind, force: bool) -> Result<(), ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            set_permissions(parent, 0o700)?;
        }
    }

    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, kind.template()).map_err(|e| io_err(&tmp, e))?;
    set_permissions(&tmp, 0o600)?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
