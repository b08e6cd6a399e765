//! gitbridge core library: domain types, configuration, errors.
//!
//! - [`types`]: repository names and the data model exchanged over the channel
//! - [`config`]: worker/coordinator YAML configuration, load / validate / template
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{CoordinatorConfig, LogFormat, RepositoryPairConfig, WorkerConfig, WorkerTimeouts};
pub use error::ConfigError;
pub use types::{
    short_hash, BranchInfo, CommitInfo, GetCommitsRequest, PushBranchRequest, RepositoryConfig,
    RepositoryInfo, RepositoryName, SyncResult, DEFAULT_COMMIT_COUNT, MAX_COMMIT_COUNT,
    SHORT_HASH_LEN,
};
