//! gitbridge sync library: everything the worker does to the two working copies.
//!
//! - [`process`]: bounded external command execution ([`CommandRunner`])
//! - [`gateway`]: git queries and push plumbing on top of a runner
//! - [`repos`]: the fixed repository pair and its per-repository locks
//! - [`engine`]: [`SyncEngine`], the branch/commit/push operations

pub mod engine;
pub mod error;
pub mod gateway;
pub mod process;
pub mod repos;

pub use engine::SyncEngine;
pub use error::SyncError;
pub use gateway::{BranchTip, RepositoryGateway};
pub use process::{CommandRunner, ProcessOutput, SystemRunner};
