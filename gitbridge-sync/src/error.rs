//! Error types for gitbridge-sync.

use thiserror::Error;

/// Faults raised by the engine. Expected domain outcomes (conflicts, missing
/// branches, failed git commands during a push) are returned as data instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The name is not one of the two configured repositories.
    #[error("Unknown repository: {0}")]
    UnknownRepository(String),

    /// A push named the same repository as source and target.
    #[error("source and target are the same repository: {0}")]
    SameRepository(String),

    /// Clone-on-demand failed; `message` embeds the manual recovery command.
    #[error("repository {name} is unavailable: {message}")]
    RepositoryUnavailable { name: String, message: String },

    /// `git` output the gateway could not interpret.
    #[error("unexpected git output: {0}")]
    Parse(String),
}
