//! Domain types shared by the worker, the coordinator and the operator CLI.
//!
//! Every value here is transient: it is rebuilt from on-disk repository state
//! on each call and never persisted. Wire DTOs serialize with camelCase field
//! names; dates are RFC 3339 UTC.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of one of the two configured repositories. Also the lock key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepositoryName(pub String);

impl RepositoryName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RepositoryName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RepositoryName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl PartialEq<str> for RepositoryName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

// ---------------------------------------------------------------------------
// Configuration-backed structs
// ---------------------------------------------------------------------------

/// One repository the worker manages: where it lives on disk and where its
/// `origin` points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub name: RepositoryName,
    pub local_path: PathBuf,
    pub remote_url: String,
}

/// Public view of a repository: only its name leaves the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

/// A remote-tracking branch with its tip metadata and a point-in-time
/// comparison against the paired repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchInfo {
    pub name: String,
    pub last_commit_hash: String,
    pub last_commit_message: String,
    pub last_commit_author: String,
    pub last_commit_date: DateTime<Utc>,
    pub is_remote: bool,
    pub is_synchronized_with_other: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_repo_commit_hash: Option<String>,
}

/// One commit of a branch history walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub message: String,
    pub author: String,
    pub date: DateTime<Utc>,
}

/// Length of the abbreviated hashes shown to operators.
pub const SHORT_HASH_LEN: usize = 8;

/// First [`SHORT_HASH_LEN`] characters of `hash` (or all of it when shorter).
pub fn short_hash(hash: &str) -> &str {
    hash.get(..SHORT_HASH_LEN).unwrap_or(hash)
}

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

/// Outcome of a push attempt. `success` and `has_conflicts` are the decision
/// signals; `message` is for humans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub message: String,
    pub has_conflicts: bool,
    #[serde(default)]
    pub conflict_details: Vec<String>,
}

impl SyncResult {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            has_conflicts: false,
            conflict_details: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            has_conflicts: false,
            conflict_details: Vec::new(),
        }
    }

    pub fn conflict(message: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            has_conflicts: true,
            conflict_details: details,
        }
    }
}

/// The only mutating input in the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushBranchRequest {
    pub branch: String,
    pub from_repository: String,
    pub to_repository: String,
    #[serde(default)]
    pub force: bool,
}

/// Default history depth for commit listings.
pub const DEFAULT_COMMIT_COUNT: usize = 10;

/// Upper bound on commits returned by one history query.
pub const MAX_COMMIT_COUNT: usize = 1000;

fn default_commit_count() -> usize {
    DEFAULT_COMMIT_COUNT
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetCommitsRequest {
    pub repository: String,
    pub branch: String,
    #[serde(default = "default_commit_count")]
    pub count: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hash_truncates_to_eight() {
        assert_eq!(short_hash("aaaa1111bbbb2222"), "aaaa1111");
        assert_eq!(short_hash("abc"), "abc");
    }

    #[test]
    fn branch_info_uses_camel_case_on_the_wire() {
        let info = BranchInfo {
            name: "main".into(),
            last_commit_hash: "aaaa1111".into(),
            last_commit_message: "init".into(),
            last_commit_author: "Dev".into(),
            last_commit_date: Utc::now(),
            is_remote: true,
            is_synchronized_with_other: false,
            other_repo_commit_hash: None,
        };
        let json = serde_json::to_value(&info).expect("serialize");
        assert!(json.get("lastCommitHash").is_some());
        assert!(json.get("isSynchronizedWithOther").is_some());
        assert!(
            json.get("otherRepoCommitHash").is_none(),
            "absent counterpart is omitted"
        );
    }

    #[test]
    fn commits_request_defaults_count() {
        let req: GetCommitsRequest =
            serde_json::from_str(r#"{"repository":"internal","branch":"main"}"#).expect("parse");
        assert_eq!(req.count, DEFAULT_COMMIT_COUNT);
    }

    #[test]
    fn push_request_force_defaults_false() {
        let req: PushBranchRequest = serde_json::from_str(
            r#"{"branch":"main","fromRepository":"internal","toRepository":"customer"}"#,
        )
        .expect("parse");
        assert!(!req.force);
    }

    #[test]
    fn conflict_result_flags() {
        let r = SyncResult::conflict("diverged", vec!["a".into(), "b".into()]);
        assert!(!r.success);
        assert!(r.has_conflicts);
        assert_eq!(r.conflict_details.len(), 2);
    }
}
