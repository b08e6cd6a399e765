//! Repository gateway: clone-on-demand, fetch, ref enumeration and ancestry
//! queries, all built on a [`CommandRunner`] driving the `git` CLI.
//!
//! Read queries fold git failures into absence (`None`, empty vectors) and
//! log a warning; only [`RepositoryGateway::ensure_cloned`] raises.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use gitbridge_core::{short_hash, CommitInfo, RepositoryConfig, MAX_COMMIT_COUNT};

use crate::error::SyncError;
use crate::process::{CommandRunner, ProcessOutput};

const GIT: &str = "git";
const ORIGIN_PREFIX: &str = "refs/remotes/origin/";
const FIELD_SEP: char = '\u{1f}';

// `for-each-ref` spells hex escapes `%xx`; `log` spells them `%xXX`.
const REF_FORMAT: &str = "--format=%(refname)%1f%(objectname)%1f%(subject)%1f%(authorname)%1f%(authordate:iso-strict)";
const LOG_FORMAT: &str = "--format=%H%x1f%s%x1f%an%x1f%aI";

/// Tip commit of one remote-tracking branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchTip {
    /// Branch name without the `origin/` prefix.
    pub name: String,
    pub sha: String,
    pub subject: String,
    pub author: String,
    pub date: DateTime<Utc>,
}

impl BranchTip {
    pub fn short_sha(&self) -> &str {
        short_hash(&self.sha)
    }
}

#[derive(Clone)]
pub struct RepositoryGateway {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl RepositoryGateway {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    pub fn git(&self, working_dir: &Path, args: &[&str]) -> ProcessOutput {
        self.runner.execute(GIT, args, working_dir, self.timeout)
    }

    /// `true` when `local_path` is the top of a git working copy.
    pub fn is_repository(&self, config: &RepositoryConfig) -> bool {
        config.local_path.join(".git").exists()
            && self
                .git(&config.local_path, &["rev-parse", "--git-dir"])
                .success()
    }

    /// Clone `remote_url` into `local_path` unless a repository is already there.
    ///
    /// Returns `SyncError::RepositoryUnavailable` carrying the manual
    /// `git clone` command when the automatic clone fails.
    pub fn ensure_cloned(&self, config: &RepositoryConfig) -> Result<(), SyncError> {
        if self.is_repository(config) {
            return Ok(());
        }

        tracing::warn!(
            repository = %config.name,
            path = %config.local_path.display(),
            "repository not found locally, cloning",
        );

        let parent = config
            .local_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|err| unavailable(config, &format!("cannot create {}: {err}", parent.display())))?;
            tracing::info!(path = %parent.display(), "created parent directory");
        }

        let Some(target) = config.local_path.file_name() else {
            return Err(unavailable(config, "local_path has no final directory component"));
        };
        let target = target.to_string_lossy();
        let result = self.git(parent, &["clone", &config.remote_url, &target]);
        if result.success() {
            tracing::info!(repository = %config.name, "cloned repository");
            return Ok(());
        }

        tracing::error!(repository = %config.name, error = %result.stderr.trim(), "clone failed");
        Err(unavailable(config, result.stderr.trim()))
    }

    /// Best-effort `fetch origin --prune`; stale refs beat a hard failure.
    pub fn fetch(&self, config: &RepositoryConfig) {
        let result = self.git(&config.local_path, &["fetch", "origin", "--prune"]);
        if !result.success() {
            tracing::warn!(
                repository = %config.name,
                error = %result.stderr.trim(),
                "fetch failed, using cached refs",
            );
        }
    }

    /// Every `origin/*` branch except the symbolic `HEAD`, one entry per ref.
    /// A ref whose line cannot be parsed yields an `Err` entry so callers can
    /// skip it without losing the rest.
    pub fn list_remote_branches(
        &self,
        config: &RepositoryConfig,
    ) -> Vec<Result<BranchTip, SyncError>> {
        let result = self.git(
            &config.local_path,
            &["for-each-ref", REF_FORMAT, "refs/remotes/origin"],
        );
        if !result.success() {
            tracing::warn!(
                repository = %config.name,
                error = %result.stderr.trim(),
                "listing remote branches failed",
            );
            return Vec::new();
        }
        parse_ref_lines(&result.stdout)
    }

    /// Tip of `origin/<name>`, or `None` when the branch does not exist.
    pub fn resolve_branch(&self, config: &RepositoryConfig, name: &str) -> Option<BranchTip> {
        let pattern = format!("{ORIGIN_PREFIX}{name}");
        let result = self.git(&config.local_path, &["for-each-ref", REF_FORMAT, &pattern]);
        if !result.success() {
            tracing::warn!(
                repository = %config.name,
                branch = %name,
                error = %result.stderr.trim(),
                "resolving branch failed, treating as absent",
            );
            return None;
        }

        // The pattern also matches `origin/<name>/...`; keep the exact ref only.
        parse_ref_lines(&result.stdout)
            .into_iter()
            .filter_map(|tip| match tip {
                Ok(tip) => Some(tip),
                Err(err) => {
                    tracing::warn!(repository = %config.name, error = %err, "skipping unparseable ref");
                    None
                }
            })
            .find(|tip| tip.name == name)
    }

    /// `git merge-base --is-ancestor`. Exit 0 is `true`, exit 1 is `false`;
    /// anything else (unknown object, timeout) is logged and reported as `false`.
    pub fn is_ancestor(&self, repo_path: &Path, ancestor: &str, descendant: &str) -> bool {
        let result = self.git(repo_path, &["merge-base", "--is-ancestor", ancestor, descendant]);
        match result.exit_code {
            0 => {
                tracing::debug!(
                    ancestor = short_hash(ancestor),
                    descendant = short_hash(descendant),
                    "is an ancestor",
                );
                true
            }
            1 => {
                tracing::debug!(
                    ancestor = short_hash(ancestor),
                    descendant = short_hash(descendant),
                    "is not an ancestor",
                );
                false
            }
            code => {
                tracing::warn!(
                    exit_code = code,
                    error = %result.stderr.trim(),
                    "ancestry unknown, treating as not an ancestor",
                );
                false
            }
        }
    }

    /// Newest-first history of `origin/<branch>`, at most `max_count` entries
    /// and never more than [`MAX_COMMIT_COUNT`]. Empty when the branch does
    /// not exist.
    pub fn list_commits(
        &self,
        config: &RepositoryConfig,
        branch: &str,
        max_count: usize,
    ) -> Vec<CommitInfo> {
        let max_count = max_count.min(MAX_COMMIT_COUNT);
        if max_count == 0 || self.resolve_branch(config, branch).is_none() {
            return Vec::new();
        }

        let reference = format!("{ORIGIN_PREFIX}{branch}");
        let count = max_count.to_string();
        let result = self.git(
            &config.local_path,
            &["log", LOG_FORMAT, "-n", &count, &reference, "--"],
        );
        if !result.success() {
            tracing::warn!(
                repository = %config.name,
                branch = %branch,
                error = %result.stderr.trim(),
                "listing commits failed",
            );
            return Vec::new();
        }

        result
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match parse_commit_line(line) {
                Ok(commit) => Some(commit),
                Err(err) => {
                    tracing::warn!(repository = %config.name, error = %err, "skipping unparseable commit");
                    None
                }
            })
            .take(max_count)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Push plumbing
    // -----------------------------------------------------------------------

    /// Create or reset local `<branch>` to track `origin/<branch>` and check it out.
    pub fn checkout_tracking(&self, repo_path: &Path, branch: &str) -> ProcessOutput {
        let upstream = format!("origin/{branch}");
        self.git(repo_path, &["checkout", "-B", branch, &upstream])
    }

    pub fn add_remote(&self, repo_path: &Path, name: &str, url: &str) -> ProcessOutput {
        self.git(repo_path, &["remote", "add", name, url])
    }

    pub fn remove_remote(&self, repo_path: &Path, name: &str) -> ProcessOutput {
        self.git(repo_path, &["remote", "remove", name])
    }

    pub fn push(&self, repo_path: &Path, remote: &str, branch: &str, force: bool) -> ProcessOutput {
        let mut args = vec!["push", remote, branch];
        if force {
            args.push("--force");
        }
        self.git(repo_path, &args)
    }
}

/// Branch names are passed to git as arguments; refuse anything that could be
/// read as an option or a revision range.
pub fn is_valid_branch_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && !name.contains("..")
        && !name.chars().any(|c| c.is_whitespace() || c.is_control())
}

fn unavailable(config: &RepositoryConfig, reason: &str) -> SyncError {
    SyncError::RepositoryUnavailable {
        name: config.name.to_string(),
        message: format!(
            "failed to clone automatically: {reason}\nPlease clone manually:\ngit clone {} {}",
            config.remote_url,
            config.local_path.display()
        ),
    }
}

fn parse_ref_lines(stdout: &str) -> Vec<Result<BranchTip, SyncError>> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let refname = line.split(FIELD_SEP).next().unwrap_or_default();
            let name = refname.strip_prefix(ORIGIN_PREFIX)?;
            if name == "HEAD" {
                return None;
            }
            Some(parse_ref_line(name, line))
        })
        .collect()
}

fn parse_ref_line(name: &str, line: &str) -> Result<BranchTip, SyncError> {
    let fields: Vec<&str> = line.split(FIELD_SEP).collect();
    let [_, sha, subject, author, date] = fields.as_slice() else {
        return Err(SyncError::Parse(format!("malformed ref line for {name}: {line:?}")));
    };
    Ok(BranchTip {
        name: name.to_string(),
        sha: sha.to_string(),
        subject: subject.to_string(),
        author: author.to_string(),
        date: parse_date(date)?,
    })
}

fn parse_commit_line(line: &str) -> Result<CommitInfo, SyncError> {
    let fields: Vec<&str> = line.split(FIELD_SEP).collect();
    let [hash, message, author, date] = fields.as_slice() else {
        return Err(SyncError::Parse(format!("malformed log line: {line:?}")));
    };
    Ok(CommitInfo {
        hash: hash.to_string(),
        short_hash: short_hash(hash).to_string(),
        message: message.to_string(),
        author: author.to_string(),
        date: parse_date(date)?,
    })
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, SyncError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|err| SyncError::Parse(format!("bad commit date {raw:?}: {err}")))
}
