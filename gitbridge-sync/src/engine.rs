//! Sync engine: branch comparison, commit history and the push decision.
//!
//! Every entry point is blocking and takes the per-repository locks it needs
//! for its whole duration. Callers on an async runtime should run these on a
//! blocking thread.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use gitbridge_core::{
    BranchInfo, CommitInfo, PushBranchRequest, RepositoryConfig, RepositoryInfo,
    RepositoryPairConfig, SyncResult,
};

use crate::error::SyncError;
use crate::gateway::{is_valid_branch_name, BranchTip, RepositoryGateway};
use crate::process::{CommandRunner, SystemRunner};
use crate::repos::{lock_both, RepositoryPair};

const TEMP_REMOTE_PREFIX: &str = "gitbridge_tmp_";

pub struct SyncEngine {
    repositories: RepositoryPair,
    gateway: RepositoryGateway,
}

impl SyncEngine {
    pub fn new(repositories: RepositoryPairConfig, gateway: RepositoryGateway) -> Self {
        Self {
            repositories: RepositoryPair::new(repositories),
            gateway,
        }
    }

    /// Engine backed by the real `git` binary.
    pub fn with_system_git(repositories: RepositoryPairConfig, git_timeout: Duration) -> Self {
        Self::with_runner(repositories, Arc::new(SystemRunner), git_timeout)
    }

    pub fn with_runner(
        repositories: RepositoryPairConfig,
        runner: Arc<dyn CommandRunner>,
        git_timeout: Duration,
    ) -> Self {
        Self::new(repositories, RepositoryGateway::new(runner, git_timeout))
    }

    /// Public names of the configured repositories. Paths and URLs stay local.
    pub fn repository_configs(&self) -> Vec<RepositoryInfo> {
        self.repositories
            .configs()
            .map(|c| RepositoryInfo {
                name: c.name.to_string(),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Remote branches of `repository`, each compared with the same-named
    /// branch of the other repository, newest tip first.
    pub fn branches(&self, repository: &str) -> Result<Vec<BranchInfo>, SyncError> {
        let (repo, other) = self.repositories.resolve(repository)?;
        let _guard = lock_both(repo, other);

        tracing::info!(repository = %repository, "listing branches");
        self.prepare(repo.config())?;
        self.prepare(other.config())?;

        let other_tips: HashMap<String, String> = self
            .gateway
            .list_remote_branches(other.config())
            .into_iter()
            .filter_map(Result::ok)
            .map(|tip| (tip.name, tip.sha))
            .collect();

        let mut branches = Vec::new();
        for tip in self.gateway.list_remote_branches(repo.config()) {
            match tip {
                Ok(tip) => {
                    let other_sha = other_tips.get(&tip.name).cloned();
                    branches.push(branch_info(tip, other_sha));
                }
                Err(err) => {
                    tracing::warn!(repository = %repository, error = %err, "skipping branch");
                }
            }
        }

        branches.sort_by(|a, b| b.last_commit_date.cmp(&a.last_commit_date));
        tracing::info!(repository = %repository, count = branches.len(), "listed branches");
        Ok(branches)
    }

    /// Up to `count` commits of `origin/<branch>`, newest first. A missing
    /// branch is an empty history.
    pub fn commits(
        &self,
        repository: &str,
        branch: &str,
        count: usize,
    ) -> Result<Vec<CommitInfo>, SyncError> {
        let (repo, _) = self.repositories.resolve(repository)?;
        let _guard = repo.lock();

        if !is_valid_branch_name(branch) {
            tracing::warn!(repository = %repository, branch = %branch, "rejected branch name");
            return Ok(Vec::new());
        }

        self.prepare(repo.config())?;
        let commits = self.gateway.list_commits(repo.config(), branch, count);
        tracing::debug!(
            repository = %repository,
            branch = %branch,
            count = commits.len(),
            "listed commits",
        );
        Ok(commits)
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Bring `to_repository`'s `origin/<branch>` to `from_repository`'s tip.
    ///
    /// Only an unknown repository name or a same-repository request is an
    /// `Err`; every other outcome, including git failures, is a [`SyncResult`].
    pub fn push_branch(&self, request: &PushBranchRequest) -> Result<SyncResult, SyncError> {
        let (from, _) = self.repositories.resolve(&request.from_repository)?;
        let (to, _) = self.repositories.resolve(&request.to_repository)?;
        if from.name() == to.name() {
            return Err(SyncError::SameRepository(request.from_repository.clone()));
        }

        let _guard = lock_both(from, to);
        tracing::info!(
            branch = %request.branch,
            from = %from.name(),
            to = %to.name(),
            force = request.force,
            "push requested",
        );

        let result = self
            .push_locked(from.config(), to.config(), &request.branch, request.force)
            .unwrap_or_else(|err| {
                tracing::error!(branch = %request.branch, error = %err, "push aborted");
                SyncResult::failed(format!("Synchronization error: {err}"))
            });

        if result.success {
            tracing::info!(branch = %request.branch, "push finished");
        } else {
            tracing::warn!(
                branch = %request.branch,
                has_conflicts = result.has_conflicts,
                message = %result.message,
                "push not applied",
            );
        }
        Ok(result)
    }

    fn push_locked(
        &self,
        from: &RepositoryConfig,
        to: &RepositoryConfig,
        branch: &str,
        force: bool,
    ) -> Result<SyncResult, SyncError> {
        if !is_valid_branch_name(branch) {
            return Ok(SyncResult::failed(format!("Invalid branch name '{branch}'")));
        }

        self.prepare(from)?;
        self.prepare(to)?;

        let Some(source) = self.gateway.resolve_branch(from, branch) else {
            return Ok(SyncResult::failed(format!(
                "Branch '{branch}' not found in {}",
                from.name
            )));
        };
        let target = self.gateway.resolve_branch(to, branch);

        if target.as_ref().is_some_and(|t| t.sha == source.sha) {
            return Ok(SyncResult::succeeded(format!(
                "Branch '{branch}' is already synchronized\nNo push needed"
            )));
        }

        let mut fast_forward = false;
        if let (Some(target), false) = (&target, force) {
            fast_forward = self
                .gateway
                .is_ancestor(&from.local_path, &target.sha, &source.sha);
            if !fast_forward {
                return Ok(diverged(branch, from, &source, to, target));
            }
        }

        let checkout = self.gateway.checkout_tracking(&from.local_path, branch);
        if !checkout.success() {
            return Ok(SyncResult::failed(format!(
                "Failed to checkout branch: {}",
                checkout.stderr.trim()
            )));
        }

        let remote = match TemporaryRemote::add(&self.gateway, &from.local_path, &to.remote_url) {
            Ok(remote) => remote,
            Err(reason) => {
                return Ok(SyncResult::failed(format!(
                    "Failed to add temporary remote: {reason}"
                )))
            }
        };

        let push = self
            .gateway
            .push(&from.local_path, remote.name(), branch, force);
        drop(remote);

        if !push.success() {
            let stderr = push.stderr.trim();
            let rejected = stderr.contains("rejected") || stderr.contains("fetch first");
            if rejected {
                if let Some(fresh) = self.target_ahead_of(to, branch, &source) {
                    return Ok(target_ahead(branch, from, &source, to, &fresh));
                }
            }
            return Ok(SyncResult::failed(format!("Push failed: {stderr}")));
        }

        let kind = if force {
            "Force push"
        } else if fast_forward {
            "Fast-forward"
        } else {
            "Push"
        };
        Ok(SyncResult::succeeded(format!(
            "Successfully synchronized branch '{branch}'\nFrom: {}\nTo: {}\nType: {kind}",
            from.name, to.name
        )))
    }

    /// After a rejected push: refetch `to` and return its current tip of
    /// `branch` when `source` is an ancestor of it. Runs in the target's
    /// working copy, which holds both tips in that case.
    fn target_ahead_of(
        &self,
        to: &RepositoryConfig,
        branch: &str,
        source: &BranchTip,
    ) -> Option<BranchTip> {
        self.gateway.fetch(to);
        let fresh = self.gateway.resolve_branch(to, branch)?;
        let ahead = fresh.sha != source.sha
            && self
                .gateway
                .is_ancestor(&to.local_path, &source.sha, &fresh.sha);
        ahead.then_some(fresh)
    }

    /// Clone if needed, then refresh remote-tracking refs.
    fn prepare(&self, config: &RepositoryConfig) -> Result<(), SyncError> {
        self.gateway.ensure_cloned(config)?;
        self.gateway.fetch(config);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Temporary remote
// ---------------------------------------------------------------------------

/// A uniquely named remote in the source working copy pointing at the target
/// repository's URL. Removed on drop, on every exit path.
struct TemporaryRemote<'a> {
    gateway: &'a RepositoryGateway,
    repo_path: &'a Path,
    name: String,
}

impl<'a> TemporaryRemote<'a> {
    fn add(gateway: &'a RepositoryGateway, repo_path: &'a Path, url: &str) -> Result<Self, String> {
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("{TEMP_REMOTE_PREFIX}{}", &suffix[..8]);
        let result = gateway.add_remote(repo_path, &name, url);
        if !result.success() {
            return Err(result.stderr.trim().to_string());
        }
        tracing::debug!(remote = %name, "added temporary remote");
        Ok(Self {
            gateway,
            repo_path,
            name,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TemporaryRemote<'_> {
    fn drop(&mut self) {
        let result = self.gateway.remove_remote(self.repo_path, &self.name);
        if result.success() {
            tracing::debug!(remote = %self.name, "removed temporary remote");
        } else {
            tracing::warn!(
                remote = %self.name,
                error = %result.stderr.trim(),
                "failed to remove temporary remote",
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Result builders
// ---------------------------------------------------------------------------

fn branch_info(tip: BranchTip, other_sha: Option<String>) -> BranchInfo {
    BranchInfo {
        is_synchronized_with_other: other_sha.as_deref() == Some(tip.sha.as_str()),
        name: tip.name,
        last_commit_hash: tip.sha,
        last_commit_message: tip.subject,
        last_commit_author: tip.author,
        last_commit_date: tip.date,
        is_remote: true,
        other_repo_commit_hash: other_sha,
    }
}

fn tip_details(
    from: &RepositoryConfig,
    source: &BranchTip,
    to: &RepositoryConfig,
    target: &BranchTip,
) -> Vec<String> {
    vec![
        format!("{}: {} - {}", from.name, source.short_sha(), source.subject),
        format!("{}: {} - {}", to.name, target.short_sha(), target.subject),
    ]
}

fn diverged(
    branch: &str,
    from: &RepositoryConfig,
    source: &BranchTip,
    to: &RepositoryConfig,
    target: &BranchTip,
) -> SyncResult {
    let details = tip_details(from, source, to, target);
    SyncResult::conflict(
        format!(
            "Branches have diverged! Branch '{branch}' in {} contains commits that are not in {}.\n\
             {}\n{}\n\
             Use force push to overwrite.",
            to.name, from.name, details[0], details[1]
        ),
        details,
    )
}

fn target_ahead(
    branch: &str,
    from: &RepositoryConfig,
    source: &BranchTip,
    to: &RepositoryConfig,
    target: &BranchTip,
) -> SyncResult {
    let details = tip_details(from, source, to, target);
    SyncResult::conflict(
        format!(
            "Branch '{branch}' in {} has new commits that are not in {}.\n\
             {}\n{}\n\
             A force push would discard those commits from {}.",
            to.name, from.name, details[0], details[1], to.name
        ),
        details,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tip(sha: &str) -> BranchTip {
        BranchTip {
            name: "main".into(),
            sha: sha.into(),
            subject: "msg".into(),
            author: "Dev".into(),
            date: Utc::now(),
        }
    }

    #[test]
    fn branch_info_flags_equal_tips_as_synchronized() {
        let info = branch_info(tip("aaaa1111cccc"), Some("aaaa1111cccc".into()));
        assert!(info.is_synchronized_with_other);
        assert!(info.is_remote);

        let info = branch_info(tip("aaaa1111cccc"), Some("bbbb2222dddd".into()));
        assert!(!info.is_synchronized_with_other);
        assert_eq!(info.other_repo_commit_hash.as_deref(), Some("bbbb2222dddd"));

        let info = branch_info(tip("aaaa1111cccc"), None);
        assert!(!info.is_synchronized_with_other);
        assert!(info.other_repo_commit_hash.is_none());
    }

    #[test]
    fn diverged_conflict_names_both_short_tips() {
        let repo = |name: &str| RepositoryConfig {
            name: name.into(),
            local_path: format!("/srv/{name}").into(),
            remote_url: String::new(),
        };
        let result = diverged(
            "main",
            &repo("internal"),
            &tip("aaaa1111ffff"),
            &repo("customer"),
            &tip("bbbb2222ffff"),
        );
        assert!(result.has_conflicts);
        assert!(!result.success);
        assert!(result.message.contains("diverged"));
        assert!(result.message.contains("force push"));
        assert!(result.message.contains("internal: aaaa1111 - msg"), "{}", result.message);
        assert!(result.message.contains("customer: bbbb2222 - msg"), "{}", result.message);
        assert!(result.conflict_details[0].contains("aaaa1111"));
        assert!(result.conflict_details[1].contains("bbbb2222"));
    }

    #[test]
    fn target_ahead_conflict_warns_that_force_discards_commits() {
        let repo = |name: &str| RepositoryConfig {
            name: name.into(),
            local_path: format!("/srv/{name}").into(),
            remote_url: String::new(),
        };
        let result = target_ahead(
            "main",
            &repo("internal"),
            &tip("aaaa1111ffff"),
            &repo("customer"),
            &tip("cccc3333ffff"),
        );
        assert!(result.has_conflicts);
        assert!(!result.success);
        assert!(result.message.contains("cccc3333"), "{}", result.message);
        assert!(result.message.contains("discard those commits from customer"));
    }
}
