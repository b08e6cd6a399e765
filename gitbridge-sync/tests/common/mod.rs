//! Shared fixture: two bare "remote" repositories plus an authoring clone
//! used to publish commits to them. The engine clones its own working copies
//! on demand under `<root>/work/`.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gitbridge_core::{RepositoryConfig, RepositoryPairConfig};
use gitbridge_sync::{CommandRunner, ProcessOutput, SyncEngine, SystemRunner};
use tempfile::TempDir;

pub const GIT_TIMEOUT: Duration = Duration::from_secs(30);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run git for fixture setup and return trimmed stdout. Panics on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    git_dated(dir, args, "2024-01-01T00:00:00+00:00")
}

fn git_dated(dir: &Path, args: &[&str], date: &str) -> String {
    let output = Command::new("git")
        .args(["-c", "init.defaultBranch=main", "-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Fixture Dev")
        .env("GIT_AUTHOR_EMAIL", "dev@example.com")
        .env("GIT_COMMITTER_NAME", "Fixture Dev")
        .env("GIT_COMMITTER_EMAIL", "dev@example.com")
        .env("GIT_AUTHOR_DATE", date)
        .env("GIT_COMMITTER_DATE", date)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub struct Fixture {
    pub root: TempDir,
    pub internal_remote: PathBuf,
    pub customer_remote: PathBuf,
    pub author: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        init_tracing();
        let root = TempDir::new().expect("tempdir");
        let internal_remote = root.path().join("remotes/internal.git");
        let customer_remote = root.path().join("remotes/customer.git");
        let author = root.path().join("author");
        for dir in [&internal_remote, &customer_remote, &author] {
            std::fs::create_dir_all(dir).expect("mkdir");
        }
        git(&internal_remote, &["init", "--bare", "-q"]);
        git(&customer_remote, &["init", "--bare", "-q"]);
        git(&author, &["init", "-q"]);
        git(&author, &["remote", "add", "internal", path_str(&internal_remote)]);
        git(&author, &["remote", "add", "customer", path_str(&customer_remote)]);
        Self {
            root,
            internal_remote,
            customer_remote,
            author,
        }
    }

    /// Commit one file change in the authoring clone and return the new sha.
    pub fn commit(&self, file: &str, content: &str, message: &str, date: &str) -> String {
        std::fs::write(self.author.join(file), content).expect("write file");
        git(&self.author, &["add", file]);
        git_dated(&self.author, &["commit", "-q", "-m", message], date);
        git(&self.author, &["rev-parse", "HEAD"])
    }

    pub fn checkout_new(&self, branch: &str) {
        git(&self.author, &["checkout", "-q", "-B", branch]);
    }

    pub fn reset_to(&self, sha: &str) {
        git(&self.author, &["reset", "-q", "--hard", sha]);
    }

    /// Force the authoring HEAD onto `refs/heads/<branch>` of `remote`.
    pub fn publish(&self, remote: &str, branch: &str) {
        let refspec = format!("HEAD:refs/heads/{branch}");
        git(&self.author, &["push", "-q", "--force", remote, &refspec]);
    }

    pub fn remote_tip(&self, bare: &Path, branch: &str) -> Option<String> {
        let output = Command::new("git")
            .args(["rev-parse", "--verify", "-q"])
            .arg(format!("refs/heads/{branch}"))
            .current_dir(bare)
            .output()
            .expect("spawn git");
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn work_dir(&self, name: &str) -> PathBuf {
        self.root.path().join("work").join("clones").join(name)
    }

    pub fn remotes_of(&self, name: &str) -> Vec<String> {
        let out = git(&self.work_dir(name), &["remote"]);
        let mut names: Vec<String> = out.lines().map(str::to_owned).collect();
        names.sort();
        names
    }

    pub fn pair_config(&self) -> RepositoryPairConfig {
        RepositoryPairConfig {
            internal: RepositoryConfig {
                name: "internal".into(),
                local_path: self.work_dir("internal"),
                remote_url: path_str(&self.internal_remote).to_string(),
            },
            customer: RepositoryConfig {
                name: "customer".into(),
                local_path: self.work_dir("customer"),
                remote_url: path_str(&self.customer_remote).to_string(),
            },
        }
    }

    pub fn engine(&self) -> SyncEngine {
        SyncEngine::with_system_git(self.pair_config(), GIT_TIMEOUT)
    }

    pub fn recording_engine(&self) -> (SyncEngine, Arc<RecordingRunner>) {
        let runner = Arc::new(RecordingRunner::default());
        let engine = SyncEngine::with_runner(self.pair_config(), runner.clone(), GIT_TIMEOUT);
        (engine, runner)
    }

    pub fn engine_with(&self, runner: Arc<dyn CommandRunner>) -> SyncEngine {
        SyncEngine::with_runner(self.pair_config(), runner, GIT_TIMEOUT)
    }
}

pub fn path_str(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

/// Real git, with every invocation's arguments recorded.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Vec<String>>>,
}

impl RecordingRunner {
    pub fn subcommands(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .filter_map(|args| args.first().cloned())
            .collect()
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("lock").clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn execute(
        &self,
        program: &str,
        args: &[&str],
        working_dir: &Path,
        timeout: Duration,
    ) -> ProcessOutput {
        self.calls
            .lock()
            .expect("lock")
            .push(args.iter().map(|a| a.to_string()).collect());
        SystemRunner.execute(program, args, working_dir, timeout)
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Real git, running `hook` once right before the first `git push`.
pub struct BeforePushRunner {
    hook: Mutex<Option<Hook>>,
}

impl BeforePushRunner {
    pub fn new(hook: impl FnOnce() + Send + 'static) -> Self {
        Self {
            hook: Mutex::new(Some(Box::new(hook))),
        }
    }
}

impl CommandRunner for BeforePushRunner {
    fn execute(
        &self,
        program: &str,
        args: &[&str],
        working_dir: &Path,
        timeout: Duration,
    ) -> ProcessOutput {
        if args.first() == Some(&"push") {
            let hook = self.hook.lock().expect("lock").take();
            if let Some(hook) = hook {
                hook();
            }
        }
        SystemRunner.execute(program, args, working_dir, timeout)
    }
}
