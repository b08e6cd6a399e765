//! Bounded external-command execution.
//!
//! Callers always receive a [`ProcessOutput`]: launch failures and timeouts
//! are folded into a synthetic result with `exit_code == -1` instead of being
//! returned as errors. Nothing here retries.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Exit code used for results that did not come from a real process exit.
pub const SYNTHETIC_FAILURE_CODE: i32 = -1;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured result of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn synthetic_failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: SYNTHETIC_FAILURE_CODE,
            stdout: String::new(),
            stderr: message.into(),
        }
    }
}

/// Seam between the repository gateway and the operating system.
pub trait CommandRunner: Send + Sync {
    fn execute(
        &self,
        program: &str,
        args: &[&str],
        working_dir: &Path,
        timeout: Duration,
    ) -> ProcessOutput;
}

/// Runs real processes. The child is killed once `timeout` elapses.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn execute(
        &self,
        program: &str,
        args: &[&str],
        working_dir: &Path,
        timeout: Duration,
    ) -> ProcessOutput {
        let rendered = render_command(program, args);
        tracing::debug!(command = %rendered, cwd = %working_dir.display(), "executing");

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Credential prompts would otherwise hang until the timeout.
        if program == "git" {
            command.env("GIT_TERMINAL_PROMPT", "0");
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!(command = %rendered, error = %err, "failed to launch process");
                return ProcessOutput::synthetic_failure(format!(
                    "failed to launch `{rendered}`: {err}"
                ));
            }
        };

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(
                        command = %rendered,
                        timeout_secs = timeout.as_secs_f64(),
                        "process timed out and was killed",
                    );
                    // Reader threads are left detached: a grandchild may still hold the pipes.
                    return ProcessOutput::synthetic_failure(format!(
                        "`{rendered}` timed out after {:.1}s and was killed",
                        timeout.as_secs_f64()
                    ));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return ProcessOutput::synthetic_failure(format!(
                        "failed waiting for `{rendered}`: {err}"
                    ));
                }
            }
        };

        let output = ProcessOutput {
            exit_code: status.code().unwrap_or(SYNTHETIC_FAILURE_CODE),
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
        };

        if !output.success() {
            tracing::warn!(
                command = %rendered,
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "process exited with non-zero status",
            );
        }
        output
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

pub(crate) fn render_command(program: &str, args: &[&str]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(arg);
    }
    rendered
}
