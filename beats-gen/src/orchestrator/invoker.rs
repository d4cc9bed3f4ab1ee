//! Subprocess execution with timeout enforcement
//!
//! Runs one [`JobInvocation`] to completion: stdin is closed, stdout and
//! stderr are drained concurrently, and a process that outlives its timeout
//! is killed. The invoker never returns an error; every failure mode is
//! reported through [`ProcessOutcome`].

use super::command::JobInvocation;
use serde::Serialize;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Time allowed after a kill for the process to be reaped and its pipes drained
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Result of running one subprocess
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    /// Exit code; `None` if the process never started or was killed on timeout
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ProcessOutcome {
    /// Outcome for a process that could not be started
    pub fn spawn_failure(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: message.into(),
            duration_ms,
            timed_out: false,
        }
    }

    /// True when the process ran and exited with status 0
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// JSON report printed on stdout, if any
    ///
    /// Accepts either a stdout that is entirely one JSON value or, failing
    /// that, the last line that parses as JSON.
    pub fn stdout_json(&self) -> Option<serde_json::Value> {
        let trimmed = self.stdout.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return value.is_object().then_some(value);
        }
        trimmed
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line.trim()).ok())
            .find(|value| value.is_object())
    }
}

/// Spawns and supervises generation subprocesses
#[derive(Debug, Clone, Copy)]
pub struct ProcessInvoker {
    kill_grace: Duration,
}

impl Default for ProcessInvoker {
    fn default() -> Self {
        Self {
            kill_grace: KILL_GRACE,
        }
    }
}

impl ProcessInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the post-kill grace window
    pub fn with_kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    /// Run the invocation to completion or timeout
    ///
    /// Resolves within `invocation.timeout` plus the kill grace window.
    pub async fn invoke(&self, invocation: &JobInvocation) -> ProcessOutcome {
        let start = Instant::now();

        debug!(command = %invocation.display(), "Spawning generation process");

        let mut command = Command::new(&invocation.command);
        command
            .args(&invocation.arguments)
            .current_dir(&invocation.working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    command = %invocation.command.display(),
                    error = %e,
                    "Failed to spawn generation process"
                );
                return ProcessOutcome::spawn_failure(
                    format!(
                        "failed to start {}: {}",
                        invocation.command.display(),
                        e
                    ),
                    elapsed_ms(start),
                );
            }
        };

        let pid = child.id();
        let stdout_task = child.stdout.take().map(|pipe| tokio::spawn(drain(pipe)));
        let stderr_task = child.stderr.take().map(|pipe| tokio::spawn(drain(pipe)));

        match tokio::time::timeout(invocation.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let exit_code = exit_code_of(status);
                // Grandchildren may still hold the pipes open
                let deadline = Instant::now() + self.kill_grace;
                let stdout = collect(stdout_task, deadline).await;
                let stderr = collect(stderr_task, deadline).await;
                let duration_ms = elapsed_ms(start);

                info!(
                    pid = ?pid,
                    exit_code,
                    duration_ms,
                    "Generation process exited"
                );

                ProcessOutcome {
                    exit_code: Some(exit_code),
                    stdout,
                    stderr,
                    duration_ms,
                    timed_out: false,
                }
            }
            Ok(Err(e)) => {
                warn!(pid = ?pid, error = %e, "Failed waiting on generation process");
                let _ = child.start_kill();
                abort(stdout_task);
                abort(stderr_task);
                ProcessOutcome::spawn_failure(
                    format!("failed waiting on process: {}", e),
                    elapsed_ms(start),
                )
            }
            Err(_) => {
                warn!(
                    pid = ?pid,
                    timeout_ms = invocation.timeout.as_millis() as u64,
                    "Generation process timed out, killing"
                );

                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "Kill failed (process may have just exited)");
                }

                let deadline = Instant::now() + self.kill_grace;
                if tokio::time::timeout_at(deadline, child.wait()).await.is_err() {
                    warn!(pid = ?pid, "Process not reaped within kill grace window");
                }

                let stdout = collect(stdout_task, deadline).await;
                let partial = collect(stderr_task, deadline).await;
                let mut stderr = format!(
                    "timeout: process exceeded {} ms and was killed",
                    invocation.timeout.as_millis()
                );
                if !partial.trim().is_empty() {
                    stderr.push('\n');
                    stderr.push_str(partial.trim_end());
                }

                ProcessOutcome {
                    exit_code: None,
                    stdout,
                    stderr,
                    duration_ms: elapsed_ms(start),
                    timed_out: true,
                }
            }
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!(error = %e, "Pipe read ended with error");
    }
    buf
}

async fn collect(task: Option<JoinHandle<Vec<u8>>>, deadline: Instant) -> String {
    let Some(mut task) = task else {
        return String::new();
    };

    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            warn!(error = %e, "Output reader task failed");
            String::new()
        }
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

fn abort(task: Option<JoinHandle<Vec<u8>>>) {
    if let Some(task) = task {
        task.abort();
    }
}

/// Exit code, with signal deaths mapped to `128 + signal`
fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| signal_exit_code(&status))
        .unwrap_or(-1)
}

#[cfg(unix)]
fn signal_exit_code(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|signal| 128 + signal)
}

#[cfg(not(unix))]
fn signal_exit_code(_status: &ExitStatus) -> Option<i32> {
    None
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn invocation(command: &str, args: &[&str], timeout: Duration) -> JobInvocation {
        JobInvocation {
            command: PathBuf::from(command),
            arguments: args.iter().map(|s| s.to_string()).collect(),
            working_directory: std::env::temp_dir(),
            timeout,
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_stdout_json_whole_and_last_line() {
        let mut outcome = ProcessOutcome::spawn_failure("", 0);
        outcome.stdout = r#"{"success": true, "notes": 42}"#.to_string();
        assert_eq!(outcome.stdout_json().unwrap()["notes"], 42);

        outcome.stdout = "loading model...\nstep 1/50\n{\"success\": true}\n".to_string();
        assert_eq!(outcome.stdout_json().unwrap()["success"], true);

        outcome.stdout = "no json here\n42\n".to_string();
        assert!(outcome.stdout_json().is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_reports_missing_interpreter() {
        let outcome = ProcessInvoker::new()
            .invoke(&invocation(
                "/definitely/not/an/interpreter",
                &[],
                Duration::from_secs(5),
            ))
            .await;

        assert_eq!(outcome.exit_code, None);
        assert!(!outcome.timed_out);
        assert!(outcome.stderr.contains("failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let outcome = ProcessInvoker::new()
            .invoke(&invocation(
                "sh",
                &["-c", "echo out; echo err >&2; exit 3"],
                Duration::from_secs(10),
            ))
            .await;

        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
        assert!(!outcome.timed_out);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_is_closed() {
        // `cat` would block forever on an open stdin
        let outcome = ProcessInvoker::new()
            .invoke(&invocation("cat", &[], Duration::from_secs(5)))
            .await;
        assert_eq!(outcome.exit_code, Some(0));
        assert!(!outcome.timed_out);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process_within_grace() {
        let timeout = Duration::from_millis(300);
        let started = std::time::Instant::now();

        let outcome = ProcessInvoker::new()
            .invoke(&invocation("sh", &["-c", "exec sleep 30"], timeout))
            .await;

        assert!(outcome.timed_out);
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.stderr.contains("timeout"));
        assert!(started.elapsed() < timeout + KILL_GRACE + Duration::from_millis(500));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_large_output_does_not_deadlock() {
        // Well past the pipe buffer size on both streams
        let script = "i=0; while [ $i -lt 20000 ]; do echo line-$i; echo err-$i >&2; i=$((i+1)); done";
        let outcome = ProcessInvoker::new()
            .invoke(&invocation("sh", &["-c", script], Duration::from_secs(30)))
            .await;

        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.stdout.contains("line-19999"));
        assert!(outcome.stderr.contains("err-19999"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signal_death_maps_to_128_plus_signal() {
        let outcome = ProcessInvoker::new()
            .invoke(&invocation("sh", &["-c", "kill -9 $$"], Duration::from_secs(5)))
            .await;
        assert_eq!(outcome.exit_code, Some(137));
    }
}
