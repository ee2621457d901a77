//! External process execution
//!
//! All interaction with external tooling (git, docker, kubectl, the
//! vulnerability scanners) goes through [`CommandRunner`]. The runner never
//! inherits the server's stdio (stdout carries the wire protocol), enforces a
//! deadline with a terminate-then-kill escalation, and classifies failures
//! into the crate error taxonomy.
//!
//! Secrets are only ever delivered through the child's stdin; they must never
//! appear in the argument vector where other processes could read them.

use crate::error::{AssistError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// How long a process gets between terminate and kill.
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Maximum bytes of captured output retained per stream.
const MAX_CAPTURE: usize = 512 * 1024;

/// Description of a process to launch.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Bytes written to the child's stdin, then closed. Used for secrets.
    pub stdin: Option<Vec<u8>>,
    pub deadline: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
            deadline: Duration::from_secs(60),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Captured result of a completed process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub wall_time: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr concatenated in stream order approximation.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Launches external processes with deadlines and cooperative cancellation.
#[derive(Debug, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run a process to completion, enforcing the command's deadline.
    ///
    /// A non-zero exit is not an error at this layer: callers inspect
    /// `exit_code` and decide. Spawn failures, deadline overruns, and
    /// cancellation are errors.
    pub async fn run(&self, spec: CommandSpec, cancel: &CancellationToken) -> Result<CommandOutput> {
        let started = Instant::now();
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| classify_spawn_error(&spec, e))?;

        if let Some(bytes) = &spec.stdin {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| AssistError::internal("child stdin not captured"))?;
            stdin.write_all(bytes).await.map_err(|e| {
                AssistError::io(format!("writing stdin to {}: {}", spec.program, e))
            })?;
            drop(stdin);
        }

        let pid = child.id();
        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let output = tokio::select! {
            result = &mut wait => result
                .map_err(|e| AssistError::io(format!("waiting for {}: {}", spec.program, e)))?,
            _ = tokio::time::sleep(spec.deadline) => {
                Self::escalate(pid, &mut wait).await;
                return Err(AssistError::timeout(format!(
                    "{} exceeded deadline of {:?}",
                    spec.program, spec.deadline
                ))
                .with_tool(spec.program.clone()));
            }
            _ = cancel.cancelled() => {
                Self::escalate(pid, &mut wait).await;
                return Err(AssistError::cancelled(format!("{} cancelled", spec.program))
                    .with_tool(spec.program.clone()));
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        Ok(CommandOutput {
            stdout: truncate_capture(String::from_utf8_lossy(&output.stdout).into_owned()),
            stderr: truncate_capture(String::from_utf8_lossy(&output.stderr).into_owned()),
            exit_code,
            wall_time: started.elapsed(),
        })
    }

    /// Terminate-then-kill escalation for a child that overran its deadline
    /// or was cancelled.
    ///
    /// Sends SIGTERM via [`terminate_then_kill`] and keeps waiting on the
    /// child through the grace window so a clean shutdown is reaped here;
    /// a child that ignores SIGTERM is SIGKILLed by the helper, with
    /// `kill_on_drop` as the last-resort backstop when this future is
    /// dropped.
    async fn escalate(
        pid: Option<u32>,
        wait: &mut (impl std::future::Future<Output = std::io::Result<std::process::Output>> + Unpin),
    ) {
        if let Some(pid) = pid {
            tokio::spawn(terminate_then_kill(pid));
        }
        let _ = tokio::time::timeout(TERMINATE_GRACE, wait).await;
    }

    /// Run and return combined output, failing on non-zero exit.
    pub async fn run_combined(
        &self,
        spec: CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let program = spec.program.clone();
        let output = self.run(spec, cancel).await?;
        if !output.success() {
            return Err(AssistError::external_tool(format!(
                "{} exited with status {}: {}",
                program,
                output.exit_code,
                output.stderr.trim()
            ))
            .with_tool(program)
            .with_exit_code(output.exit_code));
        }
        Ok(output.combined())
    }

    /// Probe whether a program is runnable from the current PATH.
    pub fn is_available(program: &str) -> bool {
        std::process::Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }
}

/// Terminate a process gracefully, escalating to kill.
///
/// Sends SIGTERM, waits out the grace period, then SIGKILLs whatever is
/// left. The runner spawns this for every child whose deadline expires or
/// whose invocation is cancelled.
#[cfg(unix)]
pub async fn terminate_then_kill(pid: u32) {
    // SIGTERM first so the child can clean up containers and temp files
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
    tokio::time::sleep(TERMINATE_GRACE).await;
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub async fn terminate_then_kill(_pid: u32) {}

fn classify_spawn_error(spec: &CommandSpec, e: std::io::Error) -> AssistError {
    use std::io::ErrorKind as IoKind;
    match e.kind() {
        IoKind::NotFound => AssistError::not_found(format!(
            "{} not found on PATH",
            spec.program
        ))
        .with_tool(spec.program.clone())
        .with_hint(format!("install {} or adjust PATH", spec.program)),
        IoKind::PermissionDenied => AssistError::unauthorized(format!(
            "{} is not executable",
            spec.program
        ))
        .with_tool(spec.program.clone()),
        _ => AssistError::io(format!("failed to spawn {}: {}", spec.program, e))
            .with_tool(spec.program.clone()),
    }
}

fn truncate_capture(mut s: String) -> String {
    if s.len() > MAX_CAPTURE {
        // Keep the tail: build/scan failures report at the end of output
        let cut = s.len() - MAX_CAPTURE;
        let boundary = (cut..s.len()).find(|i| s.is_char_boundary(*i)).unwrap_or(cut);
        s = format!("[truncated {} bytes]\n{}", boundary, &s[boundary..]);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let spec = CommandSpec::new("sh").args(["-c", "echo hello; exit 3"]);
        let output = CommandRunner::new().run(spec, &token()).await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let spec = CommandSpec::new("definitely-not-a-real-program-xyz");
        let err = CommandRunner::new().run(spec, &token()).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
        assert!(err.hint.is_some());
    }

    #[tokio::test]
    async fn deadline_enforced() {
        let spec = CommandSpec::new("sleep")
            .arg("30")
            .deadline(Duration::from_millis(100));
        let err = CommandRunner::new().run(spec, &token()).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn cancellation_interrupts_wait() {
        let cancel = token();
        let child_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            child_cancel.cancel();
        });
        let spec = CommandSpec::new("sleep").arg("30");
        let err = CommandRunner::new().run(spec, &cancel).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn escalation_reaps_terminating_child_within_grace() {
        // sleep dies on SIGTERM, so the escalation path returns well before
        // the grace window plus the kill fallback
        let started = std::time::Instant::now();
        let spec = CommandSpec::new("sleep")
            .arg("30")
            .deadline(Duration::from_millis(100));
        let err = CommandRunner::new().run(spec, &token()).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Timeout);
        assert!(started.elapsed() < TERMINATE_GRACE);
    }

    #[tokio::test]
    async fn stdin_is_delivered() {
        let spec = CommandSpec::new("cat").stdin(b"secret-token".to_vec());
        let output = CommandRunner::new().run(spec, &token()).await.unwrap();
        assert_eq!(output.stdout, "secret-token");
    }

    #[tokio::test]
    async fn run_combined_fails_on_nonzero() {
        let spec = CommandSpec::new("sh").args(["-c", "echo boom >&2; exit 1"]);
        let err = CommandRunner::new()
            .run_combined(spec, &token())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ExternalTool);
        assert_eq!(err.exit_code, Some(1));
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn truncation_keeps_tail() {
        let long = "a".repeat(MAX_CAPTURE + 100) + "END";
        let out = truncate_capture(long);
        assert!(out.ends_with("END"));
        assert!(out.starts_with("[truncated"));
    }
}
