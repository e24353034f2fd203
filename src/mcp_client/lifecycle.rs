//! Service process lifecycle management.
//!
//! Spawns stdio MCP services as child processes, keeps a rolling tail of
//! their stderr for diagnostics, and shuts them down (close stdin, wait,
//! then kill).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use super::errors::McpError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for graceful exit after stdin is closed, before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Cap on the stderr excerpt appended to error messages.
const STDERR_EXCERPT_BYTES: usize = 2000;

// ─── Stderr Capture ──────────────────────────────────────────────────────────

/// Rolling tail of a child's stderr, filled by a background drain task.
#[derive(Debug, Clone, Default)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == STDERR_TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    /// The captured lines joined by newlines, truncated for log readability.
    pub fn snapshot(&self) -> String {
        let mut text = match self.lines.lock() {
            Ok(lines) => lines.iter().cloned().collect::<Vec<_>>().join("\n"),
            Err(_) => String::new(),
        };
        if text.len() > STDERR_EXCERPT_BYTES {
            let mut cut = STDERR_EXCERPT_BYTES;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("...(truncated)");
        }
        text
    }
}

/// Forward each stderr line to `debug` logs and into `tail`.
fn drain_stderr(service: String, stderr: ChildStderr, tail: StderrTail) {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %service, "stderr: {line}");
            tail.push(line);
        }
    });
}

/// Format a stderr suffix for error messages (empty string if no stderr).
pub fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.trim().is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── ManagedProcess ──────────────────────────────────────────────────────────

/// A running service process. The pipes are handed to the transport; this
/// handle only owns the process itself.
#[derive(Debug)]
pub struct ManagedProcess {
    service: String,
    child: tokio::sync::Mutex<Option<Child>>,
    stderr: StderrTail,
}

/// Output of [`spawn_process`]: the process handle plus its stdio pipes.
pub struct SpawnedProcess {
    pub process: ManagedProcess,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

impl ManagedProcess {
    /// Rolling stderr excerpt for diagnostics.
    pub fn stderr_excerpt(&self) -> String {
        self.stderr.snapshot()
    }

    /// Wait for the process to exit (stdin must already be closed), killing
    /// it after [`SHUTDOWN_TIMEOUT`]. Idempotent.
    pub async fn shutdown(&self) -> Result<(), McpError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.service, %status, "service process exited");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                Err(McpError::Transport {
                    service: self.service.clone(),
                    reason: format!("failed to wait for process exit: {e}"),
                })
            }
            Err(_) => {
                tracing::warn!(
                    server = %self.service,
                    timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                    "service did not exit in time, killing"
                );
                child.kill().await.map_err(|e| McpError::Transport {
                    service: self.service.clone(),
                    reason: format!("failed to kill process: {e}"),
                })
            }
        }
    }
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Spawn a stdio service process with `env` overlaid on the inherited
/// environment. The process is killed if its handle is dropped.
pub fn spawn_process(
    service: &str,
    command: &str,
    args: &[String],
    env: &HashMap<String, String>,
    cwd: Option<&str>,
) -> Result<SpawnedProcess, McpError> {
    let mut cmd = Command::new(command);
    cmd.args(args);
    cmd.envs(env);

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::Connection {
        service: service.to_string(),
        reason: format!("failed to spawn '{command}': {e}"),
    })?;

    let stdin = child.stdin.take().ok_or_else(|| McpError::Connection {
        service: service.to_string(),
        reason: "failed to capture stdin".into(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| McpError::Connection {
        service: service.to_string(),
        reason: "failed to capture stdout".into(),
    })?;

    let tail = StderrTail::default();
    if let Some(stderr) = child.stderr.take() {
        drain_stderr(service.to_string(), stderr, tail.clone());
    }

    tracing::debug!(server = %service, command, pid = ?child.id(), "spawned service process");

    Ok(SpawnedProcess {
        process: ManagedProcess {
            service: service.to_string(),
            child: tokio::sync::Mutex::new(Some(child)),
            stderr: tail,
        },
        stdin,
        stdout,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
