//! Low-level process spawning and output capture.
//!
//! All shell interaction ultimately goes through the two functions here:
//! [`spawn_shell_pgroup`] for supervised terminals and [`run_command`] for
//! one-shot commands. Both set `kill_on_drop(true)` so orphaned processes are
//! cleaned up if the owning task is cancelled.

use std::fmt::Write;
use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;

/// Spawn an interactive shell in its own process group with piped I/O.
///
/// Calls `setpgid(0, 0)` via `pre_exec` so the shell becomes a process group
/// leader. This allows sending signals (e.g. SIGINT) to the entire process
/// tree via `kill(-pgid, signal)`.
pub fn spawn_shell_pgroup(shell: &str, working_dir: &str) -> std::io::Result<Child> {
    let mut cmd = Command::new(shell);
    cmd.current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // SAFETY: setpgid is async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }
    cmd.spawn()
}

/// Execute a one-shot command via `<shell> -c "<command>"` and capture output.
///
/// Stdout and stderr are read concurrently (to avoid pipe deadlock) and each
/// capped at `max_output` bytes. The deadline is enforced inside the read
/// loops, so on timeout the output captured so far is still returned with
/// `timed_out: true` and the child is killed.
pub async fn run_command(
    shell: &str,
    working_dir: &Path,
    command: &str,
    timeout_ms: u64,
    max_output: usize,
) -> Result<CommandOutput, SpawnError> {
    let start = Instant::now();
    let deadline = start + tokio::time::Duration::from_millis(timeout_ms);

    let mut child = Command::new(shell)
        .arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SpawnError(e.to_string()))?;

    let mut stdout = child.stdout.take().ok_or_else(|| {
        SpawnError("Failed to take stdout pipe".to_string())
    })?;
    let mut stderr = child.stderr.take().ok_or_else(|| {
        SpawnError("Failed to take stderr pipe".to_string())
    })?;

    // Read stdout and stderr concurrently to avoid pipe deadlock
    let (out, err) = tokio::join!(
        read_capped_until(&mut stdout, max_output, deadline),
        read_capped_until(&mut stderr, max_output, deadline),
    );
    let timed_out = out.1 || err.1;

    // Drop pipe handles so the child sees EOF
    drop(stdout);
    drop(stderr);

    let exit_code = if timed_out {
        let _ = child.start_kill();
        let _ = child.wait().await;
        None
    } else {
        match child.wait().await {
            Ok(status) => status.code(),
            Err(_) => None,
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    Ok(CommandOutput {
        exit_code,
        stdout: out.0,
        stderr: err.0,
        timed_out,
        duration_ms,
    })
}

/// Read from an async reader until EOF or `deadline`, keeping the first
/// `max_bytes` and discarding the rest.
///
/// Continues reading past the cap instead of closing the pipe early — closing
/// a pipe while the child is still writing causes SIGPIPE / broken pipe errors
/// and potential deadlocks when the child is also writing to the other stream.
///
/// Returns `(data, timed_out)`.
async fn read_capped_until(
    reader: &mut (impl tokio::io::AsyncRead + Unpin),
    max_bytes: usize,
    deadline: Instant,
) -> (String, bool) {
    let mut buf = Vec::with_capacity(max_bytes.min(65536));
    let mut tmp = [0u8; 8192];
    let mut total_read = 0usize;
    let mut timed_out = false;
    loop {
        match tokio::time::timeout_at(deadline, reader.read(&mut tmp)).await {
            Err(_) => {
                timed_out = true;
                break;
            }
            Ok(Ok(0)) | Ok(Err(_)) => break,
            Ok(Ok(n)) => {
                total_read += n;
                if buf.len() < max_bytes {
                    let take = n.min(max_bytes - buf.len());
                    buf.extend_from_slice(&tmp[..take]);
                }
            }
        }
    }
    let mut s = String::from_utf8_lossy(&buf).into_owned();
    if total_read > max_bytes {
        let _ = write!(
            s,
            "\n[truncated: {total_read} bytes total, showing first {max_bytes}]"
        );
    }
    (s, timed_out)
}

/// Result of [`run_command`].
#[derive(Debug)]
pub struct CommandOutput {
    /// Process exit code; `None` if unavailable (killed by signal or timeout).
    pub exit_code: Option<i32>,
    /// Captured stdout (capped, lossy UTF-8 conversion).
    pub stdout: String,
    /// Captured stderr (capped, lossy UTF-8 conversion).
    pub stderr: String,
    /// Whether the deadline elapsed before the command finished.
    pub timed_out: bool,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// The shell binary could not be started (e.g. not found, permission denied).
#[derive(Debug)]
pub struct SpawnError(pub String);

impl std::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to spawn process: {}", self.0)
    }
}

impl std::error::Error for SpawnError {}
