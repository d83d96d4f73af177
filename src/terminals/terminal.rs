//! Buffer-backed supervised terminal with process group signaling.
//!
//! A [`Terminal`] wraps a shell process whose stdout/stderr are written to a
//! [`ChunkBuffer`] and fanned out to live subscribers. The buffer lets a
//! subscriber that attaches late catch up on everything the process already
//! printed.
//!
//! ## Process groups
//!
//! The shell is spawned via [`crate::shell::process::spawn_shell_pgroup`] so
//! it becomes a process group leader. Signals sent to `-pgid` reach the entire
//! process tree, giving us real Ctrl-C behavior.
//!
//! ## Ordering
//!
//! Buffer append and subscriber fan-out happen under one mutex, and
//! [`Terminal::subscribe`] registers under the same mutex. A subscriber
//! therefore sees each chunk exactly once: either in its history replay or as
//! a live event, never both.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use super::buffer::ChunkBuffer;

/// Event delivered to push-channel subscribers.
#[derive(Debug, Clone)]
pub enum TerminalEvent {
    /// A chunk of process output (stdout and stderr merged in arrival order).
    Output(String),
    /// The process exited, errored, or was killed. Terminal event — no
    /// further events follow.
    Exit(ExitNotice),
}

/// How a terminal's process ended.
#[derive(Debug, Clone)]
pub struct ExitNotice {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Signal name, if the process was killed (e.g. `"SIGKILL"`).
    pub signal: Option<String>,
}

/// State mutated by I/O tasks and subscribers, guarded by a single mutex so
/// that subscriber registration is atomic relative to output delivery.
struct Shared {
    buffer: ChunkBuffer,
    subscribers: Vec<mpsc::UnboundedSender<TerminalEvent>>,
    alive: bool,
    exit: Option<ExitNotice>,
}

impl Shared {
    /// Append a chunk and fan it out to all open subscribers. Subscribers
    /// whose channel has closed are dropped here.
    fn deliver(&mut self, data: String) {
        self.buffer.push(data.clone());
        self.subscribers
            .retain(|tx| tx.send(TerminalEvent::Output(data.clone())).is_ok());
    }

    /// Record process death once (idempotent against the kill/exit-watcher
    /// race), notify subscribers, and close their channels.
    fn mark_dead(&mut self, notice: ExitNotice) {
        if self.exit.is_some() {
            return;
        }
        self.alive = false;
        self.exit = Some(notice.clone());
        for tx in self.subscribers.drain(..) {
            let _ = tx.send(TerminalEvent::Exit(notice.clone()));
        }
    }
}

/// What a new subscriber receives: full replay, then live events.
pub struct Subscription {
    /// Concatenation of all buffered output at subscribe time.
    pub history: String,
    /// Set when the terminal is already dead — delivered right after history.
    pub exit: Option<ExitNotice>,
    /// Live events. Closed once the process dies.
    pub events: mpsc::UnboundedReceiver<TerminalEvent>,
}

/// A running shell terminal with buffer-backed I/O.
pub struct Terminal {
    /// OS process ID of the shell.
    pub pid: u32,
    /// Process group ID (equals pid since the shell is the group leader).
    pub pgid: u32,
    /// Directory the shell was spawned in. Informational only — the live
    /// shell manages its own cwd internally.
    pub working_dir: String,
    shared: Arc<Mutex<Shared>>,
    /// Channel to write data to the shell's stdin (raw bytes).
    stdin_tx: mpsc::Sender<Vec<u8>>,
    /// Handles to the background I/O tasks — aborted on kill.
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Terminal {
    /// Take ownership of an already-spawned `Child` and start its background
    /// tasks (stdin writer, stdout reader, stderr reader, exit watcher) that
    /// route I/O through the shared buffer.
    pub fn start(
        id: String,
        mut child: Child,
        working_dir: String,
        max_chunks: usize,
        keep_chunks: usize,
    ) -> Result<Self, String> {
        let pid = child.id().unwrap_or(0);
        // pgid = pid because the shell is the process group leader via setpgid(0,0)
        let pgid = pid;

        let stdin = child.stdin.take().ok_or("Failed to take stdin pipe")?;
        let stdout = child.stdout.take().ok_or("Failed to take stdout pipe")?;
        let stderr = child.stderr.take().ok_or("Failed to take stderr pipe")?;

        let shared = Arc::new(Mutex::new(Shared {
            buffer: ChunkBuffer::new(max_chunks, keep_chunks),
            subscribers: Vec::new(),
            alive: true,
            exit: None,
        }));

        // stdin writer task
        let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(64);
        let stdin_task = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(data) = stdin_rx.recv().await {
                if stdin.write_all(&data).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // stdout reader task — chunk-based for immediate delivery
        let id_out = id.clone();
        let shared_out = Arc::clone(&shared);
        let stdout_task = tokio::spawn(async move {
            let mut stdout = stdout;
            let mut tmp = [0u8; 4096];
            loop {
                match stdout.read(&mut tmp).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let data = String::from_utf8_lossy(&tmp[..n]).into_owned();
                        shared_out.lock().await.deliver(data);
                    }
                }
            }
            info!("Terminal {id_out} stdout closed");
        });

        // stderr reader task — chunk-based
        let id_err = id.clone();
        let shared_err = Arc::clone(&shared);
        let stderr_task = tokio::spawn(async move {
            let mut stderr = stderr;
            let mut tmp = [0u8; 4096];
            loop {
                match stderr.read(&mut tmp).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let data = String::from_utf8_lossy(&tmp[..n]).into_owned();
                        shared_err.lock().await.deliver(data);
                    }
                }
            }
            info!("Terminal {id_err} stderr closed");
        });

        // Exit watcher task
        let id_exit = id;
        let shared_exit = Arc::clone(&shared);
        let exit_task = tokio::spawn(async move {
            let notice = match child.wait().await {
                Ok(status) => {
                    info!("Terminal {id_exit} exited with code {:?}", status.code());
                    ExitNotice {
                        code: status.code(),
                        signal: None,
                    }
                }
                Err(e) => {
                    warn!("Terminal {id_exit} wait error: {e}");
                    ExitNotice {
                        code: None,
                        signal: None,
                    }
                }
            };
            shared_exit.lock().await.mark_dead(notice);
        });

        Ok(Terminal {
            pid,
            pgid,
            working_dir,
            shared,
            stdin_tx,
            tasks: vec![stdin_task, stdout_task, stderr_task, exit_task],
        })
    }

    /// Whether the process is still running.
    pub async fn is_alive(&self) -> bool {
        self.shared.lock().await.alive
    }

    /// Forward raw bytes to the shell's stdin.
    ///
    /// Reports an error instead of blocking when the stdin channel is full.
    pub async fn write_stdin(&self, data: &[u8]) -> Result<(), String> {
        if !self.is_alive().await {
            return Err("not alive".to_string());
        }
        self.stdin_tx
            .try_send(data.to_vec())
            .map_err(|_| "write failed".to_string())
    }

    /// Best-effort signal delivery: the whole process group first, the shell
    /// process alone as fallback. Neither failure is surfaced to the caller —
    /// both attempts are independently logged.
    pub fn send_signal(&self, signal: i32) {
        #[allow(clippy::cast_possible_wrap)]
        let pgid = self.pgid as i32;
        // kill(-pgid, signal) sends to all processes in the group
        let group_ret = unsafe { libc::kill(-pgid, signal) };
        if group_ret == 0 {
            return;
        }
        warn!(
            "kill(-{pgid}, {signal}) failed: {}, falling back to process",
            std::io::Error::last_os_error()
        );
        let proc_ret = unsafe { libc::kill(pgid, signal) };
        if proc_ret != 0 {
            warn!(
                "kill({pgid}, {signal}) failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    /// Force-terminate: SIGKILL the process group (process fallback), record
    /// the death, notify subscribers, and abort the background tasks.
    pub async fn kill(&self) {
        #[allow(clippy::cast_possible_wrap)]
        let pgid = self.pgid as i32;
        if pgid > 0 {
            let ret = unsafe { libc::kill(-pgid, libc::SIGKILL) };
            if ret != 0 {
                unsafe {
                    libc::kill(pgid, libc::SIGKILL);
                }
            }
        }
        self.shared.lock().await.mark_dead(ExitNotice {
            code: None,
            signal: Some("SIGKILL".to_string()),
        });
        for task in &self.tasks {
            task.abort();
        }
    }

    /// Register a new subscriber.
    ///
    /// Returns the full buffer replay, the exit notice if the terminal is
    /// already dead, and a channel for subsequent live events. Registration
    /// happens under the buffer mutex, so the replay/live boundary is exact.
    pub async fn subscribe(&self) -> Subscription {
        let mut shared = self.shared.lock().await;
        let history = shared.buffer.snapshot();
        let exit = shared.exit.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        if shared.alive {
            shared.subscribers.push(tx);
        }
        Subscription {
            history,
            exit,
            events: rx,
        }
    }
}

/// Map a signal name to its number. Unknown names fall back to SIGINT, the
/// documented default.
pub fn parse_signal(name: &str) -> i32 {
    match name {
        "SIGTERM" => libc::SIGTERM,
        "SIGKILL" => libc::SIGKILL,
        "SIGHUP" => libc::SIGHUP,
        "SIGQUIT" => libc::SIGQUIT,
        "SIGUSR1" => libc::SIGUSR1,
        "SIGUSR2" => libc::SIGUSR2,
        "SIGTSTP" => libc::SIGTSTP,
        "SIGCONT" => libc::SIGCONT,
        "SIGWINCH" => libc::SIGWINCH,
        _ => libc::SIGINT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_names() {
        assert_eq!(parse_signal("SIGTERM"), libc::SIGTERM);
        assert_eq!(parse_signal("SIGKILL"), libc::SIGKILL);
        assert_eq!(parse_signal("SIGINT"), libc::SIGINT);
        assert_eq!(parse_signal("bogus"), libc::SIGINT);
    }
}
