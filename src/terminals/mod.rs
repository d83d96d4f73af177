//! Terminal lifecycle management.
//!
//! [`TerminalTable`] is the single authority for creating, looking up, and
//! destroying supervised terminals. Identifiers come from a process-wide
//! monotonic counter and are never reused.
//!
//! A terminal whose process has exited stays in the table so late subscribers
//! can still replay its buffer and see the exit notice — it is only removed
//! by an explicit kill (or process teardown via [`TerminalTable::kill_all`]).
//!
//! ## Concurrency
//!
//! The terminal map is behind an `RwLock`. Read operations (write to stdin,
//! signal, subscribe) take a read lock; mutations (create, kill) take a write
//! lock. `create` holds the write lock across the limit-check and insert to
//! prevent TOCTOU races.

pub mod buffer;
pub mod terminal;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::shell::process::spawn_shell_pgroup;
use terminal::{Subscription, Terminal};

/// Manages the pool of supervised shell terminals.
///
/// Cloneable — all clones share the same inner map and id counter.
#[derive(Clone)]
pub struct TerminalTable {
    terminals: Arc<RwLock<HashMap<String, Arc<Terminal>>>>,
    next_id: Arc<AtomicU64>,
    max_terminals: usize,
    buffer_max: usize,
    buffer_keep: usize,
}

/// Summary of a terminal returned by [`TerminalTable::list`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct TerminalListItem {
    pub id: String,
    pub alive: bool,
    pub cwd: String,
}

impl TerminalTable {
    pub fn new(max_terminals: usize, buffer_max: usize, buffer_keep: usize) -> Self {
        Self {
            terminals: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            max_terminals,
            buffer_max,
            buffer_keep,
        }
    }

    /// Spawn a shell and register it. Returns the new terminal's id.
    ///
    /// Fails only if process creation itself fails or the terminal limit is
    /// reached — no terminal is registered on failure.
    pub async fn create(&self, shell: &str, working_dir: &str) -> Result<String, String> {
        let mut terminals = self.terminals.write().await;

        if terminals.len() >= self.max_terminals {
            return Err(format!(
                "Terminal limit reached (max {})",
                self.max_terminals
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();

        let child = spawn_shell_pgroup(shell, working_dir)
            .map_err(|e| format!("Failed to spawn shell: {e}"))?;
        let term = Terminal::start(
            id.clone(),
            child,
            working_dir.to_string(),
            self.buffer_max,
            self.buffer_keep,
        )?;

        info!(
            "Terminal {id} created (pid {}, cwd {working_dir}), total: {}",
            term.pid,
            terminals.len() + 1
        );
        terminals.insert(id.clone(), Arc::new(term));
        Ok(id)
    }

    /// Forward raw input bytes to a terminal's stdin.
    pub async fn write(&self, id: &str, data: &[u8]) -> Result<(), String> {
        let term = self.get(id).await.ok_or("not found")?;
        term.write_stdin(data).await
    }

    /// Best-effort signal delivery to a terminal's process group.
    ///
    /// Errors only for unknown or dead terminals — delivery failures inside a
    /// live terminal are swallowed (logged) per the best-effort contract.
    pub async fn signal(&self, id: &str, signal: i32) -> Result<(), String> {
        let term = self.get(id).await.ok_or("not found")?;
        if !term.is_alive().await {
            return Err("not alive".to_string());
        }
        term.send_signal(signal);
        Ok(())
    }

    /// Force-terminate a terminal and remove it from the table.
    ///
    /// Idempotent: killing an unknown id is a no-op.
    pub async fn kill(&self, id: &str) {
        let removed = self.terminals.write().await.remove(id);
        if let Some(term) = removed {
            term.kill().await;
            info!("Terminal {id} killed");
        }
    }

    /// Register a push-channel subscriber. `None` if the id is unknown.
    pub async fn subscribe(&self, id: &str) -> Option<Subscription> {
        let term = self.get(id).await?;
        Some(term.subscribe().await)
    }

    /// Snapshot of all registered terminals, ordered by id.
    pub async fn list(&self) -> Vec<TerminalListItem> {
        let terminals = self.terminals.read().await;
        let mut items = Vec::with_capacity(terminals.len());
        for (id, term) in terminals.iter() {
            items.push(TerminalListItem {
                id: id.clone(),
                alive: term.is_alive().await,
                cwd: term.working_dir.clone(),
            });
        }
        items.sort_by_key(|item| item.id.parse::<u64>().unwrap_or(u64::MAX));
        items
    }

    /// Kill all terminals (used during shutdown).
    pub async fn kill_all(&self) {
        let drained: Vec<(String, Arc<Terminal>)> =
            self.terminals.write().await.drain().collect();
        let count = drained.len();
        for (id, term) in drained {
            term.kill().await;
            info!("Terminal {id} killed (shutdown)");
        }
        if count > 0 {
            info!("Shut down {count} terminal(s)");
        }
    }

    async fn get(&self, id: &str) -> Option<Arc<Terminal>> {
        self.terminals.read().await.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::terminal::TerminalEvent;
    use super::*;
    use tokio::time::{sleep, timeout, Duration};

    fn table() -> TerminalTable {
        TerminalTable::new(8, 5000, 3000)
    }

    /// Poll the terminal's buffer until its replay contains `needle`.
    async fn wait_for_output(table: &TerminalTable, id: &str, needle: &str) -> String {
        for _ in 0..100 {
            let sub = table.subscribe(id).await.expect("terminal gone");
            if sub.history.contains(needle) {
                return sub.history;
            }
            sleep(Duration::from_millis(50)).await;
        }
        panic!("output never contained {needle:?}");
    }

    /// Drain live events from a subscription until the collected output
    /// contains `needle`.
    async fn collect_until(
        events: &mut tokio::sync::mpsc::UnboundedReceiver<TerminalEvent>,
        needle: &str,
    ) -> String {
        let mut out = String::new();
        timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Some(TerminalEvent::Output(data)) => {
                        out.push_str(&data);
                        if out.contains(needle) {
                            break;
                        }
                    }
                    Some(TerminalEvent::Exit(_)) | None => break,
                }
            }
        })
        .await
        .expect("timed out waiting for output");
        out
    }

    #[tokio::test]
    async fn spawn_appears_in_list_alive() {
        let table = table();
        let id = table.create("/bin/sh", "/").await.unwrap();
        let items = table.list().await;
        let item = items.iter().find(|i| i.id == id).expect("missing");
        assert!(item.alive);
        assert_eq!(item.cwd, "/");
        table.kill(&id).await;
    }

    #[tokio::test]
    async fn ids_are_unique_and_increasing() {
        let table = table();
        let a = table.create("/bin/sh", "/").await.unwrap();
        let b = table.create("/bin/sh", "/").await.unwrap();
        assert!(a.parse::<u64>().unwrap() < b.parse::<u64>().unwrap());
        table.kill_all().await;
    }

    #[tokio::test]
    async fn history_replays_earlier_output() {
        let table = table();
        let id = table.create("/bin/sh", "/").await.unwrap();
        table.write(&id, b"echo marker-one\n").await.unwrap();
        let history = wait_for_output(&table, &id, "marker-one").await;
        // A fresh subscriber must not receive the replayed chunk again live.
        let mut sub = table.subscribe(&id).await.unwrap();
        assert!(sub.history.contains("marker-one"));
        assert_eq!(sub.history, history);
        table.write(&id, b"echo marker-two\n").await.unwrap();
        let live = collect_until(&mut sub.events, "marker-two").await;
        assert!(!live.contains("marker-one"));
        table.kill(&id).await;
    }

    #[tokio::test]
    async fn two_subscribers_see_same_output_order() {
        let table = table();
        let id = table.create("/bin/sh", "/").await.unwrap();
        let mut sub_a = table.subscribe(&id).await.unwrap();
        let mut sub_b = table.subscribe(&id).await.unwrap();

        table.write(&id, b"echo first; echo second\n").await.unwrap();

        let out_a = collect_until(&mut sub_a.events, "second").await;
        let out_b = collect_until(&mut sub_b.events, "second").await;
        for out in [&out_a, &out_b] {
            let first = out.find("first").expect("first missing");
            let second = out.find("second").expect("second missing");
            assert!(first < second);
        }
        table.kill(&id).await;
    }

    #[tokio::test]
    async fn kill_removes_and_rejects_further_operations() {
        let table = table();
        let id = table.create("/bin/sh", "/").await.unwrap();
        table.kill(&id).await;

        assert!(table.list().await.iter().all(|i| i.id != id));
        let err = table.write(&id, b"echo nope\n").await.unwrap_err();
        assert_eq!(err, "not found");
        let err = table.signal(&id, libc::SIGINT).await.unwrap_err();
        assert_eq!(err, "not found");

        // Second kill is an idempotent no-op.
        table.kill(&id).await;
    }

    #[tokio::test]
    async fn exited_terminal_stays_listed_until_killed() {
        let table = table();
        let id = table.create("/bin/sh", "/").await.unwrap();
        table.write(&id, b"exit 0\n").await.unwrap();

        // Wait for the exit watcher to observe process death.
        for _ in 0..100 {
            let items = table.list().await;
            let item = items.iter().find(|i| i.id == id).expect("removed too early");
            if !item.alive {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }

        let sub = table.subscribe(&id).await.unwrap();
        assert!(sub.exit.is_some());
        assert_eq!(sub.exit.unwrap().code, Some(0));

        let err = table.write(&id, b"echo nope\n").await.unwrap_err();
        assert_eq!(err, "not alive");
        let err = table.signal(&id, libc::SIGINT).await.unwrap_err();
        assert_eq!(err, "not alive");

        table.kill(&id).await;
        assert!(table.list().await.is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_registers_nothing() {
        let table = table();
        let res = table.create("/nonexistent/shell", "/").await;
        assert!(res.is_err());
        assert!(table.list().await.is_empty());
    }
}
