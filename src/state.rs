//! Shared application state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::exec::ExecEngine;
use crate::terminals::TerminalTable;

/// Shared application state for the termd server.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
    /// Registry of supervised shell terminals.
    pub terminals: TerminalTable,
    /// Stateless exec engine with per-token cwd continuity.
    pub exec: ExecEngine,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let terminals = TerminalTable::new(
            config.server.max_terminals,
            config.server.buffer_max_chunks,
            config.server.buffer_keep_chunks,
        );
        let exec = ExecEngine::new(
            &config.shell.default_shell,
            &config.shell.home_dir,
            config.server.exec_timeout_ms,
            config.server.max_exec_output,
        );
        Self {
            config: Arc::new(config),
            start_time: Instant::now(),
            terminals,
            exec,
        }
    }
}
