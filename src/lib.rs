#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]

//! termd library — exposes core modules for embedding and testing.
//!
//! - `config` — configuration loading
//! - `terminals` — supervised shell terminal management
//! - `exec` — stateless command execution with working-directory continuity
//! - `shell` — process spawning primitives
//! - `routes` — HTTP route handlers
//! - `state` — shared application state

pub mod config;
pub mod exec;
pub mod routes;
pub mod shell;
pub mod state;
pub mod terminals;
pub mod util;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use exec::ExecEngine;
pub use state::AppState;
pub use terminals::TerminalTable;
