//! Process spawning and one-shot command execution.

pub mod process;
