//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `TERMD_LISTEN`, `TERMD_HOME`
//! 2. **Config file** — path via `--config <path>`, or `termd.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:7070"
//! max_terminals = 32
//! exec_timeout_ms = 60000
//! max_exec_output = 1048576    # 1 MB per stream
//! buffer_max_chunks = 5000
//! buffer_keep_chunks = 3000
//!
//! [shell]
//! default_shell = "/bin/sh"
//! home_dir = "/home/admin"
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server and resource-limit settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:7070`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent supervised terminals (default 32).
    #[serde(default = "default_max_terminals")]
    pub max_terminals: usize,
    /// Default timeout for `POST /terminal/exec` in milliseconds (default 60 000).
    #[serde(default = "default_exec_timeout_ms")]
    pub exec_timeout_ms: u64,
    /// Maximum captured bytes per output stream for exec (default 1 MB).
    #[serde(default = "default_max_exec_output")]
    pub max_exec_output: usize,
    /// Buffer high-water mark: pushing past this triggers truncation (default 5000).
    #[serde(default = "default_buffer_max_chunks")]
    pub buffer_max_chunks: usize,
    /// Chunks retained after truncation (default 3000).
    #[serde(default = "default_buffer_keep_chunks")]
    pub buffer_keep_chunks: usize,
}

/// Shell defaults used when requests don't specify overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    /// Shell binary for terminals and exec (default `/bin/sh`).
    #[serde(default = "default_shell")]
    pub default_shell: String,
    /// Home directory: spawn default and exec-session starting cwd
    /// (default `$HOME`, falling back to `/`).
    #[serde(default = "default_home_dir")]
    pub home_dir: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:7070".to_string()
}
fn default_max_terminals() -> usize {
    32
}
fn default_exec_timeout_ms() -> u64 {
    60_000
}
fn default_max_exec_output() -> usize {
    1024 * 1024 // 1 MB
}
fn default_buffer_max_chunks() -> usize {
    5000
}
fn default_buffer_keep_chunks() -> usize {
    3000
}
fn default_shell() -> String {
    "/bin/sh".to_string()
}
fn default_home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| "/".to_string())
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_terminals: default_max_terminals(),
            exec_timeout_ms: default_exec_timeout_ms(),
            max_exec_output: default_max_exec_output(),
            buffer_max_chunks: default_buffer_max_chunks(),
            buffer_keep_chunks: default_buffer_keep_chunks(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            default_shell: default_shell(),
            home_dir: default_home_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            shell: ShellConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `termd.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config: Config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("termd.toml").exists() {
            let content =
                std::fs::read_to_string("termd.toml").expect("Failed to read termd.toml");
            toml::from_str(&content).expect("Failed to parse termd.toml")
        } else {
            Config::default()
        };

        // Env var overrides
        if let Ok(listen) = std::env::var("TERMD_LISTEN") {
            config.server.listen = listen;
        }
        if let Ok(home) = std::env::var("TERMD_HOME") {
            config.shell.home_dir = home;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.buffer_max_chunks, 5000);
        assert_eq!(config.server.buffer_keep_chunks, 3000);
        assert_eq!(config.server.exec_timeout_ms, 60_000);
        assert_eq!(config.shell.default_shell, "/bin/sh");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.max_terminals, 32);
        assert_eq!(config.logging.level, "info");
    }
}
