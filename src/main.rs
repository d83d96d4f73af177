#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # termd
//!
//! Remote terminal service.
//!
//! termd exposes an HTTP API for supervising interactive shell terminals —
//! spawn, keystroke input, signal delivery, kill — with live output streamed
//! over Server-Sent Events, plus a stateless one-shot exec path that fakes
//! shell working-directory continuity across calls.
//!
//! ## API surface
//!
//! | Method | Path                      | Description                         |
//! |--------|---------------------------|-------------------------------------|
//! | GET    | `/health`                 | Liveness probe                      |
//! | POST   | `/terminal/spawn`         | Launch a supervised shell           |
//! | GET    | `/terminal/list`          | List registered terminals           |
//! | POST   | `/terminal/input`         | Write to a terminal's stdin         |
//! | POST   | `/terminal/signal`        | Signal the process group            |
//! | POST   | `/terminal/kill`          | Force-terminate (idempotent)        |
//! | GET    | `/terminal/stream?id=`    | SSE: history, output, exit events   |
//! | POST   | `/terminal/exec`          | One-shot exec with cwd continuity   |
//! | POST   | `/terminal/reset-session` | Drop an exec session                |
//!
//! ## Architecture
//!
//! ```text
//! main.rs           — entry point, clap, router setup, graceful shutdown
//! config.rs         — TOML + env-var configuration
//! state.rs          — AppState shared across handlers
//! shell/
//!   process.rs      — spawn_shell_pgroup(), run_command() with timeout + cap
//! terminals/
//!   buffer.rs       — ChunkBuffer (bounded, burst-drop truncation)
//!   terminal.rs     — Terminal (I/O tasks, subscribers, signals)
//!   mod.rs          — TerminalTable (create/lookup/kill, id allocation)
//! exec/
//!   mod.rs          — ExecEngine (cd interception, per-token cwd state)
//! routes/
//!   health.rs       — GET /health
//!   terminal.rs     — /terminal/* handlers incl. SSE stream
//! ```

mod config;
mod exec;
mod routes;
mod shell;
mod state;
mod terminals;
mod util;

use axum::{
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use config::Config;
use state::AppState;

/// Remote terminal service.
#[derive(Parser)]
#[command(name = "termd", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_path = match cli.command {
        Some(Commands::Serve { config }) => config,
        None => None,
    };
    run_server(config_path.as_deref()).await;
}

async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("termd v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);
    info!(
        "Shell: {} (home {})",
        config.shell.default_shell, config.shell.home_dir
    );

    let state = AppState::new(config);

    let app = Router::new()
        .route("/health", get(routes::health::health))
        .route("/terminal/spawn", post(routes::terminal::spawn))
        .route("/terminal/list", get(routes::terminal::list))
        .route("/terminal/input", post(routes::terminal::input))
        .route("/terminal/signal", post(routes::terminal::signal))
        .route("/terminal/kill", post(routes::terminal::kill))
        .route("/terminal/stream", get(routes::terminal::stream))
        .route("/terminal/exec", post(routes::terminal::exec))
        .route("/terminal/reset-session", post(routes::terminal::reset_session))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Server ready");

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    // Cleanup: take down every live terminal before exiting.
    info!("Shutting down...");
    state.terminals.kill_all().await;
    info!("Goodbye");
}
