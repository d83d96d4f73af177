//! Remote terminal endpoints.
//!
//! - `POST /terminal/spawn` — launch a supervised shell
//! - `GET  /terminal/list` — snapshot of registered terminals
//! - `POST /terminal/input` — forward keystrokes to a terminal's stdin
//! - `POST /terminal/signal` — best-effort signal delivery (default SIGINT)
//! - `POST /terminal/kill` — force-terminate and unregister (idempotent)
//! - `GET  /terminal/stream?id=` — SSE push channel: history replay, then live
//!   output, then the exit notice
//! - `POST /terminal/exec` — one-shot execution with cwd continuity
//! - `POST /terminal/reset-session` — drop an exec session's cwd state
//!
//! Every operation produces a well-formed JSON response even on failure
//! (`{"error": ...}`); the only non-200 statuses are a 404 for streaming an
//! unknown id and malformed request bodies rejected by the JSON extractor.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::exec::DEFAULT_TOKEN;
use crate::state::AppState;
use crate::terminals::terminal::{parse_signal, ExitNotice, TerminalEvent};
use crate::util::expand_tilde;

/// Request body for `POST /terminal/spawn`.
#[derive(Deserialize)]
pub struct SpawnRequest {
    /// Directory to launch the shell in. Defaults to the configured home.
    pub cwd: Option<String>,
}

/// `POST /terminal/spawn` — launch a new supervised shell.
pub async fn spawn(State(state): State<AppState>, Json(payload): Json<SpawnRequest>) -> Json<Value> {
    let raw_dir = payload
        .cwd
        .as_deref()
        .unwrap_or(&state.config.shell.home_dir);
    let working_dir = expand_tilde(raw_dir);

    match state
        .terminals
        .create(&state.config.shell.default_shell, working_dir.as_ref())
        .await
    {
        Ok(id) => Json(json!({"id": id, "alive": true})),
        Err(e) => Json(json!({"error": e})),
    }
}

/// `GET /terminal/list` — all registered terminals, dead ones included.
pub async fn list(State(state): State<AppState>) -> Json<Value> {
    let terminals = state.terminals.list().await;
    Json(json!({ "terminals": terminals }))
}

/// Request body for `POST /terminal/input`.
#[derive(Deserialize)]
pub struct InputRequest {
    pub id: String,
    /// Raw keystrokes, forwarded verbatim (no line ending appended).
    pub data: String,
}

/// `POST /terminal/input` — write to a terminal's stdin.
pub async fn input(State(state): State<AppState>, Json(payload): Json<InputRequest>) -> Json<Value> {
    match state
        .terminals
        .write(&payload.id, payload.data.as_bytes())
        .await
    {
        Ok(()) => Json(json!({"ok": true})),
        Err(e) => Json(json!({"error": e})),
    }
}

/// Request body for `POST /terminal/signal`.
#[derive(Deserialize)]
pub struct SignalRequest {
    pub id: String,
    /// Signal name, e.g. `"SIGTERM"`. Defaults to `SIGINT`.
    pub signal: Option<String>,
}

/// `POST /terminal/signal` — best-effort delivery to the process group, with
/// the shell process alone as fallback. Delivery failures inside a live
/// terminal still answer `ok`.
pub async fn signal(
    State(state): State<AppState>,
    Json(payload): Json<SignalRequest>,
) -> Json<Value> {
    let name = payload.signal.as_deref().unwrap_or("SIGINT");
    match state.terminals.signal(&payload.id, parse_signal(name)).await {
        Ok(()) => Json(json!({"ok": true, "signal": name})),
        Err(e) => Json(json!({"error": e})),
    }
}

/// Request body for `POST /terminal/kill`.
#[derive(Deserialize)]
pub struct KillRequest {
    pub id: String,
}

/// `POST /terminal/kill` — force-terminate and unregister. Idempotent: an
/// unknown id still answers `ok`.
pub async fn kill(State(state): State<AppState>, Json(payload): Json<KillRequest>) -> Json<Value> {
    state.terminals.kill(&payload.id).await;
    Json(json!({"ok": true}))
}

/// Query parameters for `GET /terminal/stream`.
#[derive(Deserialize)]
pub struct StreamParams {
    pub id: String,
}

/// `GET /terminal/stream?id=` — SSE push channel.
///
/// The first event is a `history` replay of the full buffer, followed
/// immediately by `exit` if the terminal is already dead, then live `output`
/// events and the terminal `exit`. A periodic keep-alive comment holds idle
/// connections open; the stream closes once the process has died and the
/// exit event is delivered.
pub async fn stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let sub = state.terminals.subscribe(&params.id).await.ok_or((
        StatusCode::NOT_FOUND,
        Json(json!({"error": "not found"})),
    ))?;

    let mut initial: Vec<Result<Event, Infallible>> = Vec::with_capacity(2);
    initial.push(Ok(history_event(&sub.history)));
    if let Some(ref exit) = sub.exit {
        initial.push(Ok(exit_event(exit)));
    }

    let live = futures::stream::unfold(sub.events, |mut rx| async move {
        rx.recv()
            .await
            .map(|ev| (Ok::<_, Infallible>(live_event(&ev)), rx))
    });

    let stream = futures::stream::iter(initial).chain(live);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default().interval(Duration::from_secs(15))))
}

fn history_event(history: &str) -> Event {
    let payload = json!({"type": "history", "data": history});
    Event::default().event("history").data(payload.to_string())
}

fn exit_event(notice: &ExitNotice) -> Event {
    let payload = json!({
        "type": "exit",
        "code": notice.code,
        "signal": notice.signal,
    });
    Event::default().event("exit").data(payload.to_string())
}

fn live_event(event: &TerminalEvent) -> Event {
    match event {
        TerminalEvent::Output(data) => {
            let payload = json!({"type": "output", "data": data});
            Event::default().event("output").data(payload.to_string())
        }
        TerminalEvent::Exit(notice) => exit_event(notice),
    }
}

/// Request body for `POST /terminal/exec`.
#[derive(Deserialize)]
pub struct ExecRequest {
    /// Shell command string (passed to `<shell> -c`).
    pub command: String,
    /// Exec-session token for cwd continuity. Defaults to `"default"`.
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    /// Adopt this directory for the session before execution.
    pub cwd: Option<String>,
}

/// `POST /terminal/exec` — one-shot execution with simulated shell
/// continuity. Failures are reported in-band via `output` and `code`.
pub async fn exec(State(state): State<AppState>, Json(payload): Json<ExecRequest>) -> Json<Value> {
    let token = payload.session_id.as_deref().unwrap_or(DEFAULT_TOKEN);
    let outcome = state
        .exec
        .exec(token, &payload.command, payload.cwd.as_deref())
        .await;
    Json(json!(outcome))
}

/// Request body for `POST /terminal/reset-session`.
#[derive(Deserialize)]
pub struct ResetRequest {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// `POST /terminal/reset-session` — drop an exec session. Idempotent.
pub async fn reset_session(
    State(state): State<AppState>,
    Json(payload): Json<ResetRequest>,
) -> Json<Value> {
    let token = payload.session_id.as_deref().unwrap_or(DEFAULT_TOKEN);
    state.exec.reset(token).await;
    Json(json!({"ok": true}))
}
