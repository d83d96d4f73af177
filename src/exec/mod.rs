//! Stateless command execution with simulated working-directory continuity.
//!
//! Each call runs an independent `<shell> -c` process, so a plain re-exec of
//! `cd X && Y` would change directory only for that child and be lost
//! afterwards. [`ExecEngine`] therefore intercepts `cd` itself and persists
//! the resolved directory in its own per-token state, faking shell continuity
//! across calls.
//!
//! Only the working directory persists. Shell builtins that mutate other
//! process-local state (environment variables, aliases, functions) do not
//! carry over between calls — a deliberate limitation of the stateless model.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::shell::process::{run_command, CommandOutput};
use crate::util::{expand_tilde, sh_quote};

/// Token used when the caller omits one.
pub const DEFAULT_TOKEN: &str = "default";

/// Exit code reported for a timed-out command (`timeout(1)` convention).
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Per-token state: the only thing that persists between calls.
struct ExecSession {
    cwd: PathBuf,
    prev_cwd: Option<PathBuf>,
}

/// Result of one exec call. Always well-formed — failures are reported
/// through `output` and `code`, never as an error value.
#[derive(Debug, serde::Serialize)]
pub struct ExecOutcome {
    /// Concatenated stdout + stderr (or a failure message if neither
    /// captured anything on failure).
    pub output: String,
    /// Exit code: 0 on success, the command's code on failure (1 when
    /// unavailable, 124 on timeout).
    pub code: i32,
    /// The session's working directory after this call.
    pub cwd: String,
}

/// One-shot command executor with per-token cwd continuity.
///
/// Cloneable — all clones share the same session map.
#[derive(Clone)]
pub struct ExecEngine {
    sessions: Arc<Mutex<HashMap<String, ExecSession>>>,
    shell: String,
    home_dir: PathBuf,
    timeout_ms: u64,
    max_output: usize,
}

impl ExecEngine {
    pub fn new(shell: &str, home_dir: &str, timeout_ms: u64, max_output: usize) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            shell: shell.to_string(),
            home_dir: PathBuf::from(home_dir),
            timeout_ms,
            max_output,
        }
    }

    /// Execute `command` for the session named by `token`.
    ///
    /// 1. Resolve (or lazily create) the session.
    /// 2. Adopt `cwd_override` if it names an existing directory.
    /// 3. Fall back to home if the session's cwd has since disappeared.
    /// 4. Short-circuit empty commands.
    /// 5. Intercept `cd` (bare or `cd T &&`/`cd T;` prefix) and persist it.
    /// 6. Run the remainder inside the resolved directory with a bounded
    ///    timeout and bounded captured output.
    pub async fn exec(&self, token: &str, command: &str, cwd_override: Option<&str>) -> ExecOutcome {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(token.to_string())
            .or_insert_with(|| ExecSession {
                cwd: self.home_dir.clone(),
                prev_cwd: None,
            });

        if let Some(over) = cwd_override {
            let expanded = expand_tilde(over);
            let candidate = Path::new(expanded.as_ref());
            if candidate.is_dir() {
                session.cwd = candidate.to_path_buf();
            }
        }

        // The directory may have been deleted since the last call.
        if !session.cwd.is_dir() {
            debug!(
                "exec session {token}: cwd {} vanished, resetting to home",
                session.cwd.display()
            );
            session.cwd = self.home_dir.clone();
        }

        let trimmed = command.trim();
        if trimmed.is_empty() {
            return ExecOutcome {
                output: String::new(),
                code: 0,
                cwd: session.cwd.to_string_lossy().into_owned(),
            };
        }

        let effective = match parse_cd(trimmed) {
            CdIntent::Pure(target) => {
                // Pure cd never spawns a process.
                return match self.apply_cd(session, target) {
                    Ok(()) => ExecOutcome {
                        output: String::new(),
                        code: 0,
                        cwd: session.cwd.to_string_lossy().into_owned(),
                    },
                    Err(msg) => ExecOutcome {
                        output: msg,
                        code: 1,
                        cwd: session.cwd.to_string_lossy().into_owned(),
                    },
                };
            }
            CdIntent::Prefix { target, rest } => {
                // Best-effort: an unresolvable prefix leaves cwd unchanged
                // and the remainder still runs.
                let _ = self.apply_cd(session, target);
                rest
            }
            CdIntent::None => trimmed,
        };

        let cwd = session.cwd.clone();
        // Don't hold the session map across the child process run.
        drop(sessions);

        self.run_in(&cwd, effective).await
    }

    /// Drop the session for `token`, reverting the next call to home.
    /// Idempotent.
    pub async fn reset(&self, token: &str) {
        self.sessions.lock().await.remove(token);
    }

    /// Run `command` with the session directory made authoritative by
    /// prefixing an explicit `cd` — directory-changing side effects inside
    /// the command itself cannot leak into later calls.
    async fn run_in(&self, cwd: &Path, command: &str) -> ExecOutcome {
        let script = format!("cd {} && {{ {command}\n}}", sh_quote(&cwd.to_string_lossy()));
        let cwd_str = cwd.to_string_lossy().into_owned();

        match run_command(
            &self.shell,
            Path::new("/"),
            &script,
            self.timeout_ms,
            self.max_output,
        )
        .await
        {
            Ok(result) => outcome_from(result, cwd_str, self.timeout_ms),
            Err(e) => ExecOutcome {
                output: e.to_string(),
                code: 1,
                cwd: cwd_str,
            },
        }
    }

    /// Resolve a cd target against a session and apply it, remembering the
    /// prior directory. Errors with shell-style text when the target is not
    /// an existing directory.
    fn apply_cd(&self, session: &mut ExecSession, target: &str) -> Result<(), String> {
        let resolved = match target {
            "" | "~" => self.home_dir.clone(),
            "-" => session
                .prev_cwd
                .clone()
                .unwrap_or_else(|| session.cwd.clone()),
            t => {
                let t = t.trim_matches(|c| c == '"' || c == '\'');
                let expanded = expand_tilde(t);
                let path = Path::new(expanded.as_ref());
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    session.cwd.join(path)
                }
            }
        };

        match std::fs::canonicalize(&resolved) {
            Ok(canonical) if canonical.is_dir() => {
                session.prev_cwd = Some(std::mem::replace(&mut session.cwd, canonical));
                Ok(())
            }
            _ => Err(format!("cd: {target}: No such file or directory")),
        }
    }
}

/// Build the caller-visible outcome from a finished (or timed-out) command.
fn outcome_from(result: CommandOutput, cwd: String, timeout_ms: u64) -> ExecOutcome {
    let mut output = result.stdout;
    output.push_str(&result.stderr);

    if result.timed_out {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&format!("command timed out after {timeout_ms}ms"));
        return ExecOutcome {
            output,
            code: TIMEOUT_EXIT_CODE,
            cwd,
        };
    }

    let code = result.exit_code.unwrap_or(1);
    if code != 0 && output.is_empty() {
        output = format!("command exited with code {code}");
    }
    ExecOutcome { output, code, cwd }
}

/// Directory-change intent parsed from a command line.
#[derive(Debug, PartialEq, Eq)]
enum CdIntent<'a> {
    /// Not a cd command.
    None,
    /// The entire command is a cd.
    Pure(&'a str),
    /// `cd TARGET && REST` or `cd TARGET; REST`.
    Prefix { target: &'a str, rest: &'a str },
}

/// Detect a leading `cd`, splitting off the remainder after the first `&&`
/// or `;`. The word must be exactly `cd` — `cdecl foo` is not a cd.
fn parse_cd(command: &str) -> CdIntent<'_> {
    let after = if command == "cd" {
        ""
    } else if let Some(rest) = command.strip_prefix("cd") {
        if rest.starts_with(char::is_whitespace) {
            rest
        } else {
            return CdIntent::None;
        }
    } else {
        return CdIntent::None;
    };

    let and_pos = after.find("&&");
    let semi_pos = after.find(';');
    let (sep_pos, sep_len) = match (and_pos, semi_pos) {
        (Some(a), Some(s)) if a < s => (Some(a), 2),
        (Some(a), None) => (Some(a), 2),
        (_, Some(s)) => (Some(s), 1),
        (None, None) => (None, 0),
    };

    match sep_pos {
        None => CdIntent::Pure(after.trim()),
        Some(pos) => {
            let target = after[..pos].trim();
            let rest = after[pos + sep_len..].trim();
            if rest.is_empty() {
                CdIntent::Pure(target)
            } else {
                CdIntent::Prefix { target, rest }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_home(home: &Path) -> ExecEngine {
        ExecEngine::new("/bin/sh", &home.to_string_lossy(), 10_000, 1024 * 1024)
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("termd-exec-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::canonicalize(&dir).unwrap()
    }

    #[test]
    fn parses_pure_cd() {
        assert_eq!(parse_cd("cd"), CdIntent::Pure(""));
        assert_eq!(parse_cd("cd /tmp"), CdIntent::Pure("/tmp"));
        assert_eq!(parse_cd("cd  ~/work "), CdIntent::Pure("~/work"));
        assert_eq!(parse_cd("cd /tmp;"), CdIntent::Pure("/tmp"));
    }

    #[test]
    fn parses_cd_prefix() {
        assert_eq!(
            parse_cd("cd /tmp && ls -la"),
            CdIntent::Prefix {
                target: "/tmp",
                rest: "ls -la"
            }
        );
        assert_eq!(
            parse_cd("cd src; cargo build"),
            CdIntent::Prefix {
                target: "src",
                rest: "cargo build"
            }
        );
    }

    #[test]
    fn non_cd_commands_pass_through() {
        assert_eq!(parse_cd("ls"), CdIntent::None);
        assert_eq!(parse_cd("cdecl foo"), CdIntent::None);
        assert_eq!(parse_cd("echo cd /tmp"), CdIntent::None);
    }

    #[tokio::test]
    async fn cwd_persists_across_calls() {
        let home = scratch_dir("continuity");
        let target = home.join("inner");
        std::fs::create_dir_all(&target).unwrap();
        let engine = engine_with_home(&home);

        let first = engine.exec("s1", "cd inner", None).await;
        assert_eq!(first.code, 0);
        assert_eq!(first.output, "");
        assert_eq!(first.cwd, target.to_string_lossy());

        let second = engine.exec("s1", "pwd", None).await;
        assert_eq!(second.code, 0);
        assert_eq!(second.cwd, target.to_string_lossy());
        assert_eq!(second.output.trim(), target.to_string_lossy());
    }

    #[tokio::test]
    async fn tokens_are_isolated() {
        let home = scratch_dir("isolated");
        let target = home.join("a");
        std::fs::create_dir_all(&target).unwrap();
        let engine = engine_with_home(&home);

        engine.exec("one", "cd a", None).await;
        let other = engine.exec("two", "pwd", None).await;
        assert_eq!(other.cwd, home.to_string_lossy());
    }

    #[tokio::test]
    async fn cd_to_missing_path_reports_error_and_keeps_cwd() {
        let home = scratch_dir("missing");
        let engine = engine_with_home(&home);

        let res = engine.exec("s1", "cd does-not-exist", None).await;
        assert_eq!(res.code, 1);
        assert!(res.output.contains("No such file or directory"));
        assert_eq!(res.cwd, home.to_string_lossy());
    }

    #[tokio::test]
    async fn cd_prefix_applies_before_rest() {
        let home = scratch_dir("prefix");
        let target = home.join("sub");
        std::fs::create_dir_all(&target).unwrap();
        let engine = engine_with_home(&home);

        let res = engine.exec("s1", "cd sub && pwd", None).await;
        assert_eq!(res.code, 0);
        assert_eq!(res.output.trim(), target.to_string_lossy());
        assert_eq!(res.cwd, target.to_string_lossy());
    }

    #[tokio::test]
    async fn failed_cd_prefix_still_runs_rest() {
        let home = scratch_dir("badprefix");
        let engine = engine_with_home(&home);

        let res = engine.exec("s1", "cd nope && echo ran", None).await;
        assert_eq!(res.code, 0);
        assert_eq!(res.output.trim(), "ran");
        assert_eq!(res.cwd, home.to_string_lossy());
    }

    #[tokio::test]
    async fn dash_returns_to_previous_directory() {
        let home = scratch_dir("dash");
        let target = home.join("there");
        std::fs::create_dir_all(&target).unwrap();
        let engine = engine_with_home(&home);

        engine.exec("s1", "cd there", None).await;
        let back = engine.exec("s1", "cd -", None).await;
        assert_eq!(back.cwd, home.to_string_lossy());
        let again = engine.exec("s1", "cd -", None).await;
        assert_eq!(again.cwd, target.to_string_lossy());
    }

    #[tokio::test]
    async fn dotdot_resolves_to_parent() {
        let home = scratch_dir("dotdot");
        let target = home.join("deep");
        std::fs::create_dir_all(&target).unwrap();
        let engine = engine_with_home(&home);

        engine.exec("s1", "cd deep", None).await;
        let up = engine.exec("s1", "cd ..", None).await;
        assert_eq!(up.cwd, home.to_string_lossy());
    }

    #[tokio::test]
    async fn empty_command_spawns_nothing() {
        let home = scratch_dir("empty");
        let engine = engine_with_home(&home);

        let res = engine.exec("s1", "   ", None).await;
        assert_eq!(res.output, "");
        assert_eq!(res.code, 0);
        assert_eq!(res.cwd, home.to_string_lossy());
    }

    #[tokio::test]
    async fn internal_cd_does_not_leak_between_calls() {
        let home = scratch_dir("noleak");
        let target = home.join("other");
        std::fs::create_dir_all(&target).unwrap();
        let engine = engine_with_home(&home);

        // cd buried mid-command affects only that child process.
        let res = engine.exec("s1", "true && cd other && pwd", None).await;
        assert_eq!(res.output.trim(), target.to_string_lossy());
        assert_eq!(res.cwd, home.to_string_lossy());
        let after = engine.exec("s1", "pwd", None).await;
        assert_eq!(after.output.trim(), home.to_string_lossy());
    }

    #[tokio::test]
    async fn stderr_is_captured_with_stdout() {
        let home = scratch_dir("stderr");
        let engine = engine_with_home(&home);

        let res = engine.exec("s1", "echo out; echo err >&2", None).await;
        assert_eq!(res.code, 0);
        assert!(res.output.contains("out"));
        assert!(res.output.contains("err"));
    }

    #[tokio::test]
    async fn failing_command_reports_its_code() {
        let home = scratch_dir("failcode");
        let engine = engine_with_home(&home);

        let res = engine.exec("s1", "exit 7", None).await;
        assert_eq!(res.code, 7);
        assert!(res.output.contains("exited with code 7"));
    }

    #[tokio::test]
    async fn reset_reverts_to_home_and_is_idempotent() {
        let home = scratch_dir("reset");
        let target = home.join("away");
        std::fs::create_dir_all(&target).unwrap();
        let engine = engine_with_home(&home);

        engine.exec("s1", "cd away", None).await;
        engine.reset("s1").await;
        engine.reset("s1").await;
        let res = engine.exec("s1", "pwd", None).await;
        assert_eq!(res.cwd, home.to_string_lossy());
    }

    #[tokio::test]
    async fn vanished_cwd_falls_back_to_home() {
        let home = scratch_dir("vanish");
        let target = home.join("doomed");
        std::fs::create_dir_all(&target).unwrap();
        let engine = engine_with_home(&home);

        engine.exec("s1", "cd doomed", None).await;
        std::fs::remove_dir(&target).unwrap();
        let res = engine.exec("s1", "pwd", None).await;
        assert_eq!(res.cwd, home.to_string_lossy());
    }

    #[tokio::test]
    async fn cwd_override_is_adopted() {
        let home = scratch_dir("override");
        let target = home.join("explicit");
        std::fs::create_dir_all(&target).unwrap();
        let engine = engine_with_home(&home);

        let res = engine
            .exec("s1", "pwd", Some(target.to_string_lossy().as_ref()))
            .await;
        assert_eq!(res.cwd, target.to_string_lossy());
        assert_eq!(res.output.trim(), target.to_string_lossy());
    }
}
