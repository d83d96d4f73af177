//! Small helpers shared across modules.

use std::borrow::Cow;

/// Expand a leading `~` to `$HOME`.
///
/// - `"~"` → `"/home/user"`
/// - `"~/foo"` → `"/home/user/foo"`
/// - Anything else passes through unchanged.
pub fn expand_tilde(path: &str) -> Cow<'_, str> {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            if path == "~" {
                return Cow::Owned(home);
            }
            return Cow::Owned(format!("{}{}", home, &path[1..]));
        }
    }
    Cow::Borrowed(path)
}

/// Quote a string for safe interpolation into a `sh -c` command line.
///
/// Wraps in single quotes, escaping embedded single quotes as `'\''`.
pub fn sh_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}
