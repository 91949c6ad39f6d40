// Output format auto-detection for the CLI.
//
// TTY → human-readable text. Piped/redirected → structured JSON.
// `--json` flag forces JSON output regardless of terminal.

use couchctl_local::LocalError;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};

use crate::client::CouchError;

const ANSI_RED: &str = "\x1b[31m";
const ANSI_RESET: &str = "\x1b[0m";

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Human,
    /// Machine-readable JSON (one object per response).
    Json,
}

impl OutputFormat {
    /// Auto-detect format: JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    /// Testable variant that takes an explicit `is_tty` flag.
    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// Write a value to stdout in the selected format.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    write_output(&mut io::stdout().lock(), format, value, human_fn)
}

/// Write a value to a provided writer.
pub fn write_output<W, T, F>(
    writer: &mut W,
    format: OutputFormat,
    value: &T,
    human_fn: F,
) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => {
            writeln!(writer, "{}", human_fn(value))
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

/// Pretty-printed JSON, used as the human rendering of raw server documents.
pub fn pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Write an error to stderr in the selected format.
pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    let mut err = io::stderr().lock();
    match format {
        OutputFormat::Human => {
            let line = render_human_stderr_line("error", message, io::stderr().is_terminal(), ANSI_RED);
            let _ = writeln!(err, "{line}");
        }
        OutputFormat::Json => {
            let obj = serde_json::json!({
                "error": {
                    "code": code,
                    "message": message,
                }
            });
            let _ = serde_json::to_writer(&mut err, &obj);
            let _ = writeln!(err);
        }
    }
}

/// Print a mapped, actionable error for a command failure.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    print_error(format, code, &message);
}

fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    let message = format!("{error:#}");

    for cause in error.chain() {
        if let Some(local) = cause.downcast_ref::<LocalError>() {
            return local_error(local, message);
        }
        if let Some(couch) = cause.downcast_ref::<CouchError>() {
            return couch_error(couch, message);
        }
        if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
            if http.is_timeout() {
                return (
                    "NETWORK_TIMEOUT",
                    format!("{message}\nThe server did not answer in time. Check the URL and network."),
                );
            }
            if http.is_connect() {
                return (
                    "SERVER_NOT_REACHABLE",
                    format!("{message}\nServer is not reachable. Start a local one with: couchctl local start"),
                );
            }
        }
    }

    ("ERROR", message)
}

fn local_error(error: &LocalError, message: String) -> (&'static str, String) {
    match error {
        LocalError::AlreadyRunning { instance, .. } => (
            "ALREADY_RUNNING",
            format!("{message}\nStop it first with: couchctl local stop --instance {instance}"),
        ),
        LocalError::NoRuntimeAvailable { .. } => (
            "NO_RUNTIME",
            format!("{message}\nInstall it, or omit --runtime to use the first available runtime."),
        ),
        LocalError::LaunchFailed { .. } => ("LAUNCH_FAILED", message),
        LocalError::StopFailed { .. } => ("STOP_FAILED", message),
        LocalError::HealthTimeout { .. } => (
            "HEALTH_TIMEOUT",
            format!(
                "{message}\nThe server was left running. Check it with: couchctl local status, \
                 or remove it with: couchctl local stop"
            ),
        ),
        LocalError::NotRunning { .. } => (
            "NOT_RUNNING",
            format!("{message}\nStart one with: couchctl local start"),
        ),
        LocalError::InvalidConfig(_) => ("INVALID_CONFIG", message),
        _ => ("LOCAL_ERROR", message),
    }
}

fn couch_error(error: &CouchError, message: String) -> (&'static str, String) {
    match error.status {
        401 | 403 => (
            "AUTH_FAILURE",
            format!("{message}\nAuthentication failed. Pass --user/--password or set COUCHCTL_USER/COUCHCTL_PASSWORD."),
        ),
        404 => ("NOT_FOUND", message),
        409 | 412 => (
            "CONFLICT",
            format!("{message}\nFetch the current revision with: couchctl doc get, then retry with --rev."),
        ),
        400 => ("BAD_REQUEST", message),
        _ => ("SERVER_ERROR", message),
    }
}

fn render_human_stderr_line(label: &str, message: &str, is_tty: bool, color: &str) -> String {
    if is_tty {
        format!("{color}{label}:{ANSI_RESET} {message}")
    } else {
        format!("{label}: {message}")
    }
}
