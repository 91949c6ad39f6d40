// External program execution.
//
// Every interaction with the host (`which`, container engines, `nix`, process
// signals, the server binary itself) goes through `CommandExecutor`, so tests
// can script the host instead of touching it.

use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::LocalError;
use crate::fsutil::open_private_append;
use crate::signal::{self, Signal};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    /// Text to report when the command failed: stderr, or stdout when stderr is empty.
    pub fn failure_text(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// A server process to start in the background and leave running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    /// Receives both stdout and stderr of the child.
    pub log_path: PathBuf,
}

pub trait CommandExecutor: Send + Sync {
    /// Run to completion, capturing output. `Err` only when the program could not be started.
    fn execute(&self, program: &str, args: &[String]) -> io::Result<CommandResult>;

    /// Start `command` detached from this process and return its pid.
    ///
    /// The child handle is not kept: the server outlives the CLI invocation and
    /// is tracked only through the persisted state record.
    fn spawn_detached(&self, command: &DetachedCommand) -> io::Result<u32>;

    /// Deliver `signal` to `pid`; the error keeps the OS errno.
    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()>;

    /// Whether `pid` exists, including processes owned by another user.
    fn process_exists(&self, pid: u32) -> bool {
        signal::exists(&self.signal(pid, Signal::Existence))
    }

    /// Resolve `tool` on PATH without side effects.
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        let output = self.execute("which", &[tool.to_string()]).ok()?;
        if !output.success {
            return None;
        }
        output.stdout.lines().next().map(str::trim).filter(|line| !line.is_empty()).map(PathBuf::from)
    }

    fn is_on_path(&self, tool: &str) -> bool {
        self.locate(tool).is_some()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessCommandExecutor;

impl CommandExecutor for ProcessCommandExecutor {
    fn execute(&self, program: &str, args: &[String]) -> io::Result<CommandResult> {
        let output = Command::new(program).args(args).stdin(Stdio::null()).output()?;
        Ok(CommandResult {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn_detached(&self, command: &DetachedCommand) -> io::Result<u32> {
        let log = open_private_append(&command.log_path)?;
        let log_err = log.try_clone()?;

        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .envs(command.envs.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        // Own process group: a Ctrl-C aimed at the CLI must not reach the server.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            process.process_group(0);
        }

        let child = process.spawn()?;
        let pid = child.id();
        debug!(pid, program = %command.program.display(), "spawned detached server process");
        Ok(pid)
    }

    fn signal(&self, pid: u32, sig: Signal) -> io::Result<()> {
        signal::send(pid, sig)
    }
}

/// Run a command that must succeed; non-zero exits become `LaunchFailed` with stderr verbatim.
pub(crate) fn run_checked(
    executor: &dyn CommandExecutor,
    program: &str,
    args: &[String],
) -> Result<CommandResult, LocalError> {
    let command = render_command(program, args);
    debug!(%command, "running");
    let result = executor
        .execute(program, args)
        .map_err(|error| LocalError::LaunchFailed { command: command.clone(), stderr: error.to_string() })?;

    if result.success {
        return Ok(result);
    }

    Err(LocalError::LaunchFailed { command, stderr: result.failure_text().trim_end().to_string() })
}

/// Human-readable command line with credential values masked.
pub(crate) fn render_command(program: &str, args: &[String]) -> String {
    let mut rendered = String::from(program);
    for arg in args {
        rendered.push(' ');
        match arg.split_once('=') {
            Some((key, _)) if key.ends_with("PASSWORD") => {
                rendered.push_str(key);
                rendered.push_str("=***");
            }
            _ => rendered.push_str(arg),
        }
    }
    rendered
}

pub(crate) fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}
