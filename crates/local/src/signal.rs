// Process signals for natively launched servers, sent with kill(2) directly.

use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Signal 0: checks that the pid exists without delivering anything.
    Existence,
    /// SIGTERM (graceful shutdown).
    Term,
    /// SIGKILL (force kill).
    Kill,
}

impl Signal {
    /// Returns the signal number.
    #[cfg(unix)]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Existence => 0,
            Self::Term => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }

    #[cfg(not(unix))]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Existence => 0,
            Self::Term => 15,
            Self::Kill => 9,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Existence => "0",
            Self::Term => "TERM",
            Self::Kill => "KILL",
        })
    }
}

/// Send `signal` to `pid`. The error carries the OS errno (`ESRCH`, `EPERM`, ...).
#[cfg(unix)]
pub fn send(pid: u32, signal: Signal) -> io::Result<()> {
    // 0 and negative values address process groups, never a single server.
    let target = libc::pid_t::try_from(pid)
        .ok()
        .filter(|target| *target > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}")))?;

    // SAFETY: kill() takes plain integers and touches no memory of ours.
    let ret = unsafe { libc::kill(target, signal.as_i32()) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn send(pid: u32, signal: Signal) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, format!("cannot send {signal} to pid {pid} on this platform")))
}

/// Interpret the outcome of a `Signal::Existence` delivery.
///
/// `EPERM` means the process exists but belongs to another user, so it still
/// counts as alive. `ESRCH` and everything else mean it is gone.
pub fn exists(outcome: &io::Result<()>) -> bool {
    match outcome {
        Ok(()) => true,
        Err(error) => error.kind() == io::ErrorKind::PermissionDenied,
    }
}
