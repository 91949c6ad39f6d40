// Consistent exit codes for the couchctl CLI.
//
//   0  = success
//   1  = general error (including local server bootstrap failures)
//   2  = usage/argument error, or a request the server rejected as malformed
//   10 = server not reachable
//   11 = authentication error
//   12 = document conflict
//   13 = network error (timeout)
//   14 = not found

use std::process;

use couchctl_local::LocalError;

use crate::client::CouchError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    ServerDown = 10,
    Auth = 11,
    Conflict = 12,
    Network = 13,
    NotFound = 14,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<LocalError>().is_some() {
                return Self::Error;
            }
            if let Some(couch_err) = cause.downcast_ref::<CouchError>() {
                return Self::from_status(couch_err.status);
            }
            if let Some(http_err) = cause.downcast_ref::<reqwest::Error>() {
                if http_err.is_timeout() {
                    return Self::Network;
                }
                if http_err.is_connect() {
                    return Self::ServerDown;
                }
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                match io_err.kind() {
                    std::io::ErrorKind::ConnectionRefused => return Self::ServerDown,
                    std::io::ErrorKind::TimedOut => return Self::Network,
                    _ => {}
                }
            }
        }

        Self::Error
    }

    /// Map an HTTP status from the server to an exit code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Auth,
            409 | 412 => Self::Conflict,
            404 => Self::NotFound,
            400 => Self::Usage,
            _ => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
