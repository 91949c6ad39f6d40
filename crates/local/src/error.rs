// Errors surfaced by the local server bootstrapper.

use std::io;

use thiserror::Error;

use crate::runtime::RuntimeKind;

#[derive(Debug, Error)]
pub enum LocalError {
    /// A live instance is already recorded under this name.
    #[error("instance `{instance}` is already running ({runtime_kind} on port {port})")]
    AlreadyRunning { instance: String, runtime_kind: RuntimeKind, port: u16 },

    /// An explicitly requested runtime's tool is not installed.
    #[error("runtime `{kind}` is not available: `{tool}` was not found on PATH")]
    NoRuntimeAvailable { kind: RuntimeKind, tool: &'static str },

    /// The launch invocation exited non-zero or could not be spawned.
    #[error("`{command}` failed: {stderr}")]
    LaunchFailed { command: String, stderr: String },

    #[error("`{command}` failed while stopping the server: {stderr}")]
    StopFailed { command: String, stderr: String },

    #[error("server on port {port} did not become ready within {elapsed_secs}s")]
    HealthTimeout { port: u16, elapsed_secs: u64 },

    #[error("instance `{instance}` is not running")]
    NotRunning { instance: String },

    #[error("invalid launch configuration: {0}")]
    InvalidConfig(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode instance state: {0}")]
    State(#[from] serde_json::Error),

    #[error("failed to build readiness client: {0}")]
    Http(#[from] reqwest::Error),
}

impl LocalError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }
}
