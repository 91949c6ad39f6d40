// Execution environments a local server can be launched through.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the local database server is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeKind {
    /// Rootless container engine (`podman`).
    ContainerDaemonless,
    /// Daemon-backed container engine (`docker`).
    ContainerDaemon,
    /// Server binary provided by a declarative package manager (`nix`).
    SourcePackageManager,
    /// A `couchdb` binary already present on the host.
    RawBinary,
}

impl RuntimeKind {
    /// Detection order, most preferred first. The last entry needs no tool.
    pub const PREFERENCE: [RuntimeKind; 4] = [
        RuntimeKind::ContainerDaemonless,
        RuntimeKind::ContainerDaemon,
        RuntimeKind::SourcePackageManager,
        RuntimeKind::RawBinary,
    ];

    /// Executable whose presence on PATH makes this kind available.
    pub fn tool(self) -> Option<&'static str> {
        match self {
            Self::ContainerDaemonless => Some("podman"),
            Self::ContainerDaemon => Some("docker"),
            Self::SourcePackageManager => Some("nix"),
            Self::RawBinary => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContainerDaemonless => "container-daemonless",
            Self::ContainerDaemon => "container-daemon",
            Self::SourcePackageManager => "source-package-manager",
            Self::RawBinary => "raw-binary",
        }
    }

    pub fn is_container(self) -> bool {
        matches!(self, Self::ContainerDaemonless | Self::ContainerDaemon)
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "unknown runtime `{0}` (expected one of: container-daemonless, container-daemon, \
     source-package-manager, raw-binary)"
)]
pub struct ParseRuntimeKindError(String);

impl FromStr for RuntimeKind {
    type Err = ParseRuntimeKindError;

    /// Accepts the canonical names as well as the tool names (`podman`, `docker`, `nix`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "container-daemonless" | "podman" => Ok(Self::ContainerDaemonless),
            "container-daemon" | "docker" => Ok(Self::ContainerDaemon),
            "source-package-manager" | "nix" => Ok(Self::SourcePackageManager),
            "raw-binary" | "binary" => Ok(Self::RawBinary),
            other => Err(ParseRuntimeKindError(other.to_string())),
        }
    }
}
