// Launch strategies, one per runtime kind.

mod container;
mod native;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use container::{ContainerEngine, ContainerLauncher};
pub use native::{NativeLauncher, NativeSource};

use crate::config::LaunchConfig;
use crate::error::LocalError;
use crate::exec::{run_checked, CommandExecutor, CommandResult};
use crate::runtime::RuntimeKind;
use crate::state::InstanceState;

pub const DEFAULT_IMAGE: &str = "couchdb";
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);

/// Identifies what `launch` started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchHandle {
    pub pid: Option<u32>,
    pub container_name: Option<String>,
}

pub trait Launcher: Send + Sync {
    fn kind(&self) -> RuntimeKind;

    /// Start the server; returns once the launch command has been issued, not when it is ready.
    fn launch(&self, config: &LaunchConfig) -> Result<LaunchHandle, LocalError>;

    fn is_alive(&self, state: &InstanceState) -> bool;

    fn stop(&self, state: &InstanceState) -> Result<(), LocalError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherOptions {
    /// How long a native server gets between TERM and KILL.
    pub stop_grace: Duration,
    /// Explicit server binary for `raw-binary` (`COUCHCTL_COUCHDB_BIN`).
    pub binary_override: Option<PathBuf>,
    pub image: String,
}

impl Default for LauncherOptions {
    fn default() -> Self {
        Self { stop_grace: DEFAULT_STOP_GRACE, binary_override: None, image: DEFAULT_IMAGE.to_string() }
    }
}

pub fn launcher_for(
    kind: RuntimeKind,
    executor: Arc<dyn CommandExecutor>,
    options: &LauncherOptions,
) -> Box<dyn Launcher> {
    match kind {
        RuntimeKind::ContainerDaemonless => {
            Box::new(ContainerLauncher::new(ContainerEngine::Podman, executor, options.image.clone()))
        }
        RuntimeKind::ContainerDaemon => {
            Box::new(ContainerLauncher::new(ContainerEngine::Docker, executor, options.image.clone()))
        }
        RuntimeKind::SourcePackageManager => {
            Box::new(NativeLauncher::new(NativeSource::Nix, executor, options.stop_grace))
        }
        RuntimeKind::RawBinary => Box::new(NativeLauncher::new(
            NativeSource::Binary { binary_override: options.binary_override.clone() },
            executor,
            options.stop_grace,
        )),
    }
}

/// `run_checked`, reporting failures as `StopFailed`.
fn run_for_stop(
    executor: &dyn CommandExecutor,
    program: &str,
    args: &[String],
) -> Result<CommandResult, LocalError> {
    run_checked(executor, program, args).map_err(|error| match error {
        LocalError::LaunchFailed { command, stderr } => LocalError::StopFailed { command, stderr },
        other => other,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedHost;
    use super::*;

    #[test]
    fn selects_one_strategy_per_kind() {
        let executor: Arc<dyn CommandExecutor> = Arc::new(ScriptedHost::new());
        for kind in RuntimeKind::PREFERENCE {
            let launcher = launcher_for(kind, executor.clone(), &LauncherOptions::default());
            assert_eq!(launcher.kind(), kind);
        }
    }

    #[test]
    fn stop_failures_are_reported_as_stop_errors() {
        let host = ScriptedHost::new();
        host.respond("docker stop", testing::failed("Error: No such container: couchctl-default"));

        let error = run_for_stop(&host, "docker", &crate::exec::args(["stop", "couchctl-default"]))
            .expect_err("should fail");
        assert!(matches!(error, LocalError::StopFailed { ref stderr, .. } if stderr.contains("No such container")));
    }
}
