// Container engines: podman (daemonless) and docker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{run_for_stop, LaunchHandle, Launcher};
use crate::config::{socket_host, LaunchConfig, CONTAINER_PORT};
use crate::error::LocalError;
use crate::exec::{args, run_checked, CommandExecutor};
use crate::fsutil::create_private_dir_all;
use crate::ini::{AdminCredential, ServerConfig};
use crate::password::PasswordHasher;
use crate::runtime::RuntimeKind;
use crate::state::InstanceState;

const CONTAINER_DATA_DIR: &str = "/opt/couchdb/data";
const CONTAINER_ADMINS_INI: &str = "/opt/couchdb/etc/local.d/10-admins.ini";
const ADMINS_INI_FILE: &str = "10-admins.ini";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerEngine {
    Podman,
    Docker,
}

impl ContainerEngine {
    pub fn tool(self) -> &'static str {
        match self {
            Self::Podman => "podman",
            Self::Docker => "docker",
        }
    }

    pub fn kind(self) -> RuntimeKind {
        match self {
            Self::Podman => RuntimeKind::ContainerDaemonless,
            Self::Docker => RuntimeKind::ContainerDaemon,
        }
    }
}

pub struct ContainerLauncher {
    engine: ContainerEngine,
    executor: Arc<dyn CommandExecutor>,
    image: String,
}

impl ContainerLauncher {
    pub fn new(engine: ContainerEngine, executor: Arc<dyn CommandExecutor>, image: impl Into<String>) -> Self {
        Self { engine, executor, image: image.into() }
    }

    /// Arguments for `<tool> run`, credentials included.
    pub fn run_args(&self, config: &LaunchConfig, admins_ini: Option<&Path>) -> Vec<String> {
        let data_dir = config.data_dir.join("data");
        let mut run = args(["run", "-d", "--name"]);
        run.push(config.container_name());
        run.push("-p".into());
        run.push(format!("{}:{}:{CONTAINER_PORT}", socket_host(&config.bind_address), config.port));
        run.push("-v".into());
        run.push(format!("{}:{CONTAINER_DATA_DIR}", data_dir.display()));

        match (self.engine, admins_ini) {
            (ContainerEngine::Podman, Some(path)) => {
                run.push("-v".into());
                run.push(format!("{}:{CONTAINER_ADMINS_INI}:Z", path.display()));
            }
            _ => {
                run.push("-e".into());
                run.push(format!("COUCHDB_USER={}", config.admin_user));
                run.push("-e".into());
                run.push(format!("COUCHDB_PASSWORD={}", config.admin_pass));
            }
        }

        run.push(format!("{}:{}", self.image, config.version));
        run
    }

    /// Podman gets its admin credential from a mounted, pre-hashed ini file.
    fn write_admins_ini(&self, config: &LaunchConfig) -> Result<PathBuf, LocalError> {
        let path = config.data_dir.join("etc").join(ADMINS_INI_FILE);
        let record = PasswordHasher::for_server_version(&config.version).hash(&config.admin_pass);
        let server_config = ServerConfig {
            admins: vec![(config.admin_user.clone(), AdminCredential::Hashed(record))],
            ..ServerConfig::default()
        };
        server_config.write_to(&path)?;
        Ok(path)
    }

    fn host_pid(&self, name: &str) -> Option<u32> {
        let inspect = args(["inspect", "--format", "{{.State.Pid}}", name]);
        let result = self.executor.execute(self.engine.tool(), &inspect).ok()?;
        if !result.success {
            debug!(name, stderr = %result.stderr.trim(), "container pid not available");
            return None;
        }
        result.stdout.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
    }
}

impl Launcher for ContainerLauncher {
    fn kind(&self) -> RuntimeKind {
        self.engine.kind()
    }

    fn launch(&self, config: &LaunchConfig) -> Result<LaunchHandle, LocalError> {
        let tool = self.engine.tool();
        let name = config.container_name();

        // A leftover container with our name would make `run` fail.
        if let Err(error) = self.executor.execute(tool, &args(["rm", "-f", name.as_str()])) {
            debug!(tool, name = %name, %error, "pre-launch container cleanup failed");
        }

        create_private_dir_all(&config.data_dir.join("data"))?;
        let admins_ini = match self.engine {
            ContainerEngine::Podman => Some(self.write_admins_ini(config)?),
            ContainerEngine::Docker => None,
        };

        info!(tool, name = %name, image = %self.image, version = %config.version, port = config.port, "starting container");
        run_checked(self.executor.as_ref(), tool, &self.run_args(config, admins_ini.as_deref()))?;

        let pid = self.host_pid(&name);
        Ok(LaunchHandle { pid, container_name: Some(name) })
    }

    fn is_alive(&self, state: &InstanceState) -> bool {
        let Some(name) = &state.container_name else {
            return false;
        };
        let inspect = args(["inspect", "--format", "{{.State.Running}}", name.as_str()]);
        match self.executor.execute(self.engine.tool(), &inspect) {
            Ok(result) => result.success && result.stdout.trim() == "true",
            Err(error) => {
                warn!(tool = self.engine.tool(), %error, "container liveness probe failed");
                false
            }
        }
    }

    fn stop(&self, state: &InstanceState) -> Result<(), LocalError> {
        let Some(name) = state.container_name.as_deref() else {
            return Ok(());
        };
        let tool = self.engine.tool();
        let was_alive = self.is_alive(state);

        if was_alive {
            info!(tool, name, "stopping container");
            run_for_stop(self.executor.as_ref(), tool, &args(["stop", name]))?;
        }

        match run_for_stop(self.executor.as_ref(), tool, &args(["rm", name])) {
            Ok(_) => Ok(()),
            // Already gone: nothing left to remove.
            Err(error) if !was_alive => {
                debug!(tool, name, %error, "container removal skipped");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}
