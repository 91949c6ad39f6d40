// Native server processes: a nix-built package or a binary already on the host.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{LaunchHandle, Launcher};
use crate::config::LaunchConfig;
use crate::error::LocalError;
use crate::exec::{args, run_checked, CommandExecutor, DetachedCommand};
use crate::fsutil::create_private_dir_all;
use crate::ini::{AdminCredential, Listen, ServerConfig};
use crate::password::PasswordHasher;
use crate::runtime::RuntimeKind;
use crate::signal::Signal;
use crate::state::InstanceState;

pub const NIX_PACKAGE: &str = "nixpkgs#couchdb3";
pub const FALLBACK_BINARY: &str = "/opt/couchdb/bin/couchdb";
const SERVER_BINARY: &str = "couchdb";
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeSource {
    Nix,
    Binary { binary_override: Option<PathBuf> },
}

/// A located server install: the binary and the prefix holding `etc/default.ini`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInstall {
    pub binary: PathBuf,
    pub prefix: PathBuf,
}

impl ServerInstall {
    fn from_binary(binary: PathBuf) -> Self {
        // `<prefix>/bin/couchdb`; package managers often link the binary elsewhere.
        let resolved = std::fs::canonicalize(&binary).unwrap_or_else(|_| binary.clone());
        let prefix = resolved
            .parent()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self { binary, prefix }
    }

    pub fn default_ini(&self) -> PathBuf {
        self.prefix.join("etc").join("default.ini")
    }
}

pub struct NativeLauncher {
    source: NativeSource,
    executor: Arc<dyn CommandExecutor>,
    stop_grace: Duration,
}

impl NativeLauncher {
    pub fn new(source: NativeSource, executor: Arc<dyn CommandExecutor>, stop_grace: Duration) -> Self {
        Self { source, executor, stop_grace }
    }

    pub fn resolve_install(&self) -> Result<ServerInstall, LocalError> {
        match &self.source {
            NativeSource::Nix => {
                let build = args(["build", NIX_PACKAGE, "--no-link", "--print-out-paths"]);
                let result = run_checked(self.executor.as_ref(), "nix", &build)?;
                let out = result.stdout.lines().map(str::trim).rfind(|line| !line.is_empty()).ok_or_else(|| {
                    LocalError::LaunchFailed {
                        command: format!("nix {}", build.join(" ")),
                        stderr: "no output path printed".into(),
                    }
                })?;
                let prefix = PathBuf::from(out);
                Ok(ServerInstall { binary: prefix.join("bin").join(SERVER_BINARY), prefix })
            }
            NativeSource::Binary { binary_override: Some(binary) } => Ok(ServerInstall::from_binary(binary.clone())),
            NativeSource::Binary { binary_override: None } => {
                if let Some(binary) = self.executor.locate(SERVER_BINARY) {
                    return Ok(ServerInstall::from_binary(binary));
                }
                let fallback = PathBuf::from(FALLBACK_BINARY);
                if fallback.exists() {
                    return Ok(ServerInstall::from_binary(fallback));
                }
                Err(LocalError::LaunchFailed {
                    command: format!("which {SERVER_BINARY}"),
                    stderr: format!(
                        "no `{SERVER_BINARY}` binary found on PATH or at {FALLBACK_BINARY}; \
                         set COUCHCTL_COUCHDB_BIN or install podman, docker or nix"
                    ),
                })
            }
        }
    }

    fn server_config(config: &LaunchConfig) -> ServerConfig {
        let data_dir = config.data_dir.join("data");
        let record = PasswordHasher::for_server_version(&config.version).hash(&config.admin_pass);
        ServerConfig {
            database_dir: Some(data_dir.clone()),
            view_index_dir: Some(data_dir),
            single_node: true,
            listen: Some(Listen { port: config.port, bind_address: config.listen_address() }),
            admins: vec![(config.admin_user.clone(), AdminCredential::Hashed(record))],
        }
    }

    fn pid_alive(&self, pid: u32) -> bool {
        self.executor.process_exists(pid)
    }

    fn send_for_stop(&self, pid: u32, signal: Signal) -> Result<(), LocalError> {
        self.executor.signal(pid, signal).map_err(|error| LocalError::StopFailed {
            command: format!("kill -{signal} {pid}"),
            stderr: error.to_string(),
        })
    }
}

impl Launcher for NativeLauncher {
    fn kind(&self) -> RuntimeKind {
        match self.source {
            NativeSource::Nix => RuntimeKind::SourcePackageManager,
            NativeSource::Binary { .. } => RuntimeKind::RawBinary,
        }
    }

    fn launch(&self, config: &LaunchConfig) -> Result<LaunchHandle, LocalError> {
        let install = self.resolve_install()?;
        debug!(binary = %install.binary.display(), prefix = %install.prefix.display(), "resolved server install");

        create_private_dir_all(&config.data_dir.join("data"))?;
        let local_ini = config.data_dir.join("etc").join("local.ini");
        Self::server_config(config).write_to(&local_ini)?;

        let command = DetachedCommand {
            program: install.binary.clone(),
            args: Vec::new(),
            envs: vec![(
                "COUCHDB_INI_FILES".to_string(),
                format!("{} {}", install.default_ini().display(), local_ini.display()),
            )],
            log_path: config.data_dir.join("couchdb.log"),
        };

        info!(kind = %self.kind(), binary = %install.binary.display(), port = config.port, "starting server process");
        let pid = self.executor.spawn_detached(&command).map_err(|error| LocalError::LaunchFailed {
            command: install.binary.display().to_string(),
            stderr: error.to_string(),
        })?;

        Ok(LaunchHandle { pid: Some(pid), container_name: None })
    }

    fn is_alive(&self, state: &InstanceState) -> bool {
        state.handle.is_some_and(|pid| self.pid_alive(pid))
    }

    fn stop(&self, state: &InstanceState) -> Result<(), LocalError> {
        let Some(pid) = state.handle else {
            return Ok(());
        };
        if let Err(error) = self.send_for_stop(pid, Signal::Term) {
            if !self.pid_alive(pid) {
                debug!(pid, "server process already gone");
                return Ok(());
            }
            return Err(error);
        }
        info!(pid, "sent TERM to server process");

        let deadline = Instant::now() + self.stop_grace;
        while Instant::now() < deadline {
            if !self.pid_alive(pid) {
                return Ok(());
            }
            thread::sleep(STOP_POLL_INTERVAL);
        }
        if !self.pid_alive(pid) {
            return Ok(());
        }

        warn!(pid, grace_ms = self.stop_grace.as_millis() as u64, "server ignored TERM, sending KILL");
        match self.send_for_stop(pid, Signal::Kill) {
            Err(_) if !self.pid_alive(pid) => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::testing::{failed, gone, not_permitted, ok, ScriptedHost};
    use chrono::Utc;
    use tempfile::TempDir;

    fn native(source: NativeSource, host: &Arc<ScriptedHost>) -> NativeLauncher {
        NativeLauncher::new(source, host.clone(), Duration::ZERO)
    }

    fn state(pid: Option<u32>) -> InstanceState {
        InstanceState {
            runtime_kind: RuntimeKind::RawBinary,
            handle: pid,
            container_name: None,
            version: "3.3.3".into(),
            port: 5984,
            admin_user: "admin".into(),
            bind_address: "127.0.0.1".into(),
            data_dir: PathBuf::from("/tmp/couchctl"),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn nix_launch_uses_built_output_path() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(ScriptedHost::new());
        host.respond("nix build", ok("/nix/store/abc-couchdb-3.3.3\n"));
        let config = LaunchConfig::new("default", "password", dir.path());

        let handle = native(NativeSource::Nix, &host).launch(&config).unwrap();

        assert_eq!(handle, LaunchHandle { pid: Some(4242), container_name: None });
        assert_eq!(host.commands()[0], "nix build nixpkgs#couchdb3 --no-link --print-out-paths");

        let spawned = host.spawned.lock().unwrap();
        assert_eq!(spawned[0].program, PathBuf::from("/nix/store/abc-couchdb-3.3.3/bin/couchdb"));
        assert_eq!(
            spawned[0].envs,
            vec![(
                "COUCHDB_INI_FILES".to_string(),
                format!("/nix/store/abc-couchdb-3.3.3/etc/default.ini {}/etc/local.ini", dir.path().display())
            )]
        );
        assert_eq!(spawned[0].log_path, dir.path().join("couchdb.log"));
    }

    #[test]
    fn generated_config_holds_listener_and_hashed_admin() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(ScriptedHost::new());
        let mut config = LaunchConfig::new("default", "password", dir.path());
        config.port = 15984;

        native(NativeSource::Binary { binary_override: Some("/usr/local/bin/couchdb".into()) }, &host)
            .launch(&config)
            .unwrap();

        let ini = std::fs::read_to_string(dir.path().join("etc").join("local.ini")).unwrap();
        assert!(ini.contains("port = 15984"));
        assert!(ini.contains("bind_address = 127.0.0.1"));
        assert!(ini.contains("single_node = true"));
        assert!(ini.contains("admin = -pbkdf2-"));
        assert!(!ini.contains("= password"));
    }

    #[test]
    fn bracketed_ipv6_bind_is_written_bare() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(ScriptedHost::new());
        let mut config = LaunchConfig::new("default", "password", dir.path());
        config.bind_address = "[::1]".into();

        native(NativeSource::Binary { binary_override: Some("/usr/local/bin/couchdb".into()) }, &host)
            .launch(&config)
            .unwrap();

        let ini = std::fs::read_to_string(dir.path().join("etc").join("local.ini")).unwrap();
        assert!(ini.contains("bind_address = ::1\n"));
    }

    #[test]
    fn failed_nix_build_surfaces_stderr() {
        let dir = TempDir::new().unwrap();
        let host = Arc::new(ScriptedHost::new());
        host.respond("nix build", failed("error: flake 'nixpkgs' does not provide attribute"));
        let config = LaunchConfig::new("default", "password", dir.path());

        let error = native(NativeSource::Nix, &host).launch(&config).expect_err("build fails");
        assert!(error.to_string().contains("does not provide attribute"));
        assert!(host.spawned.lock().unwrap().is_empty());
    }

    #[test]
    fn raw_binary_prefers_path_lookup() {
        let host = Arc::new(ScriptedHost::new());
        host.respond("which couchdb", ok("/nonexistent/couch/bin/couchdb\n"));

        let install = native(NativeSource::Binary { binary_override: None }, &host).resolve_install().unwrap();
        assert_eq!(install.binary, PathBuf::from("/nonexistent/couch/bin/couchdb"));
        assert_eq!(install.default_ini(), PathBuf::from("/nonexistent/couch/etc/default.ini"));
    }

    #[test]
    fn liveness_signals_the_recorded_pid() {
        let host = Arc::new(ScriptedHost::new());
        host.reply_to_signal(Signal::Existence, gone());
        let launcher = native(NativeSource::Nix, &host);

        assert!(!launcher.is_alive(&state(Some(99999))));
        assert!(!launcher.is_alive(&state(None)));
        assert_eq!(host.commands(), vec!["signal 0 99999"]);
    }

    #[test]
    fn process_of_another_user_is_alive() {
        let host = Arc::new(ScriptedHost::new());
        host.reply_to_signal(Signal::Existence, not_permitted());

        assert!(native(NativeSource::Nix, &host).is_alive(&state(Some(1))));
    }

    #[test]
    fn stop_sends_term_and_returns_once_the_process_exits() {
        let host = Arc::new(ScriptedHost::new());
        host.reply_to_signal(Signal::Existence, gone());

        native(NativeSource::Nix, &host).stop(&state(Some(4242))).unwrap();

        assert_eq!(host.commands(), vec!["signal TERM 4242", "signal 0 4242"]);
    }

    #[test]
    fn stop_escalates_to_kill_after_grace_period() {
        let host = Arc::new(ScriptedHost::new());

        native(NativeSource::Nix, &host).stop(&state(Some(4242))).unwrap();

        let commands = host.commands();
        assert_eq!(commands.first().map(String::as_str), Some("signal TERM 4242"));
        assert_eq!(commands.last().map(String::as_str), Some("signal KILL 4242"));
        assert!(host.calls.lock().unwrap().iter().all(|call| call[0] != "kill"));
    }

    #[test]
    fn stop_of_exited_process_succeeds() {
        let host = Arc::new(ScriptedHost::new());
        host.reply_to_signal(Signal::Term, gone());
        host.reply_to_signal(Signal::Existence, gone());

        native(NativeSource::Nix, &host).stop(&state(Some(4242))).unwrap();
    }

    #[test]
    fn stop_of_foreign_process_reports_the_denial() {
        let host = Arc::new(ScriptedHost::new());
        host.reply_to_signal(Signal::Term, not_permitted());
        host.reply_to_signal(Signal::Existence, not_permitted());

        let error = native(NativeSource::Nix, &host).stop(&state(Some(1))).expect_err("not ours to stop");
        match error {
            LocalError::StopFailed { command, .. } => assert_eq!(command, "kill -TERM 1"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
