// `couchctl local`: start, stop and inspect a server on this machine.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Args, Subcommand};
use couchctl_local::config::{
    self as local_config, DEFAULT_ADMIN_PASSWORD, DEFAULT_ADMIN_USER, DEFAULT_INSTANCE, DEFAULT_PORT, DEFAULT_VERSION,
};
use couchctl_local::launcher::LauncherOptions;
use couchctl_local::{
    ControllerOptions, InstanceState, InstanceStatus, LaunchConfig, Lifecycle, LifecycleController, RuntimeKind,
};
use serde::Serialize;
use tracing::warn;

use super::{block_on, Session};
use crate::config::LocalSettings;
use crate::output;

#[derive(Debug, Args)]
pub struct LocalArgs {
    #[command(subcommand)]
    pub action: LocalAction,
}

#[derive(Debug, Subcommand)]
pub enum LocalAction {
    /// Launch a server and wait until it answers
    Start(StartArgs),
    /// Stop a server started by `local start`
    Stop {
        /// Instance name
        #[arg(long)]
        instance: Option<String>,
    },
    /// Report whether a local server is running and ready
    Status {
        /// Instance name
        #[arg(long)]
        instance: Option<String>,
    },
}

#[derive(Debug, Default, Args)]
pub struct StartArgs {
    /// Instance name
    #[arg(long)]
    pub instance: Option<String>,
    /// Server version (container image tag)
    #[arg(long)]
    pub version: Option<String>,
    /// Host port to listen on
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub admin_user: Option<String>,
    /// Admin password, `password` when omitted; never written to disk in clear text
    #[arg(long, env = "COUCHCTL_ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,
    /// podman, docker, nix or binary; detected when omitted
    #[arg(long)]
    pub runtime: Option<RuntimeKind>,
    /// Directory for database files and generated config
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Host address the server is published on
    #[arg(long)]
    pub bind_address: Option<String>,
    /// Seconds to wait for readiness
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Stop the server again if it never becomes ready
    #[arg(long)]
    pub stop_on_timeout: bool,
    /// Container image used by podman/docker
    #[arg(long)]
    pub image: Option<String>,
    #[arg(long, env = "COUCHCTL_COUCHDB_BIN", hide = true)]
    pub couchdb_bin: Option<PathBuf>,
}

/// `local start` output. The URL carries the admin password.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResult {
    pub instance: String,
    pub url: String,
    #[serde(flatten)]
    pub state: InstanceState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResult {
    pub instance: String,
    pub stopped: bool,
    #[serde(flatten)]
    pub state: InstanceState,
}

pub fn run(args: LocalArgs, session: &Session) -> anyhow::Result<()> {
    let settings = &session.config.local;
    match args.action {
        LocalAction::Start(start) => {
            let (config, options) = launch_plan(start, settings)?;
            let controller = LifecycleController::with_defaults(options)?;
            let started = block_on(controller.start(&config))?
                .with_context(|| format!("failed to start local instance `{}`", config.instance))?;
            let result = StartResult { instance: config.instance, url: started.url, state: started.state };
            output::print_output(session.format, &result, format_started)?;
        }
        LocalAction::Stop { instance } => {
            let instance = resolve_instance(instance, settings);
            let controller = LifecycleController::with_defaults(ControllerOptions::default())?;
            let state = block_on(controller.stop(&instance))?
                .with_context(|| format!("failed to stop local instance `{instance}`"))?;
            let result = StopResult { instance, stopped: true, state };
            output::print_output(session.format, &result, |result| {
                format!("Stopped {} ({})", result.instance, result.state.runtime_kind)
            })?;
        }
        LocalAction::Status { instance } => {
            let instance = resolve_instance(instance, settings);
            let controller = LifecycleController::with_defaults(ControllerOptions::default())?;
            let status = block_on(controller.status(&instance))?
                .with_context(|| format!("failed to read status of local instance `{instance}`"))?;
            output::print_output(session.format, &status, format_status)?;
        }
    }
    Ok(())
}

fn resolve_instance(flag: Option<String>, settings: &LocalSettings) -> String {
    flag.or_else(|| settings.instance.clone()).unwrap_or_else(|| DEFAULT_INSTANCE.to_string())
}

/// Merge flags over `[local]` config values over built-in defaults.
fn launch_plan(args: StartArgs, settings: &LocalSettings) -> anyhow::Result<(LaunchConfig, ControllerOptions)> {
    let instance = resolve_instance(args.instance, settings);
    local_config::validate_instance_name(&instance)?;

    let data_dir = match args.data_dir.or_else(|| settings.data_dir.clone()) {
        Some(dir) => dir,
        None => local_config::instance_data_dir(&instance)
            .ok_or_else(|| anyhow!("cannot determine a data directory; pass --data-dir"))?,
    };

    let runtime = match args.runtime {
        Some(kind) => Some(kind),
        None => settings
            .runtime
            .as_deref()
            .map(str::parse::<RuntimeKind>)
            .transpose()
            .context("invalid `runtime` in [local] config")?,
    };

    let admin_pass = args.admin_password.unwrap_or_else(|| {
        warn!("no --admin-password given, using the default development password");
        DEFAULT_ADMIN_PASSWORD.to_string()
    });
    let mut config = LaunchConfig::new(instance, admin_pass, data_dir);
    config.version = args.version.or_else(|| settings.version.clone()).unwrap_or_else(|| DEFAULT_VERSION.to_string());
    config.port = args.port.or(settings.port).unwrap_or(DEFAULT_PORT);
    config.admin_user =
        args.admin_user.or_else(|| settings.admin_user.clone()).unwrap_or_else(|| DEFAULT_ADMIN_USER.to_string());
    if let Some(address) = args.bind_address {
        config.bind_address = address;
    }
    config.validate()?;

    let mut launcher = LauncherOptions { binary_override: args.couchdb_bin, ..LauncherOptions::default() };
    if let Some(image) = args.image {
        launcher.image = image;
    }
    let mut options = ControllerOptions { stop_on_timeout: args.stop_on_timeout, runtime, launcher, ..Default::default() };
    if let Some(timeout) = args.timeout.or(settings.health_timeout_secs) {
        options.health_timeout_secs = timeout;
    }
    Ok((config, options))
}

fn format_started(result: &StartResult) -> String {
    let mut lines = vec![format!("Started {} ({})", result.instance, result.state.runtime_kind)];
    lines.push(format!("  url:      {}", result.url));
    lines.push(format!("  version:  {}", result.state.version));
    lines.push(format!("  data dir: {}", result.state.data_dir.display()));
    if let Some(name) = &result.state.container_name {
        lines.push(format!("  container: {name}"));
    } else if let Some(pid) = result.state.handle {
        lines.push(format!("  pid:      {pid}"));
    }
    lines.join("\n")
}

fn format_status(status: &InstanceStatus) -> String {
    let Some(state) = &status.state else {
        return format!("{}: stopped", status.instance);
    };
    let label = match status.lifecycle {
        Lifecycle::Running => "running",
        Lifecycle::Starting => "starting (not ready yet)",
        Lifecycle::Stopped => "stopped",
    };
    let mut lines = vec![format!("{}: {label}", status.instance)];
    lines.push(format!("  runtime:  {}", state.runtime_kind));
    if let Some(url) = &status.url {
        lines.push(format!("  url:      {url}"));
    }
    lines.push(format!("  version:  {}", state.version));
    lines.push(format!("  started:  {}", state.started_at.format("%Y-%m-%d %H:%M:%S UTC")));
    lines.join("\n")
}
