// CLI subcommand dispatch and shared plumbing.

use std::future::Future;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value;

use crate::client::CouchClient;
use crate::config::CliConfig;
use crate::output::OutputFormat;

pub mod cluster;
pub mod db;
pub mod doc;
pub mod info;
pub mod local;
pub mod query;
pub mod replicate;

/// Options accepted by every subcommand.
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Server URL (may embed credentials)
    #[arg(long, global = true, env = "COUCHCTL_URL")]
    pub url: Option<String>,
    /// User for basic authentication
    #[arg(long, global = true, env = "COUCHCTL_USER")]
    pub user: Option<String>,
    /// Password for basic authentication
    #[arg(long, global = true, env = "COUCHCTL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Config file (defaults to ~/.config/couchctl/config.toml)
    #[arg(long, global = true, env = "COUCHCTL_CONFIG")]
    pub config: Option<PathBuf>,
    /// Force JSON output.
    #[arg(long, global = true)]
    pub json: bool,
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show server version and readiness
    Info(info::InfoArgs),
    /// Manage databases
    Db(db::DbArgs),
    /// Read and write documents
    Doc(doc::DocArgs),
    /// Query views, Mango indexes and search indexes
    Query(query::QueryArgs),
    /// Run and manage replications
    Replicate(replicate::ReplicateArgs),
    /// Inspect cluster membership and node statistics
    Cluster(cluster::ClusterArgs),
    /// Start, stop and inspect a local server
    Local(local::LocalArgs),
}

/// Resolved per-invocation settings handed to every command.
pub struct Session {
    pub format: OutputFormat,
    pub config: CliConfig,
    url: String,
    user: Option<String>,
    password: Option<String>,
}

impl Session {
    pub fn new(global: &GlobalArgs, format: OutputFormat) -> Result<Self> {
        let config = CliConfig::load(global.config.as_deref())?;
        Ok(Self {
            format,
            url: config.resolve_url(global.url.as_deref()),
            user: config.resolve_user(global.user.as_deref()),
            password: global.password.clone(),
            config,
        })
    }

    pub fn client(&self) -> Result<CouchClient> {
        CouchClient::new(&self.url, self.user.clone(), self.password.clone())
    }
}

pub fn run(cmd: Command, global: &GlobalArgs, format: OutputFormat) -> Result<()> {
    let session = Session::new(global, format)?;
    match cmd {
        Command::Info(args) => info::run(args, &session),
        Command::Db(args) => db::run(args, &session),
        Command::Doc(args) => doc::run(args, &session),
        Command::Query(args) => query::run(args, &session),
        Command::Replicate(args) => replicate::run(args, &session),
        Command::Cluster(args) => cluster::run(args, &session),
        Command::Local(args) => local::run(args, &session),
    }
}

/// Drive one command's future on a single-threaded runtime.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    Ok(runtime.block_on(future))
}

/// JSON from an argument: inline text, `@path` for a file, or `-` for stdin.
pub fn read_json_arg(arg: &str) -> Result<Value> {
    let raw = if arg == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("failed to read JSON from stdin")?;
        buf
    } else if let Some(path) = arg.strip_prefix('@') {
        std::fs::read_to_string(path).with_context(|| format!("failed to read `{path}`"))?
    } else {
        arg.to_string()
    };
    serde_json::from_str(&raw).context("input is not valid JSON")
}

/// Validate a JSON-valued query parameter (`key`, `startkey`, …) and keep its text.
pub fn json_param(name: &str, raw: &str) -> Result<String> {
    let value: Value = serde_json::from_str(raw).with_context(|| format!("--{name} must be JSON, e.g. '\"abc\"' or '[1,2]'"))?;
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn read_json_arg_accepts_inline_and_files() {
        assert_eq!(read_json_arg(r#"{"a":1}"#).unwrap()["a"], 1);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, r#"{"type":"user"}"#).unwrap();
        assert_eq!(read_json_arg(&format!("@{}", path.display())).unwrap()["type"], "user");

        assert!(read_json_arg("{not json").is_err());
        assert!(read_json_arg("@/nonexistent/doc.json").is_err());
    }

    #[test]
    fn json_params_are_normalized() {
        assert_eq!(json_param("key", r#" "abc" "#).unwrap(), r#""abc""#);
        assert_eq!(json_param("startkey", "[1, 2]").unwrap(), "[1,2]");
        assert!(json_param("key", "abc").is_err());
    }

    #[test]
    fn block_on_runs_future_to_completion() {
        assert_eq!(block_on(async { 40 + 2 }).unwrap(), 42);
    }
}
