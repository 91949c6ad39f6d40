// User configuration at `~/.config/couchctl/config.toml`.
//
// Precedence for every setting: flag > environment > this file > built-in default.
// Passwords are never read from here.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_URL: &str = "http://127.0.0.1:5984";

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("couchctl").join("config.toml"))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    /// Server URL used when `--url`/`COUCHCTL_URL` are absent.
    pub url: Option<String>,
    pub user: Option<String>,
    pub local: LocalSettings,
}

/// Defaults for `couchctl local start`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalSettings {
    pub instance: Option<String>,
    pub version: Option<String>,
    pub port: Option<u16>,
    pub admin_user: Option<String>,
    /// Runtime name or alias (`podman`, `docker`, `nix`, `binary`).
    pub runtime: Option<String>,
    pub health_timeout_secs: Option<u64>,
    pub data_dir: Option<PathBuf>,
}

impl CliConfig {
    /// Load from `path`, or the default location. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(error) => {
                return Err(error).with_context(|| format!("failed to read config `{}`", path.display()))
            }
        };
        toml::from_str(&raw).with_context(|| format!("failed to parse config `{}`", path.display()))
    }

    pub fn resolve_url(&self, flag_or_env: Option<&str>) -> String {
        flag_or_env.map(str::to_string).or_else(|| self.url.clone()).unwrap_or_else(|| DEFAULT_URL.to_string())
    }

    pub fn resolve_user(&self, flag_or_env: Option<&str>) -> Option<String> {
        flag_or_env.map(str::to_string).or_else(|| self.user.clone())
    }
}
