// Launch parameters and well-known local paths.
//
// State records:   <data_local_dir>/couchctl/state/<instance>.json
// Instance data:   <data_local_dir>/couchctl/instances/<instance>/

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use url::Url;

use crate::error::LocalError;

pub const DEFAULT_INSTANCE: &str = "default";
pub const DEFAULT_VERSION: &str = "3.3.3";
pub const DEFAULT_PORT: u16 = 5984;
pub const DEFAULT_ADMIN_USER: &str = "admin";
/// Well-known development password, used when none is given.
pub const DEFAULT_ADMIN_PASSWORD: &str = "password";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
const LOOPBACK_HOST: &str = "127.0.0.1";

/// Port the server listens on inside its container.
pub const CONTAINER_PORT: u16 = 5984;
pub const CONTAINER_NAME_PREFIX: &str = "couchctl-";

/// Root directory for couchctl's local data.
pub fn base_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("couchctl"))
}

pub fn state_dir() -> Option<PathBuf> {
    base_dir().map(|dir| dir.join("state"))
}

pub fn instance_data_dir(instance: &str) -> Option<PathBuf> {
    base_dir().map(|dir| dir.join("instances").join(instance))
}

/// Reserved container name for an instance.
pub fn container_name(instance: &str) -> String {
    format!("{CONTAINER_NAME_PREFIX}{instance}")
}

/// Instance names end up in file and container names: `[A-Za-z0-9_-]`, 1–63 chars.
pub fn validate_instance_name(instance: &str) -> Result<(), LocalError> {
    let valid = !instance.is_empty()
        && instance.len() <= 63
        && instance.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(LocalError::InvalidConfig(format!(
            "instance name `{instance}` must be 1-63 characters of letters, digits, `-` or `_`"
        )))
    }
}

fn strip_brackets(address: &str) -> &str {
    let trimmed = address.trim();
    trimmed.strip_prefix('[').and_then(|inner| inner.strip_suffix(']')).unwrap_or(trimmed)
}

/// Host part of a `host:port` pair, with IPv6 literals bracketed.
pub fn socket_host(address: &str) -> String {
    let bare = strip_brackets(address);
    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("[{ip}]"),
        _ => bare.to_string(),
    }
}

/// Where to connect to a server bound to `bind_address`. Wildcard binds are reached over loopback.
pub fn dial_host(bind_address: &str) -> String {
    let bare = strip_brackets(bind_address);
    if bare.is_empty() || bare.parse::<IpAddr>().is_ok_and(|ip| ip.is_unspecified()) {
        return LOOPBACK_HOST.to_string();
    }
    socket_host(bare)
}

/// `http://user[:pass]@<host>:<port>` with userinfo percent-encoded and no trailing slash.
///
/// The host is [`dial_host`], shown as `localhost` when that is IPv4 loopback.
pub fn connection_url(user: &str, password: Option<&str>, bind_address: &str, port: u16) -> String {
    let host = match dial_host(bind_address) {
        host if host == LOOPBACK_HOST => "localhost".to_string(),
        host => host,
    };
    let base = format!("http://{host}:{port}");
    let Ok(mut url) = Url::parse(&base) else {
        return base;
    };
    let _ = url.set_username(user);
    let _ = url.set_password(password);
    url.as_str().trim_end_matches('/').to_string()
}

/// Everything needed to launch one instance. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub instance: String,
    pub version: String,
    pub port: u16,
    pub admin_user: String,
    pub admin_pass: String,
    pub data_dir: PathBuf,
    pub bind_address: String,
}

impl fmt::Debug for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchConfig")
            .field("instance", &self.instance)
            .field("version", &self.version)
            .field("port", &self.port)
            .field("admin_user", &self.admin_user)
            .field("admin_pass", &"<redacted>")
            .field("data_dir", &self.data_dir)
            .field("bind_address", &self.bind_address)
            .finish()
    }
}

impl LaunchConfig {
    /// Defaults for everything except the password and data directory.
    pub fn new(instance: impl Into<String>, admin_pass: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            instance: instance.into(),
            version: DEFAULT_VERSION.to_string(),
            port: DEFAULT_PORT,
            admin_user: DEFAULT_ADMIN_USER.to_string(),
            admin_pass: admin_pass.into(),
            data_dir: data_dir.into(),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), LocalError> {
        validate_instance_name(&self.instance)?;

        if self.port == 0 {
            return Err(LocalError::InvalidConfig("port must be non-zero".into()));
        }
        if self.version.trim().is_empty() || self.version.contains(char::is_whitespace) {
            return Err(LocalError::InvalidConfig(format!("invalid server version `{}`", self.version)));
        }
        // Admin names become ini keys.
        if self.admin_user.is_empty()
            || self.admin_user.contains(|c: char| c.is_whitespace() || "=;[]".contains(c))
        {
            return Err(LocalError::InvalidConfig(format!(
                "admin user `{}` must be non-empty without whitespace, `=`, `;`, `[` or `]`",
                self.admin_user
            )));
        }
        // Written into local.ini and the container's `-p` argument.
        if self.bind_address.trim().is_empty() || self.bind_address.contains(char::is_whitespace) {
            return Err(LocalError::InvalidConfig(format!("invalid bind address `{}`", self.bind_address)));
        }
        if self.admin_pass.is_empty() || self.admin_pass.contains(['\n', '\r']) {
            return Err(LocalError::InvalidConfig("admin password must be a non-empty single line".into()));
        }
        // The server's ini file list is space separated.
        if self.data_dir.to_string_lossy().contains(char::is_whitespace) {
            return Err(LocalError::InvalidConfig(format!(
                "data directory `{}` must not contain whitespace",
                self.data_dir.display()
            )));
        }
        Ok(())
    }

    pub fn container_name(&self) -> String {
        container_name(&self.instance)
    }

    /// Connection URL including the admin password.
    pub fn connection_url(&self) -> String {
        connection_url(&self.admin_user, Some(&self.admin_pass), &self.bind_address, self.port)
    }

    /// Host the readiness check connects to.
    pub fn dial_host(&self) -> String {
        dial_host(&self.bind_address)
    }

    /// Bind address as the server's ini expects it: IPv6 without brackets.
    pub fn listen_address(&self) -> String {
        strip_brackets(&self.bind_address).to_string()
    }
}
