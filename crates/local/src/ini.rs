// Generated server configuration (ini format).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::LocalError;
use crate::fsutil::write_private_atomic;
use crate::password::HashRecord;

/// Value written for an admin in the `[admins]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCredential {
    /// The server hashes plaintext entries itself on first boot, rewriting the file.
    Plain(String),
    /// Pre-hashed; required when the server cannot rewrite the file.
    Hashed(HashRecord),
}

impl AdminCredential {
    fn render(&self) -> String {
        match self {
            Self::Plain(password) => password.clone(),
            Self::Hashed(record) => record.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listen {
    pub port: u16,
    pub bind_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    pub database_dir: Option<PathBuf>,
    pub view_index_dir: Option<PathBuf>,
    pub single_node: bool,
    pub listen: Option<Listen>,
    pub admins: Vec<(String, AdminCredential)>,
}

impl ServerConfig {
    pub fn render(&self) -> String {
        let mut out = String::from("; generated by couchctl, rewritten on every launch\n");

        if self.database_dir.is_some() || self.view_index_dir.is_some() || self.single_node {
            out.push_str("\n[couchdb]\n");
            if let Some(dir) = &self.database_dir {
                let _ = writeln!(out, "database_dir = {}", dir.display());
            }
            if let Some(dir) = &self.view_index_dir {
                let _ = writeln!(out, "view_index_dir = {}", dir.display());
            }
            if self.single_node {
                out.push_str("single_node = true\n");
            }
        }

        if let Some(listen) = &self.listen {
            out.push_str("\n[chttpd]\n");
            let _ = writeln!(out, "port = {}", listen.port);
            let _ = writeln!(out, "bind_address = {}", listen.bind_address);
        }

        if !self.admins.is_empty() {
            out.push_str("\n[admins]\n");
            for (user, credential) in &self.admins {
                let _ = writeln!(out, "{user} = {}", credential.render());
            }
        }

        out
    }

    /// Write with owner-only permissions, replacing any previous file.
    pub fn write_to(&self, path: &Path) -> Result<(), LocalError> {
        write_private_atomic(path, self.render().as_bytes())?;
        debug!(path = %path.display(), "wrote server config");
        Ok(())
    }
}
