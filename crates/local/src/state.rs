// Persisted record of a launched instance, keyed by instance name.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{LaunchConfig, DEFAULT_BIND_ADDRESS};
use crate::error::LocalError;
use crate::fsutil::write_private_atomic;
use crate::launcher::LaunchHandle;
use crate::runtime::RuntimeKind;

/// What `status`/`stop` need to find a running instance again. Holds no secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceState {
    pub runtime_kind: RuntimeKind,
    /// Host process id; `None` when a container engine could not report one.
    pub handle: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    pub version: String,
    pub port: u16,
    pub admin_user: String,
    /// Address the server listens on; records written before it was tracked mean loopback.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub started_at: DateTime<Utc>,
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

impl InstanceState {
    pub fn from_launch(kind: RuntimeKind, handle: LaunchHandle, config: &LaunchConfig) -> Self {
        Self {
            runtime_kind: kind,
            handle: handle.pid,
            container_name: handle.container_name,
            version: config.version.clone(),
            port: config.port,
            admin_user: config.admin_user.clone(),
            bind_address: config.bind_address.clone(),
            data_dir: config.data_dir.clone(),
            started_at: Utc::now(),
        }
    }
}

pub trait StateStore: Send + Sync {
    fn write(&self, instance: &str, state: &InstanceState) -> Result<(), LocalError>;

    /// `None` for a missing or unreadable record; corruption is not an error.
    fn read(&self, instance: &str) -> Option<InstanceState>;

    /// Removing an absent record succeeds.
    fn clear(&self, instance: &str) -> Result<(), LocalError>;
}

impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    fn write(&self, instance: &str, state: &InstanceState) -> Result<(), LocalError> {
        (**self).write(instance, state)
    }

    fn read(&self, instance: &str) -> Option<InstanceState> {
        (**self).read(instance)
    }

    fn clear(&self, instance: &str) -> Result<(), LocalError> {
        (**self).clear(instance)
    }
}

/// One JSON file per instance under a directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under `<data_local_dir>/couchctl/state`.
    pub fn default_location() -> Result<Self, LocalError> {
        crate::config::state_dir().map(Self::new).ok_or_else(|| {
            LocalError::io(
                "could not determine the local data directory",
                std::io::Error::new(ErrorKind::NotFound, "no data_local_dir for this user"),
            )
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, instance: &str) -> PathBuf {
        self.dir.join(format!("{instance}.json"))
    }
}

impl StateStore for FileStateStore {
    fn write(&self, instance: &str, state: &InstanceState) -> Result<(), LocalError> {
        let path = self.path_for(instance);
        let contents = serde_json::to_vec_pretty(state)?;
        write_private_atomic(&path, &contents)?;
        debug!(instance, path = %path.display(), "wrote instance state");
        Ok(())
    }

    fn read(&self, instance: &str) -> Option<InstanceState> {
        let path = self.path_for(instance);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(instance, path = %path.display(), %error, "failed to read instance state");
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(state) => Some(state),
            Err(error) => {
                warn!(instance, path = %path.display(), %error, "ignoring corrupt instance state");
                None
            }
        }
    }

    fn clear(&self, instance: &str) -> Result<(), LocalError> {
        let path = self.path_for(instance);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(instance, path = %path.display(), "cleared instance state");
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(LocalError::io(format!("failed to remove `{}`", path.display()), error)),
        }
    }
}

/// In-memory store for tests and embedders that manage persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<String, InstanceState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }
}

impl StateStore for MemoryStateStore {
    fn write(&self, instance: &str, state: &InstanceState) -> Result<(), LocalError> {
        if let Ok(mut records) = self.records.lock() {
            records.insert(instance.to_string(), state.clone());
        }
        Ok(())
    }

    fn read(&self, instance: &str) -> Option<InstanceState> {
        self.records.lock().ok()?.get(instance).cloned()
    }

    fn clear(&self, instance: &str) -> Result<(), LocalError> {
        if let Ok(mut records) = self.records.lock() {
            records.remove(instance);
        }
        Ok(())
    }
}
