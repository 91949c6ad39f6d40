// Owner-only file helpers for state records and generated server config.
//
// Both contain credentials or credential-derived material, so files are 0600
// and their directories 0700 on unix.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::LocalError;

pub fn create_private_dir_all(path: &Path) -> Result<(), LocalError> {
    fs::create_dir_all(path).map_err(|error| {
        LocalError::io(format!("failed to create directory `{}`", path.display()), error)
    })?;
    ensure_owner_only_dir(path)
}

/// Create `path` owner-only when it is missing. An existing directory keeps its permissions.
pub fn create_private_dir_if_missing(path: &Path) -> Result<(), LocalError> {
    if path.is_dir() {
        return Ok(());
    }
    create_private_dir_all(path)
}

pub fn ensure_owner_only_dir(path: &Path) -> Result<(), LocalError> {
    set_mode(path, 0o700)
}

pub fn ensure_owner_only_file(path: &Path) -> Result<(), LocalError> {
    set_mode(path, 0o600)
}

/// Write `contents` to a sibling temp file and rename it over `path`.
pub fn write_private_atomic(path: &Path, contents: &[u8]) -> Result<(), LocalError> {
    if let Some(parent) = path.parent() {
        create_private_dir_all(parent)?;
    }

    let file_name = path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let mut file = open_private_truncate(&tmp_path).map_err(|error| {
        LocalError::io(format!("failed to open `{}`", tmp_path.display()), error)
    })?;
    file.write_all(contents)
        .and_then(|_| file.sync_data())
        .map_err(|error| LocalError::io(format!("failed to write `{}`", tmp_path.display()), error))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|error| {
        LocalError::io(
            format!("failed to move `{}` to `{}`", tmp_path.display(), path.display()),
            error,
        )
    })?;
    ensure_owner_only_file(path)
}

pub fn open_private_append(path: &Path) -> std::io::Result<fs::File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;

        OpenOptions::new().create(true).append(true).mode(0o600).open(path)
    }
    #[cfg(not(unix))]
    {
        OpenOptions::new().create(true).append(true).open(path)
    }
}

fn open_private_truncate(path: &Path) -> std::io::Result<fs::File> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;

        OpenOptions::new().create(true).write(true).truncate(true).mode(0o600).open(path)
    }
    #[cfg(not(unix))]
    {
        OpenOptions::new().create(true).write(true).truncate(true).open(path)
    }
}

fn set_mode(path: &Path, mode: u32) -> Result<(), LocalError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if !path.exists() {
            return Ok(());
        }

        let metadata = fs::metadata(path).map_err(|error| {
            LocalError::io(format!("failed to read metadata for `{}`", path.display()), error)
        })?;
        if metadata.permissions().mode() & 0o777 != mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|error| {
                LocalError::io(format!("failed to restrict permissions on `{}`", path.display()), error)
            })?;
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }

    Ok(())
}
