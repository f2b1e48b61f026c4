//! Credential material written to disk before the pipeline runs

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

pub const DOCKER_HOME: &str = "/root/.docker";
pub const AUTH_CONFIG_FILE: &str = "config.json";

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Writes a docker `config.json` into `docker_home` (mode 0600).
pub fn write_auth_config(docker_home: &Path, document: &str) -> Result<PathBuf> {
    fs::create_dir_all(docker_home)?;
    let path = docker_home.join(AUTH_CONFIG_FILE);
    fs::write(&path, document)?;
    set_mode(&path, 0o600)?;
    tracing::debug!("Wrote auth config to {}", path.display());
    Ok(path)
}

/// Writes the SSH agent key to `<home>/.ssh/id_rsa` and returns the
/// `default=<path>` value for the build's `--ssh` flag.
pub fn write_ssh_key(home: &Path, key: &str) -> Result<String> {
    let ssh_dir = home.join(".ssh");
    fs::create_dir_all(&ssh_dir)?;
    set_mode(&ssh_dir, 0o700)?;

    let path = ssh_dir.join("id_rsa");
    if path.exists() {
        // A previous run may have left a read-only key behind
        set_mode(&path, 0o600)?;
    }
    fs::write(&path, key)?;
    set_mode(&path, 0o400)?;

    Ok(format!("default={}", path.display()))
}

/// Home directory used for the SSH key, falling back to `/root`.
pub fn ssh_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"))
}
