//! `~/.roster/config.yaml`: identity and storage locations.
//!
//! # Storage layout
//!
//! ```text
//! ~/.roster/
//!   config.yaml   (mode 0600)
//!   local/        (default local store directory)
//!   remote/       (default directory-backed remote store)
//! ```
//!
//! Follows the `fn_at(home, …)` / `fn(…)` pairing: tests always pass an
//! explicit home, the no-arg wrappers resolve `dirs::home_dir()`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::ParentId;

/// Persisted configuration for the CLI and daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterConfig {
    /// Parent identity used when a command does not pass `--parent`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ParentId>,
    /// Email attached to new records and used for consolidation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_email: Option<String>,
    /// Directory for the local key-value store.
    pub local_dir: PathBuf,
    /// Root of the directory-backed remote store.
    pub remote_dir: PathBuf,
    /// Parents the daemon keeps a live listener for.
    #[serde(default)]
    pub watch_parents: Vec<ParentId>,
}

impl RosterConfig {
    /// Defaults rooted under `<home>/.roster/`.
    pub fn default_at(home: &Path) -> Self {
        let root = roster_root(home);
        Self {
            parent_id: None,
            parent_email: None,
            local_dir: root.join("local"),
            remote_dir: root.join("remote"),
            watch_parents: Vec::new(),
        }
    }
}

/// `<home>/.roster`
pub fn roster_root(home: &Path) -> PathBuf {
    home.join(".roster")
}

/// `<home>/.roster/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    roster_root(home).join("config.yaml")
}

/// Load the config, or defaults if the file does not exist yet.
///
/// Returns `ConfigError::Parse` (with path) if the YAML is malformed.
pub fn load_at(home: &Path) -> Result<RosterConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(RosterConfig::default_at(home));
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<RosterConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically save the config: `.yaml.tmp` sibling, `chmod 0600`, `rename`.
pub fn save_at(home: &Path, config: &RosterConfig) -> Result<(), ConfigError> {
    let root = roster_root(home);
    if !root.exists() {
        std::fs::create_dir_all(&root)?;
        set_dir_permissions(&root)?;
    }
    let path = config_path_at(home);
    let tmp = path.with_file_name("config.yaml.tmp");
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp, yaml)?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &RosterConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

/// Resolve the user's home directory.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
