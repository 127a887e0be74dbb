//! Data directory and rendezvous path resolution.
//!
//! Both executables must agree on where the daemon's socket lives without
//! any runtime negotiation. Everything is derived from a single data
//! directory, chosen in this order:
//!
//! 1. an explicit `--data-dir` (or `SHIEN_DATA_DIR`, via the CLI layer),
//! 2. `~/.config/shien`.

use std::path::{Path, PathBuf};

use crate::ConfigError;

/// Directory name under the user's config home.
const APP_DIR: &str = "shien";

/// File name of the configuration file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// File name of the control socket inside the data directory.
pub const SOCKET_FILE_NAME: &str = "shien.sock";

/// The resolved, absolute data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from an optional explicit location.
    ///
    /// `~/` is expanded against the home directory and relative paths are
    /// made absolute. The directory itself is not created here; see
    /// [`DataDir::ensure_exists`].
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let root = match explicit {
            Some(path) if !path.as_os_str().is_empty() => {
                let expanded = expand_home(path)?;
                std::path::absolute(&expanded)?
            }
            _ => default_root()?,
        };
        Ok(Self { root })
    }

    /// Use `root` as-is.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Default configuration file location.
    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// Default control socket location.
    pub fn socket_file(&self) -> PathBuf {
        self.root.join(SOCKET_FILE_NAME)
    }

    /// Create the directory (and parents) if missing.
    pub async fn ensure_exists(&self) -> Result<(), ConfigError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

fn default_root() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(".config").join(APP_DIR))
}

/// Expand a leading `~/` (or a bare `~`) to the user's home directory.
pub fn expand_home(path: &Path) -> Result<PathBuf, ConfigError> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(rest))
}
