//! User configuration, read from `config.toml`.
//!
//! ```toml
//! [author]
//! name = "Git Viewer User"
//! email = "user@gitviewer.app"
//!
//! [storage]
//! snapshot = "/path/to/store.json"
//! default_backend = "persistent"
//!
//! [log]
//! max_count = 50
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::git::Signature;
use crate::paths;
use crate::vfs::BackendKind;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Identity used for every commit.
    pub author: Signature,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Where the persistent store is snapshotted; XDG data dir when unset.
    pub snapshot: Option<PathBuf>,
    pub default_backend: BackendKind,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot: None,
            default_backend: BackendKind::Persistent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub max_count: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { max_count: 50 }
    }
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to render config: {e}")))
    }

    /// Load `path`, falling back to defaults when it does not exist.
    #[cfg(feature = "native")]
    pub async fn load(path: &std::path::Path) -> Result<Self> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        Self::from_toml(&contents).map_err(|e| e.context(path.display().to_string()))
    }

    /// Load the user's `$XDG_CONFIG_HOME/gitpane/config.toml`.
    #[cfg(feature = "native")]
    pub async fn load_default() -> Result<Self> {
        Self::load(&paths::config_file()).await
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.storage
            .snapshot
            .clone()
            .unwrap_or_else(paths::store_snapshot)
    }
}
