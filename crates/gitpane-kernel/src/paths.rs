//! XDG Base Directory paths for gitpane state.
//!
//! | Purpose | XDG Variable | Default | gitpane Path |
//! |---------|--------------|---------|--------------|
//! | Store snapshot | `$XDG_DATA_HOME` | `~/.local/share` | `$XDG_DATA_HOME/gitpane/store.json` |
//! | Config | `$XDG_CONFIG_HOME` | `~/.config` | `$XDG_CONFIG_HOME/gitpane/config.toml` |

use std::path::PathBuf;

use directories::BaseDirs;

/// Get the data directory for persistent state.
///
/// Uses `$XDG_DATA_HOME/gitpane` or falls back to `~/.local/share/gitpane`.
pub fn data_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback().join(".local").join("share"))
        .join("gitpane")
}

/// Get the config directory.
///
/// Uses `$XDG_CONFIG_HOME/gitpane` or falls back to `~/.config/gitpane`.
pub fn config_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| home_fallback().join(".config"))
        .join("gitpane")
}

pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default location of the persistent store snapshot.
pub fn store_snapshot() -> PathBuf {
    data_dir().join("store.json")
}

fn home_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_under_gitpane() {
        assert!(data_dir().ends_with("gitpane"));
        assert!(config_dir().ends_with("gitpane"));
    }

    #[test]
    fn files_live_in_their_directories() {
        assert!(config_file().starts_with(config_dir()));
        assert!(store_snapshot().starts_with(data_dir()));
        assert!(store_snapshot().ends_with("store.json"));
    }
}
