//! Locations of the engine's persisted state.
//!
//! Nothing here is global: callers build an [`EnginePaths`] and hand it to
//! the engine, so tests can point everything at a throwaway directory.

use std::path::{Path, PathBuf};

/// Application directory name under the platform config root.
pub const APP_NAME: &str = "SecureBackup";

/// File name of the password verifier blob inside the state directory.
pub const KEYCHECK_FILE: &str = "keycheck.bin";

/// File name of the TOML config inside the state directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Staging subdirectory for transient `.tar.lz4` payloads.
pub const TEMP_DIR: &str = "temp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePaths {
    /// Application-private root (config, keycheck, temp staging)
    pub state_dir: PathBuf,
    /// Verifier blob location
    pub keycheck_file: PathBuf,
    /// Staging directory; contents are safe to delete between runs
    pub temp_dir: PathBuf,
}

impl EnginePaths {
    /// Standard layout rooted at `state_dir`.
    pub fn under(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        Self {
            keycheck_file: state_dir.join(KEYCHECK_FILE),
            temp_dir: state_dir.join(TEMP_DIR),
            state_dir,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir.join(CONFIG_FILE)
    }
}

impl Default for EnginePaths {
    fn default() -> Self {
        Self::under(default_state_dir())
    }
}

/// `%APPDATA%\SecureBackup` on Windows, `~/.config/SecureBackup` elsewhere.
pub fn default_state_dir() -> PathBuf {
    let root = std::env::var_os("APPDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde(Path::new("~/.config")));
    root.join(APP_NAME)
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
