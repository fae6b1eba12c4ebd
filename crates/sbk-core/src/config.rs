use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{SbkError, SbkResult};
use crate::paths::{expand_tilde, EnginePaths};
use crate::types::Job;

/// Top-level configuration (loaded from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SbkConfig {
    /// Warn if the config file is readable by other users (default: true).
    /// Job records carry passwords.
    #[serde(default = "default_true")]
    pub config_file_mode_check: bool,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
    pub jobs: Vec<Job>,
}

fn default_true() -> bool {
    true
}

impl Default for SbkConfig {
    fn default() -> Self {
        Self {
            config_file_mode_check: true,
            logging: LoggingConfig::default(),
            paths: PathsConfig::default(),
            jobs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Override for the verifier blob location
    pub keycheck_file: Option<PathBuf>,
    /// Override for the staging directory
    pub temp_dir: Option<PathBuf>,
}

impl SbkConfig {
    /// Load the config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> SbkResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| SbkError::resource(format!("reading config {}", path.display()), e))?;
        toml::from_str(&content)
            .map_err(|e| SbkError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Warn if `path` is readable by other users, unless
    /// `config_file_mode_check` is off. Call after logging is set up.
    pub fn check_file_mode(&self, path: &Path) {
        if self.config_file_mode_check && path.exists() {
            warn_if_world_readable(path);
        }
    }

    /// Write the config atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> SbkResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SbkError::resource(format!("creating {}", parent.display()), e))?;
        }
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| SbkError::Config(format!("serializing config: {e}")))?;

        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, rendered)
            .map_err(|e| SbkError::resource(format!("writing {}", tmp_path.display()), e))?;
        restrict_to_owner(&tmp_path)?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| SbkError::resource(format!("renaming to {}", path.display()), e))?;
        Ok(())
    }

    /// Engine paths rooted at `state_dir`, with per-file overrides applied.
    pub fn engine_paths(&self, state_dir: &Path) -> EnginePaths {
        let mut paths = EnginePaths::under(expand_tilde(state_dir));
        if let Some(p) = &self.paths.keycheck_file {
            paths.keycheck_file = expand_tilde(p);
        }
        if let Some(p) = &self.paths.temp_dir {
            paths.temp_dir = expand_tilde(p);
        }
        paths
    }

    pub fn find_job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Insert `job`, replacing any existing job with the same name.
    /// Returns true if an existing job was replaced.
    pub fn upsert_job(&mut self, job: Job) -> bool {
        match self.jobs.iter_mut().find(|j| j.name == job.name) {
            Some(existing) => {
                *existing = job;
                true
            }
            None => {
                self.jobs.push(job);
                false
            }
        }
    }

    /// Remove a job by name. Returns true if it existed.
    pub fn remove_job(&mut self, name: &str) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|j| j.name != name);
        self.jobs.len() != before
    }
}

#[cfg(unix)]
fn warn_if_world_readable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mode = meta.permissions().mode();
        if mode & 0o044 != 0 {
            warn!(
                path = %path.display(),
                mode = %format!("{:o}", mode & 0o777),
                "config file is readable by other users and may contain job passwords"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_world_readable(_path: &Path) {}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> SbkResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| SbkError::resource(format!("restricting {}", path.display()), e))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> SbkResult<()> {
    Ok(())
}
