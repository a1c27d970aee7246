use camino::{Utf8Path, Utf8PathBuf};
use std::path::Path;

use pipeforge_utils::error::ConfigError;

use super::{Config, ConfigSource};

/// Directory searched for in each ancestor.
pub const CONFIG_DIR: &str = ".pipeforge";
pub const CONFIG_FILE: &str = "config.toml";

impl Config {
    /// Discover configuration starting from the current directory.
    pub fn discover() -> Result<Self, ConfigError> {
        let start_dir = std::env::current_dir().map_err(|e| {
            ConfigError::InvalidFile(format!("Failed to get current directory: {e}"))
        })?;
        Self::discover_from(&start_dir)
    }

    /// Discover configuration starting from `start_dir`.
    ///
    /// Falls back to built-in defaults when no file is found.
    pub fn discover_from(start_dir: &Path) -> Result<Self, ConfigError> {
        match Self::discover_config_file_from(start_dir) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load an explicit configuration file. A missing file is an error here.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound {
                    path: path.to_string(),
                });
            }
            Err(e) => {
                return Err(ConfigError::InvalidFile(format!(
                    "Failed to read config file {path}: {e}"
                )));
            }
        };

        let mut config = Self::from_toml_str(&content)?;
        config.source = ConfigSource::File(path.to_path_buf());
        Ok(config)
    }

    /// Walk up from `start_dir` looking for `.pipeforge/config.toml`, stopping
    /// at a repository root (`.git`, `.hg`, `.svn`) or the filesystem root.
    #[must_use]
    pub fn discover_config_file_from(start_dir: &Path) -> Option<Utf8PathBuf> {
        let mut current = Some(start_dir);

        while let Some(dir) = current {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILE);
            if candidate.is_file() {
                return Utf8PathBuf::from_path_buf(candidate).ok();
            }

            if [".git", ".hg", ".svn"].iter().any(|m| dir.join(m).exists()) {
                break;
            }
            current = dir.parent();
        }

        None
    }
}
