use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default directory holding per-run state, relative to the project.
pub const DEFAULT_STATE_ROOT: &str = ".pipeforge/runs";

/// Default per-phase timeout in seconds.
pub const DEFAULT_PHASE_TIMEOUT_SECS: u64 = 600;

/// Phase timeouts below this are raised to it.
pub const MIN_PHASE_TIMEOUT_SECS: u64 = 1;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Upper bound accepted by validation for `[retry] max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Generation sub-tasks whose failure fails the whole phase.
pub const DEFAULT_REQUIRED_TASKS: [&str; 3] = ["orchestrator", "reviewer", "tester"];

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Defaults,
    File(Utf8PathBuf),
    Programmatic,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Defaults => write!(f, "defaults"),
            Self::File(path) => write!(f, "file:{path}"),
            Self::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// Effective configuration for one orchestrator.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub retry: RetryConfig,
    pub parallel: ParallelConfig,
    pub classifier: ClassifierConfig,
    #[serde(skip)]
    pub source: ConfigSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Run directories are created under this root.
    pub state_root: Utf8PathBuf,
    pub phase_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            state_root: Utf8PathBuf::from(DEFAULT_STATE_ROOT),
            phase_timeout_secs: DEFAULT_PHASE_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the original failure.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each subsequent one.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParallelConfig {
    pub required_tasks: Vec<String>,
    /// Fail the phase once more than this many tasks failed.
    pub max_failed_tasks: Option<usize>,
    /// Cap on concurrently running tasks. Unbounded when absent.
    pub max_concurrency: Option<usize>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            required_tasks: DEFAULT_REQUIRED_TASKS.iter().map(|s| (*s).to_string()).collect(),
            max_failed_tasks: None,
            max_concurrency: None,
        }
    }
}

/// Extra message markers, appended to the built-in ones.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    pub transient_markers: Vec<String>,
    pub filesystem_markers: Vec<String>,
}

impl Config {
    /// Phase timeout, never below [`MIN_PHASE_TIMEOUT_SECS`].
    #[must_use]
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.orchestrator.phase_timeout_secs.max(MIN_PHASE_TIMEOUT_SECS))
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.retry.base_delay_ms)
    }

    /// Parse TOML text and validate the result.
    pub fn from_toml_str(content: &str) -> Result<Self, pipeforge_utils::error::ConfigError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| pipeforge_utils::error::ConfigError::InvalidFile(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
