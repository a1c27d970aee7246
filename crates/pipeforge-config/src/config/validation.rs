use pipeforge_utils::error::ConfigError;

use super::{Config, MAX_RETRIES_LIMIT};

impl Config {
    /// Validate configuration values, collecting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.orchestrator.state_root.as_str().trim().is_empty() {
            errors.push("orchestrator.state_root must not be empty".to_string());
        }

        if self.retry.max_retries > MAX_RETRIES_LIMIT {
            errors.push(format!(
                "retry.max_retries exceeds maximum limit of {MAX_RETRIES_LIMIT}"
            ));
        }
        if self.retry.base_delay_ms == 0 {
            errors.push("retry.base_delay_ms must be greater than 0".to_string());
        }

        if self.parallel.max_concurrency == Some(0) {
            errors.push("parallel.max_concurrency must be greater than 0".to_string());
        }
        if self.parallel.required_tasks.iter().any(|t| t.trim().is_empty()) {
            errors.push("parallel.required_tasks must not contain blank names".to_string());
        }

        for (key, markers) in [
            ("classifier.transient_markers", &self.classifier.transient_markers),
            ("classifier.filesystem_markers", &self.classifier.filesystem_markers),
        ] {
            if markers.iter().any(|m| m.trim().is_empty()) {
                errors.push(format!("{key} must not contain blank markers"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed {
                error_count: errors.len(),
                errors,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failures(config: &Config) -> Vec<String> {
        match config.validate() {
            Err(ConfigError::ValidationFailed { errors, .. }) => errors,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_excessive_retries() {
        let mut config = Config::default();
        config.retry.max_retries = 11;
        assert!(failures(&config)[0].contains("max_retries"));
    }

    #[test]
    fn test_zero_retries_is_allowed() {
        let mut config = Config::default();
        config.retry.max_retries = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.retry.base_delay_ms = 0;
        config.parallel.max_concurrency = Some(0);
        config.classifier.transient_markers = vec!["  ".to_string()];
        config.orchestrator.state_root = "".into();

        let errors = failures(&config);
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("state_root")));
        assert!(errors.iter().any(|e| e.contains("transient_markers")));
    }
}
