//! Engine configuration.
//!
//! Values come from code (`EngineConfig::default()` plus the `with_*`
//! helpers) or from a TOML file whose keys mirror the struct fields:
//!
//! ```toml
//! max_parallel_tasks = 4
//! max_retries = 2
//! base_delay_ms = 250
//! max_delay_ms = 5000
//! task_timeout_ms = 60000
//! setup_task = "setup"
//! ```

use crate::{ConfigError, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on tasks running at once within a level.
    pub max_parallel_tasks: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-attempt timeout; a timed out attempt counts as a retryable failure.
    pub task_timeout_ms: Option<u64>,
    /// Build and level the graph only, never invoking a handler.
    pub dry_run: bool,
    pub setup_task: Option<String>,
    /// Write `execution_report.json` into the output directory at run end.
    pub save_report: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 5,
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            task_timeout_ms: None,
            dry_run: false,
            setup_task: None,
            save_report: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_tasks == 0 {
            return Err(ConfigError::Invalid(
                "max_parallel_tasks must be at least 1".to_string(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "max_delay_ms ({}) is below base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if self.task_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "task_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_parallel_tasks(mut self, max: usize) -> Self {
        self.max_parallel_tasks = max;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay_ms = crate::retry::duration_ms(base_delay);
        self.max_delay_ms = self.max_delay_ms.max(self.base_delay_ms);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = Some(crate::retry::duration_ms(timeout));
        self
    }

    pub fn with_setup_task(mut self, id: impl Into<String>) -> Self {
        self.setup_task = Some(id.into());
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_save_report(mut self, save_report: bool) -> Self {
        self.save_report = save_report;
        self
    }

    /// The retry policy applied to tasks that carry none of their own.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: Some(self.max_delay_ms),
        }
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }
}

/// Reads and validates a TOML configuration file.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    EngineConfig::from_toml_str(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = EngineConfig::from_toml_str("max_parallel_tasks = 2\nsetup_task = \"setup\"\n").unwrap();
        assert_eq!(config.max_parallel_tasks, 2);
        assert_eq!(config.setup_task.as_deref(), Some("setup"));
        assert_eq!(config.max_retries, 3);
        assert!(config.save_report);
        assert!(!config.dry_run);
    }

    #[test]
    fn rejects_zero_parallelism() {
        let err = EngineConfig::from_toml_str("max_parallel_tasks = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let err = EngineConfig::from_toml_str("base_delay_ms = 500\nmax_delay_ms = 100").unwrap_err();
        assert!(err.to_string().contains("max_delay_ms (100)"));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = EngineConfig::from_toml_str("max_retries = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dagflow.toml");
        std::fs::write(&path, "max_retries = 0\ntask_timeout_ms = 250\ndry_run = true\n").unwrap();

        let config = load_from_path(&path).unwrap();
        assert_eq!(config.retry_policy().max_attempts(), 1);
        assert_eq!(config.task_timeout(), Some(Duration::from_millis(250)));
        assert!(config.dry_run);
        assert!(matches!(load_from_path(dir.path().join("missing.toml")), Err(ConfigError::Io(_))));
    }

    #[test]
    fn builder_keeps_backoff_bounds_consistent() {
        let config = EngineConfig::default().with_retries(2, Duration::from_secs(60));
        assert_eq!(config.max_delay_ms, 60_000);
        assert!(config.validate().is_ok());
    }
}
