//! Configuration for the jobwatch backend.
//!
//! Loaded from a TOML file; every section and key is optional:
//!
//! ```toml
//! [scheduler]
//! user = "alice"
//! command_timeout_secs = 30
//!
//! [submission_log]
//! path = ".schedule-log"
//!
//! [engine]
//! bootstrap_lookback_days = 365
//! refresh_interval_secs = 10
//!
//! [listing]
//! classified_only = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{JobwatchError, JobwatchResult};
use crate::sources::live::DEFAULT_QUEUE_FORMAT;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobwatchConfig {
    pub scheduler: SchedulerConfig,
    pub submission_log: SubmissionLogConfig,
    pub engine: EngineConfig,
    pub listing: ListingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Whose jobs to observe. Falls back to `$USER` when unset.
    pub user: Option<String>,
    pub squeue: String,
    pub sacct: String,
    pub scontrol: String,
    pub squeue_format: String,
    /// Deadline for a single tool invocation. Expiry counts as the source
    /// being unavailable for that cycle.
    pub command_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            user: None,
            squeue: "squeue".to_string(),
            sacct: "sacct".to_string(),
            scontrol: "scontrol".to_string(),
            squeue_format: DEFAULT_QUEUE_FORMAT.to_string(),
            command_timeout_secs: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn resolved_user(&self) -> JobwatchResult<String> {
        match &self.user {
            Some(user) => Ok(user.clone()),
            None => std::env::var("USER").map_err(|_| {
                JobwatchError::Config("scheduler.user is not set and $USER is empty".to_string())
            }),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionLogConfig {
    pub path: PathBuf,
}

impl Default for SubmissionLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".schedule-log"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How far back the submission log is replayed at startup.
    pub bootstrap_lookback_days: i64,
    pub refresh_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bootstrap_lookback_days: 365,
            refresh_interval_secs: 10,
        }
    }
}

impl EngineConfig {
    pub fn bootstrap_lookback(&self) -> chrono::Duration {
        chrono::Duration::days(self.bootstrap_lookback_days.max(0))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Only list jobs whose name follows a pipeline naming convention.
    pub classified_only: bool,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            classified_only: true,
        }
    }
}

impl JobwatchConfig {
    pub fn from_toml_str(data: &str) -> JobwatchResult<Self> {
        Ok(toml::from_str(data)?)
    }

    pub fn load(path: impl AsRef<Path>) -> JobwatchResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            JobwatchError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config = JobwatchConfig::from_toml_str("").unwrap();
        assert_eq!(config, JobwatchConfig::default());
        assert_eq!(config.submission_log.path, PathBuf::from(".schedule-log"));
        assert_eq!(config.engine.bootstrap_lookback(), chrono::Duration::days(365));
        assert!(config.listing.classified_only);
    }

    #[test]
    fn test_partial_sections_override() {
        let config = JobwatchConfig::from_toml_str(
            r#"
            [scheduler]
            user = "alice"
            command_timeout_secs = 5

            [engine]
            refresh_interval_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.resolved_user().unwrap(), "alice");
        assert_eq!(config.scheduler.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.scheduler.sacct, "sacct");
        assert_eq!(config.engine.refresh_interval(), Duration::from_secs(30));
        assert_eq!(config.engine.bootstrap_lookback_days, 365);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = JobwatchConfig::from_toml_str("[engine]\nrefresh_interval_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, JobwatchError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobwatch.toml");
        std::fs::write(&path, "[submission_log]\npath = \"/var/log/submissions\"\n").unwrap();
        let config = JobwatchConfig::load(&path).unwrap();
        assert_eq!(config.submission_log.path, PathBuf::from("/var/log/submissions"));
        assert!(JobwatchConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
