//! Error taxonomy shared by the sources, the engine and the configuration layer.
//!
//! Lookup misses are not errors: they surface as `Option::None`.

use thiserror::Error;

pub type JobwatchResult<T> = Result<T, JobwatchError>;

#[derive(Debug, Error)]
pub enum JobwatchError {
    /// Input from a source that cannot be interpreted. Never guessed around.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The external tool is missing, exited non-zero or timed out.
    /// Transient: the cycle skips this source and keeps prior data.
    #[error("Source '{source_name}' unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl JobwatchError {
    pub fn parse(msg: impl Into<String>) -> Self {
        JobwatchError::Parse(msg.into())
    }

    pub fn unavailable(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        JobwatchError::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, JobwatchError::SourceUnavailable { .. })
    }
}

impl From<std::io::Error> for JobwatchError {
    fn from(e: std::io::Error) -> Self {
        JobwatchError::Io(e.to_string())
    }
}

impl From<toml::de::Error> for JobwatchError {
    fn from(e: toml::de::Error) -> Self {
        JobwatchError::Config(e.to_string())
    }
}
