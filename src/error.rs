//! Crate-level error type for configuration loading
//!
//! Scheduling operations return [`SchedulerError`], which callers branch on
//! through [`SchedulerError::kind`].

use thiserror::Error;

pub use crate::scheduler::error::{ErrorKind, SchedulerError};

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// Failure with context and the underlying cause
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

/// Result type alias using the crate Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_config_error() {
        let err = Error::config("quota_limit must be greater than 0");
        assert_eq!(err.to_string(), "Config error: quota_limit must be greater than 0");
    }

    #[test]
    fn test_with_source_keeps_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = Error::with_source("Failed to read config file: clipcast.toml", io);
        assert_eq!(err.to_string(), "Failed to read config file: clipcast.toml");
        assert_eq!(err.source().map(|e| e.to_string()).as_deref(), Some("missing"));
    }
}
