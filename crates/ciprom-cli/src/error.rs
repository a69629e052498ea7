//! CLI error types.

use thiserror::Error;

use ciprom_backend::BackendError;
use ciprom_engine::{FetchError, QueryError};

/// CLI-specific errors.
///
/// Only configuration, setup and output failures surface here; per-run and
/// per-metric failures are reported in the collection summary instead.
#[derive(Debug, Error)]
pub enum CliError {
    /// The configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The configuration parsed but has invalid values.
    #[error("invalid configuration: {}", problems.join("; "))]
    InvalidConfig {
        /// Every problem found.
        problems: Vec<String>,
    },

    /// The artifact store client could not be set up.
    #[error("artifact store error: {0}")]
    Fetch(#[from] FetchError),

    /// The query executor could not be set up.
    #[error("query setup error: {0}")]
    Query(#[from] QueryError),

    /// The query backend is unavailable.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Output formatting error.
    #[error("format error: {0}")]
    Format(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_error_display_config() {
        let err = CliError::Config("invalid TOML: expected `=`".into());
        assert_eq!(err.to_string(), "configuration error: invalid TOML: expected `=`");
    }

    #[test]
    fn cli_error_display_lists_all_problems() {
        let err = CliError::InvalidConfig {
            problems: vec![
                "test_ids: at least one test id is required".into(),
                "backend.port must be greater than 0".into(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration: test_ids: at least one test id is required; \
             backend.port must be greater than 0"
        );
    }

    #[test]
    fn cli_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let cli_err = CliError::from(io_err);
        assert!(matches!(cli_err, CliError::Io(_)));
    }

    #[test]
    fn cli_error_from_backend_error() {
        let err = CliError::from(BackendError::ConnectionFailed("no socket".into()));
        assert_eq!(
            err.to_string(),
            "backend error: failed to connect to container runtime: no socket"
        );
    }
}
