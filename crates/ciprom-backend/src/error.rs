//! Query backend error types and the instance handle.

use std::fmt;

use thiserror::Error;

/// Query backend errors.
///
/// Any of these is fatal to the query phase of the run that triggered it.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Failed to connect to the container runtime.
    #[error("failed to connect to container runtime: {0}")]
    ConnectionFailed(String),

    /// Backend image could not be found or pulled.
    #[error("image not available: {image}: {reason}")]
    ImageUnavailable {
        /// Image reference.
        image: String,
        /// Failure reason.
        reason: String,
    },

    /// Instance creation failed.
    #[error("instance creation failed: {0}")]
    CreateFailed(String),

    /// Instance start failed.
    #[error("instance start failed: {handle}: {reason}")]
    StartFailed {
        /// Instance handle.
        handle: String,
        /// Failure reason.
        reason: String,
    },

    /// Instance stop failed.
    #[error("instance stop failed: {handle}: {reason}")]
    StopFailed {
        /// Instance handle.
        handle: String,
        /// Failure reason.
        reason: String,
    },

    /// Instance not found.
    #[error("instance not found: {handle}")]
    NotFound {
        /// Instance handle.
        handle: String,
    },

    /// Invalid configuration or arguments.
    #[error("invalid backend configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Handle identifying one running query backend instance.
///
/// Carries the loopback port the instance serves on so callers can derive
/// the query endpoint without asking the backend again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendHandle {
    id: String,
    port: u16,
}

impl BackendHandle {
    /// Create a handle from an instance ID and the port it is bound to.
    ///
    /// # Errors
    ///
    /// Returns error if the ID is empty or contains invalid characters,
    /// or if the port is zero.
    pub fn new(id: impl Into<String>, port: u16) -> BackendResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(BackendError::InvalidConfig(
                "instance ID cannot be empty".to_string(),
            ));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(BackendError::InvalidConfig(format!(
                "invalid instance ID: {id}"
            )));
        }
        if port == 0 {
            return Err(BackendError::InvalidConfig(
                "instance port cannot be 0".to_string(),
            ));
        }
        Ok(Self { id, port })
    }

    /// Get the full instance ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the short form (first 12 chars) of the instance ID.
    #[must_use]
    pub fn short(&self) -> &str {
        if self.id.len() >= 12 {
            &self.id[..12]
        } else {
            &self.id
        }
    }

    /// Loopback port the instance serves queries on.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Base URL of the instance's query API.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.short(), self.port)
    }
}
