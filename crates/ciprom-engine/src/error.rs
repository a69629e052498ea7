//! Error types for the ciprom-engine crate.
//!
//! Errors are split by blast radius: [`FetchError`], [`ExtractError`] and
//! backend failures end a single run ([`RunError`]), while [`QueryError`] and
//! [`FlattenError`] end a single metric of a run ([`MetricError`]).

use thiserror::Error;

use ciprom_backend::BackendError;

/// Run metadata or archive download failed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP request could not be sent or its body could not be read.
    #[error("request to {url} failed: {reason}")]
    Request {
        /// Requested URL.
        url: String,
        /// The transport failure.
        reason: String,
    },

    /// The server answered with a non-200 status.
    #[error("unexpected status {status} from {url}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// A metadata document could not be decoded.
    #[error("malformed metadata from {url}: {reason}")]
    Metadata {
        /// Requested URL.
        url: String,
        /// The reason decoding failed.
        reason: String,
    },

    /// Writing the archive to disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The archive could not be unpacked.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The archive contains an entry that is neither a directory nor a
    /// regular file.
    #[error("unsupported archive entry {path}: {kind}")]
    UnsupportedEntry {
        /// Entry path as declared in the archive.
        path: String,
        /// Entry type description.
        kind: String,
    },

    /// The archive contains an entry that would land outside the destination.
    #[error("unsafe archive entry path: {path}")]
    UnsafePath {
        /// Entry path as declared in the archive.
        path: String,
    },

    /// Reading the archive or writing the tree failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A range query could not be built, executed, or decoded.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The step string does not match `^[0-9]+[a-zA-Z]$`.
    #[error("invalid step {step:?}: some examples of valid steps are `1m`, `30s`")]
    InvalidStep {
        /// The rejected step string.
        step: String,
    },

    /// The query specification is inconsistent.
    #[error("invalid query: {reason}")]
    InvalidSpec {
        /// The reason the query is invalid.
        reason: String,
    },

    /// Every attempt failed; carries the last failure.
    #[error("query {metric} failed after {attempts} attempts: {last_error}")]
    QueryFailed {
        /// Metric being queried.
        metric: String,
        /// Number of attempts made.
        attempts: u32,
        /// The final attempt's failure.
        last_error: String,
    },

    /// The response body is not a valid range query result. Never retried.
    #[error("malformed query response: {reason}")]
    Decode {
        /// The reason decoding failed.
        reason: String,
    },
}

/// A query result could not be reduced to rows.
#[derive(Debug, Error)]
pub enum FlattenError {
    /// A series' pod label names no recognizable node.
    #[error("cannot resolve node for pod {pod:?}: expected \"master\" or \"worker\" in label")]
    NodeResolution {
        /// The offending pod label.
        pod: String,
    },
}

/// Failure that ends one metric of a run; sibling metrics continue.
#[derive(Debug, Error)]
pub enum MetricError {
    /// The query could not be built, executed, or decoded.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The result could not be attributed to nodes.
    #[error(transparent)]
    Flatten(#[from] FlattenError),
}

/// Failure that ends one run's processing; the batch continues.
#[derive(Debug, Error)]
pub enum RunError {
    /// Fetching metadata or the archive failed.
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Unpacking the archive failed.
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    /// The query backend could not be started or stopped.
    #[error("backend failed: {0}")]
    Backend(#[from] BackendError),
}

/// Result type for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type for archive extraction.
pub type ExtractResult<T> = std::result::Result<T, ExtractError>;

/// Result type for query operations.
pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// Result type for flattening.
pub type FlattenResult<T> = std::result::Result<T, FlattenError>;
