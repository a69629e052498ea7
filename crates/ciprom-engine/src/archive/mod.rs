//! Run artifacts: metadata and TSDB archive download, and archive unpacking.

mod retriever;
mod unpack;

pub use retriever::{
    ArchiveRetriever, ArtifactLayout, FetchOutcome, RunSource, DEFAULT_ARCHIVE_PATH,
    DEFAULT_BASE_URL, DEFAULT_JOB_NAME, DEFAULT_MIN_ARCHIVE_BYTES,
};
pub use unpack::{open_permissions, unpack, UnpackStats};
