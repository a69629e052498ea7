//! Fetches run metadata and the TSDB archive from the CI artifact store.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{FetchError, FetchResult};
use crate::types::{RunMetadata, RunOutcome};

/// Default artifact store root.
pub const DEFAULT_BASE_URL: &str = "https://gcsweb-ci.svc.ci.openshift.org/gcs/origin-ci-test/logs";

/// Default CI job name.
pub const DEFAULT_JOB_NAME: &str = "release-openshift-ocp-installer-e2e-openstack-4.3";

/// Default archive location relative to a run.
pub const DEFAULT_ARCHIVE_PATH: &str = "artifacts/e2e-openstack/metrics/prometheus.tar";

/// Archives smaller than this are treated as empty. Real archives are
/// usually tens of megabytes.
pub const DEFAULT_MIN_ARCHIVE_BYTES: u64 = 50_000;

/// Where a job's artifacts live in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactLayout {
    /// Store root, e.g. `https://host/logs`.
    pub base_url: String,
    /// Job name, the first path segment below the root.
    pub job_name: String,
    /// Archive path relative to the run directory.
    pub archive_path: String,
    /// Size gate for the downloaded archive.
    pub min_archive_bytes: u64,
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            job_name: DEFAULT_JOB_NAME.to_string(),
            archive_path: DEFAULT_ARCHIVE_PATH.to_string(),
            min_archive_bytes: DEFAULT_MIN_ARCHIVE_BYTES,
        }
    }
}

impl ArtifactLayout {
    /// Creates a layout with the default size gate.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        job_name: impl Into<String>,
        archive_path: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            job_name: job_name.into(),
            archive_path: archive_path.into(),
            min_archive_bytes: DEFAULT_MIN_ARCHIVE_BYTES,
        }
    }

    /// Sets the size gate.
    #[must_use]
    pub const fn with_min_archive_bytes(mut self, bytes: u64) -> Self {
        self.min_archive_bytes = bytes;
        self
    }

    fn run_url(&self, run_id: &str, leaf: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.job_name.trim_matches('/'),
            run_id,
            leaf.trim_start_matches('/')
        )
    }

    /// `{base}/{job}/{run}/started.json`
    #[must_use]
    pub fn started_url(&self, run_id: &str) -> String {
        self.run_url(run_id, "started.json")
    }

    /// `{base}/{job}/{run}/finished.json`
    #[must_use]
    pub fn finished_url(&self, run_id: &str) -> String {
        self.run_url(run_id, "finished.json")
    }

    /// `{base}/{job}/{run}/{archive_path}`
    #[must_use]
    pub fn archive_url(&self, run_id: &str) -> String {
        self.run_url(run_id, &self.archive_path)
    }

    /// File name the archive is saved under: the last segment of
    /// `archive_path`.
    #[must_use]
    pub fn archive_file_name(&self) -> &str {
        self.archive_path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("prometheus.tar")
    }
}

/// Tri-state result of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The archive was downloaded and is large enough to hold data.
    Ready {
        /// Run metadata.
        metadata: RunMetadata,
        /// Location of the downloaded archive.
        archive: PathBuf,
    },
    /// The archive is below the size gate; only metadata is usable.
    Empty {
        /// Run metadata.
        metadata: RunMetadata,
        /// Downloaded archive size.
        archive_bytes: u64,
    },
}

impl FetchOutcome {
    /// Run metadata, regardless of archive state.
    #[must_use]
    pub const fn metadata(&self) -> &RunMetadata {
        match self {
            Self::Ready { metadata, .. } | Self::Empty { metadata, .. } => metadata,
        }
    }
}

/// Source of run metadata and archives.
pub trait RunSource: Send + Sync {
    /// Fetch metadata and the archive of `run_id` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns error if any request fails or returns a non-200 status, or if
    /// the metadata cannot be decoded.
    fn fetch<'a>(
        &'a self,
        run_id: &'a str,
        dest: &'a Path,
    ) -> Pin<Box<dyn Future<Output = FetchResult<FetchOutcome>> + Send + 'a>>;
}

#[derive(Debug, Deserialize)]
struct Started {
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct Finished {
    timestamp: i64,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    passed: Option<bool>,
}

fn unix_time(url: &str, secs: i64) -> FetchResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| FetchError::Metadata {
        url: url.to_string(),
        reason: format!("timestamp {secs} out of range"),
    })
}

/// HTTP run source for the CI artifact store.
#[derive(Debug, Clone)]
pub struct ArchiveRetriever {
    client: Client,
    layout: ArtifactLayout,
    metadata_timeout: Duration,
}

impl ArchiveRetriever {
    /// Default connect timeout for store requests.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default total timeout of one metadata request. Archive downloads
    /// are unbounded.
    pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a retriever for `layout`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(layout: ArtifactLayout) -> FetchResult<Self> {
        let client = Client::builder()
            .connect_timeout(Self::CONNECT_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Request {
                url: layout.base_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            layout,
            metadata_timeout: Self::METADATA_TIMEOUT,
        })
    }

    /// Set the total timeout of each metadata request.
    #[must_use]
    pub const fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }

    /// The artifact layout.
    #[must_use]
    pub const fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    async fn get(&self, url: &str, timeout: Option<Duration>) -> FetchResult<reqwest::Response> {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> FetchResult<T> {
        let body = self
            .get(url, Some(self.metadata_timeout))
            .await?
            .bytes()
            .await
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        serde_json::from_slice(&body).map_err(|e| FetchError::Metadata {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Fetch start/finish metadata for a run.
    ///
    /// # Errors
    ///
    /// Returns error if either document is missing or malformed.
    pub async fn metadata(&self, run_id: &str) -> FetchResult<RunMetadata> {
        let started_url = self.layout.started_url(run_id);
        let started: Started = self.get_json(&started_url).await?;

        let finished_url = self.layout.finished_url(run_id);
        let finished: Finished = self.get_json(&finished_url).await?;

        Ok(RunMetadata::new(
            run_id,
            unix_time(&started_url, started.timestamp)?,
            unix_time(&finished_url, finished.timestamp)?,
            RunOutcome::from_finished(finished.result.as_deref(), finished.passed),
        ))
    }

    /// Stream the run's archive into `path`, returning the bytes written.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the file cannot be written.
    pub async fn download(&self, run_id: &str, path: &Path) -> FetchResult<u64> {
        let url = self.layout.archive_url(run_id);
        let mut response = self.get(&url, None).await?;

        let mut file = tokio::fs::File::create(path).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| FetchError::Request {
            url: url.clone(),
            reason: e.to_string(),
        })? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(url = %url, bytes = written, "archive downloaded");
        Ok(written)
    }
}

impl RunSource for ArchiveRetriever {
    fn fetch<'a>(
        &'a self,
        run_id: &'a str,
        dest: &'a Path,
    ) -> Pin<Box<dyn Future<Output = FetchResult<FetchOutcome>> + Send + 'a>> {
        Box::pin(async move {
            let metadata = self.metadata(run_id).await?;

            tokio::fs::create_dir_all(dest).await?;
            let archive = dest.join(self.layout.archive_file_name());
            let archive_bytes = self.download(run_id, &archive).await?;

            if archive_bytes < self.layout.min_archive_bytes {
                info!(
                    run_id,
                    archive_bytes,
                    min_archive_bytes = self.layout.min_archive_bytes,
                    "archive below size gate, treating run as empty"
                );
                return Ok(FetchOutcome::Empty {
                    metadata,
                    archive_bytes,
                });
            }

            Ok(FetchOutcome::Ready { metadata, archive })
        })
    }
}
