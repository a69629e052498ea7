//! Collection configuration.
//!
//! A TOML file naming the test runs to collect plus optional sections for
//! the artifact store, the query backend and query retry:
//!
//! ```toml
//! test_ids = ["330", "331"]
//! step = "1m"
//!
//! [source]
//! job_name = "release-openshift-ocp-installer-e2e-openstack-4.3"
//!
//! [backend]
//! port = 9090
//!
//! [retry]
//! max_attempts = 5
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ciprom_backend::PrometheusConfig;
use ciprom_engine::{
    is_valid_run_id, AggregatorSettings, ArtifactLayout, QueryTemplate, RetryPolicy, Step,
};

use crate::error::CliError;

/// Metrics collected when none are configured.
pub const DEFAULT_METRICS: [&str; 3] = [
    "etcd_disk_wal_fsync_duration_seconds_bucket",
    "etcd_disk_backend_commit_duration_seconds_bucket",
    "etcd_network_peer_round_trip_time_seconds_bucket",
];

/// Sub-directory of `data_dir` holding per-run work directories.
pub const WORK_DIR_NAME: &str = "promData";

/// Default CSV file name inside `data_dir`.
pub const RESULTS_FILE_NAME: &str = "results.csv";

fn default_step() -> String {
    Step::default().to_string()
}

fn default_metrics() -> Vec<String> {
    DEFAULT_METRICS.iter().map(ToString::to_string).collect()
}

fn default_query_template() -> String {
    QueryTemplate::default().as_str().to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Query backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendSection {
    /// Prometheus image.
    pub image: String,
    /// Loopback port the backend is published on.
    pub port: u16,
    /// TSDB mount point inside the container.
    pub data_mount: String,
    /// Seconds to wait after stopping a backend.
    pub settle_secs: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        let prometheus = PrometheusConfig::default();
        Self {
            image: prometheus.image,
            port: prometheus.container_port,
            data_mount: prometheus.data_mount,
            settle_secs: prometheus.settle_secs,
        }
    }
}

/// Range query retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySection {
    /// Attempts per query, including the first.
    pub max_attempts: u32,
    /// Seconds between attempts.
    pub delay_secs: u64,
    /// Network timeout of one attempt, in seconds.
    pub attempt_timeout_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts(),
            delay_secs: policy.delay().as_secs(),
            attempt_timeout_secs: policy.attempt_timeout().as_secs(),
        }
    }
}

/// Full collection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarvestConfig {
    /// Test run identifiers, processed in order.
    #[serde(default)]
    pub test_ids: Vec<String>,
    /// Range query step, e.g. `1m`.
    #[serde(default = "default_step")]
    pub step: String,
    /// Metrics to query per run.
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
    /// Expression template with `{metric}` and `{step}` placeholders.
    #[serde(default = "default_query_template")]
    pub query_template: String,
    /// Directory for the results file and per-run work directories.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Artifact store layout.
    #[serde(default)]
    pub source: ArtifactLayout,
    /// Query backend settings.
    #[serde(default)]
    pub backend: BackendSection,
    /// Range query retry settings.
    #[serde(default)]
    pub retry: RetrySection,
}

impl HarvestConfig {
    /// Configuration for `test_ids` with every other value defaulted.
    #[must_use]
    pub fn new(test_ids: Vec<String>) -> Self {
        Self {
            test_ids,
            step: default_step(),
            metrics: default_metrics(),
            query_template: default_query_template(),
            data_dir: default_data_dir(),
            source: ArtifactLayout::default(),
            backend: BackendSection::default(),
            retry: RetrySection::default(),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CliError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CliError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, CliError> {
        let config: Self =
            toml::from_str(content).map_err(|e| CliError::Config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, CliError> {
        toml::to_string_pretty(self)
            .map_err(|e| CliError::Format(format!("TOML serialization failed: {e}")))
    }

    /// Validate the configuration, reporting every problem at once.
    ///
    /// # Errors
    ///
    /// Returns `CliError::InvalidConfig` listing all problems found.
    pub fn validate(&self) -> Result<(), CliError> {
        let mut problems = Vec::new();

        if self.test_ids.is_empty() {
            problems.push("test_ids: at least one test id is required".to_string());
        }
        for id in self.test_ids.iter().filter(|id| !is_valid_run_id(id)) {
            problems.push(format!(
                "test_ids: {id:?} must be a single path segment of letters, digits, '-', '_' or '.'"
            ));
        }

        if let Err(e) = Step::parse(&self.step) {
            problems.push(format!("step: {e}"));
        }

        if self.metrics.is_empty() {
            problems.push("metrics: at least one metric is required".to_string());
        }
        if self.metrics.iter().any(|m| m.trim().is_empty()) {
            problems.push("metrics: metric names cannot be empty".to_string());
        }

        if let Err(e) = QueryTemplate::new(self.query_template.as_str()) {
            problems.push(format!("query_template: {e}"));
        }

        if !self.source.base_url.starts_with("http://")
            && !self.source.base_url.starts_with("https://")
        {
            problems.push("source.base_url must start with http:// or https://".to_string());
        }
        if self.source.job_name.trim().is_empty() {
            problems.push("source.job_name cannot be empty".to_string());
        }
        if self.source.archive_path.trim().is_empty() {
            problems.push("source.archive_path cannot be empty".to_string());
        }

        if self.backend.port == 0 {
            problems.push("backend.port must be greater than 0".to_string());
        }
        if let Err(e) = self.prometheus().validate() {
            problems.push(format!("backend: {e}"));
        }

        if let Err(e) = self.retry_policy() {
            problems.push(format!("retry: {e}"));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CliError::InvalidConfig { problems })
        }
    }

    /// Backend instance configuration.
    #[must_use]
    pub fn prometheus(&self) -> PrometheusConfig {
        PrometheusConfig::default()
            .with_image(self.backend.image.clone())
            .with_data_mount(self.backend.data_mount.clone())
            .with_settle_delay(Duration::from_secs(self.backend.settle_secs))
    }

    /// Range query retry policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the retry section is inconsistent.
    pub fn retry_policy(&self) -> Result<RetryPolicy, CliError> {
        Ok(RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_secs(self.retry.delay_secs),
            Duration::from_secs(self.retry.attempt_timeout_secs),
        )?)
    }

    /// Parent of the per-run work directories.
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.data_dir.join(WORK_DIR_NAME)
    }

    /// Default CSV destination.
    #[must_use]
    pub fn results_path(&self) -> PathBuf {
        self.data_dir.join(RESULTS_FILE_NAME)
    }

    /// Aggregator settings rooted at `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the step or template is invalid.
    pub fn settings(&self, work_dir: PathBuf) -> Result<AggregatorSettings, CliError> {
        Ok(AggregatorSettings {
            work_dir,
            metrics: self.metrics.clone(),
            step: Step::parse(&self.step)?,
            template: QueryTemplate::new(self.query_template.as_str())?,
            port: self.backend.port,
        })
    }
}
