//! Query backend instance configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};

/// Default Prometheus image used to serve archived TSDB data.
pub const DEFAULT_IMAGE: &str = "prom/prometheus:v2.6.0";

/// Port Prometheus listens on inside the container.
pub const DEFAULT_CONTAINER_PORT: u16 = 9090;

/// Where the Prometheus image expects its TSDB directory.
pub const DEFAULT_DATA_MOUNT: &str = "/etc/prometheus/data";

/// Configuration for a disposable Prometheus instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Image reference.
    pub image: String,

    /// Port the server listens on inside the container.
    pub container_port: u16,

    /// Mount point of the data directory inside the container.
    pub data_mount: String,

    /// Seconds to wait after a stop completes before the port may be reused.
    pub settle_secs: u64,

    /// Grace period in seconds given to the server before it is killed.
    pub stop_timeout_secs: u32,

    /// Prefix for generated instance names.
    pub name_prefix: String,

    /// Extra server flags appended after the config and storage flags.
    pub extra_args: Vec<String>,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            container_port: DEFAULT_CONTAINER_PORT,
            data_mount: DEFAULT_DATA_MOUNT.to_string(),
            settle_secs: 10,
            stop_timeout_secs: 10,
            name_prefix: "ciprom-prometheus".to_string(),
            // Archived blocks are older than the default 15d retention.
            extra_args: vec!["--storage.tsdb.retention=3650d".to_string()],
        }
    }
}

impl PrometheusConfig {
    /// Set the image reference.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set the in-container data mount point.
    #[must_use]
    pub fn with_data_mount(mut self, mount: impl Into<String>) -> Self {
        self.data_mount = mount.into();
        self
    }

    /// Set the post-stop settle delay.
    #[must_use]
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_secs = delay.as_secs();
        self
    }

    /// Post-stop settle delay.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    /// Server command line: config file, TSDB path on the data mount, then
    /// any extra flags.
    #[must_use]
    pub fn command(&self) -> Vec<String> {
        let mut cmd = vec![
            "--config.file=/etc/prometheus/prometheus.yml".to_string(),
            format!("--storage.tsdb.path={}", self.data_mount),
        ];
        cmd.extend(self.extra_args.iter().cloned());
        cmd
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if any required field is empty or out of range.
    pub fn validate(&self) -> BackendResult<()> {
        if self.image.trim().is_empty() {
            return Err(BackendError::InvalidConfig("image cannot be empty".to_string()));
        }
        if self.container_port == 0 {
            return Err(BackendError::InvalidConfig(
                "container_port must be greater than 0".to_string(),
            ));
        }
        if !self.data_mount.starts_with('/') {
            return Err(BackendError::InvalidConfig(format!(
                "data_mount must be an absolute path: {}",
                self.data_mount
            )));
        }
        if self.name_prefix.is_empty() {
            return Err(BackendError::InvalidConfig(
                "name_prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bind mount of the unpacked archive into the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMount {
    /// Absolute host path of the unpacked archive.
    pub source: String,

    /// Target path inside the instance.
    pub target: String,
}

impl DataMount {
    /// Build a read-write bind mount for `data_path`.
    ///
    /// # Errors
    ///
    /// Returns error if the path is not absolute or not valid UTF-8.
    pub fn new(data_path: &Path, target: impl Into<String>) -> BackendResult<Self> {
        if !data_path.is_absolute() {
            return Err(BackendError::InvalidConfig(format!(
                "data path must be absolute: {}",
                data_path.display()
            )));
        }
        let source = data_path
            .to_str()
            .ok_or_else(|| {
                BackendError::InvalidConfig(format!(
                    "data path is not valid UTF-8: {}",
                    data_path.display()
                ))
            })?
            .to_string();
        Ok(Self {
            source,
            target: target.into(),
        })
    }
}
