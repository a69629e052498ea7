//! Docker-backed Prometheus instances using bollard.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::Docker;
use futures::TryStreamExt;
use tracing::{debug, info, warn};

use crate::backend::QueryBackend;
use crate::config::{DataMount, PrometheusConfig};
use crate::error::{BackendError, BackendHandle, BackendResult};

/// Label put on every instance this crate creates.
pub const INSTANCE_LABEL: &str = "io.ciprom.instance";

/// Query backend that runs Prometheus in a local Docker container.
pub struct DockerBackend {
    client: Docker,
    config: PrometheusConfig,
}

impl std::fmt::Debug for DockerBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerBackend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DockerBackend {
    /// Connect to the Docker daemon using the default connection method.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the connection fails.
    pub fn connect(config: PrometheusConfig) -> BackendResult<Self> {
        config.validate()?;
        let client = Docker::connect_with_local_defaults().map_err(|e| {
            BackendError::ConnectionFailed(format!("failed to connect to Docker: {e}"))
        })?;
        Ok(Self { client, config })
    }

    /// Connect to a Docker daemon at a specific URL.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the connection fails.
    pub fn connect_with_url(url: &str, config: PrometheusConfig) -> BackendResult<Self> {
        config.validate()?;
        let client = Docker::connect_with_http(url, 120, bollard::API_DEFAULT_VERSION).map_err(
            |e| {
                BackendError::ConnectionFailed(format!(
                    "failed to connect to Docker at {url}: {e}"
                ))
            },
        )?;
        Ok(Self { client, config })
    }

    /// Instance configuration.
    #[must_use]
    pub const fn config(&self) -> &PrometheusConfig {
        &self.config
    }

    /// Check that the daemon is reachable.
    ///
    /// # Errors
    ///
    /// Returns error if the ping fails.
    pub async fn ping(&self) -> BackendResult<()> {
        self.client
            .ping()
            .await
            .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;
        Ok(())
    }

    /// Build the container definition for one instance.
    ///
    /// The query port is published on the loopback interface only.
    pub(crate) fn build_container_config(
        config: &PrometheusConfig,
        host_port: u16,
        mount: &DataMount,
    ) -> Config<String> {
        let container_port = format!("{}/tcp", config.container_port);

        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        exposed_ports.insert(container_port.clone(), HashMap::new());

        let mut bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        bindings.insert(
            container_port,
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(host_port.to_string()),
            }]),
        );

        let host_config = HostConfig {
            port_bindings: Some(bindings),
            mounts: Some(vec![Mount {
                source: Some(mount.source.clone()),
                target: Some(mount.target.clone()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(false),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let mut labels = HashMap::new();
        labels.insert(INSTANCE_LABEL.to_string(), host_port.to_string());

        Config {
            image: Some(config.image.clone()),
            cmd: Some(config.command()),
            exposed_ports: Some(exposed_ports),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    /// Pull the configured image.
    async fn pull_image(&self) -> BackendResult<()> {
        info!(image = %self.config.image, "pulling backend image");
        let options = CreateImageOptions {
            from_image: self.config.image.clone(),
            ..Default::default()
        };
        self.client
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| BackendError::ImageUnavailable {
                image: self.config.image.clone(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Create the container, pulling the image once if it is missing.
    async fn create(&self, port: u16, mount: &DataMount) -> BackendResult<String> {
        let name = format!(
            "{}-{port}-{}",
            self.config.name_prefix,
            uuid::Uuid::new_v4().simple()
        );
        let mut pulled = false;

        loop {
            let options = CreateContainerOptions {
                name: name.clone(),
                platform: None,
            };
            let definition = Self::build_container_config(&self.config, port, mount);

            match self.client.create_container(Some(options), definition).await {
                Ok(response) => {
                    for warning in &response.warnings {
                        warn!(name = %name, warning = %warning, "docker create warning");
                    }
                    return Ok(response.id);
                }
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    ..
                }) if !pulled => {
                    self.pull_image().await?;
                    pulled = true;
                }
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    message,
                }) => {
                    return Err(BackendError::ImageUnavailable {
                        image: self.config.image.clone(),
                        reason: message,
                    });
                }
                Err(e) => return Err(BackendError::CreateFailed(e.to_string())),
            }
        }
    }

    /// Force-remove a container, logging instead of failing.
    async fn discard(&self, id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.client.remove_container(id, Some(options)).await {
            warn!(id = %id, error = %e, "failed to remove container");
        }
    }
}

impl QueryBackend for DockerBackend {
    fn start<'a>(
        &'a self,
        port: u16,
        data_path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = BackendResult<BackendHandle>> + Send + 'a>> {
        Box::pin(async move {
            if port == 0 {
                return Err(BackendError::InvalidConfig(
                    "backend port must be greater than 0".to_string(),
                ));
            }
            let mount = DataMount::new(data_path, self.config.data_mount.clone())?;

            debug!(port, data = %mount.source, image = %self.config.image, "creating backend");
            let id = self.create(port, &mount).await?;
            let handle = BackendHandle::new(id.clone(), port)?;

            if let Err(e) = self.client.start_container::<String>(&id, None).await {
                self.discard(&id).await;
                return Err(BackendError::StartFailed {
                    handle: handle.to_string(),
                    reason: e.to_string(),
                });
            }

            info!(handle = %handle, "backend started");
            Ok(handle)
        })
    }

    fn stop<'a>(
        &'a self,
        handle: &'a BackendHandle,
    ) -> Pin<Box<dyn Future<Output = BackendResult<()>> + Send + 'a>> {
        Box::pin(async move {
            debug!(handle = %handle, "stopping backend");

            let options = StopContainerOptions {
                t: i64::from(self.config.stop_timeout_secs),
            };
            match self.client.stop_container(handle.id(), Some(options)).await {
                // 304: already stopped
                Ok(())
                | Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 304,
                    ..
                }) => {}
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404,
                    ..
                }) => {
                    return Err(BackendError::NotFound {
                        handle: handle.to_string(),
                    });
                }
                Err(e) => {
                    return Err(BackendError::StopFailed {
                        handle: handle.to_string(),
                        reason: e.to_string(),
                    });
                }
            }

            self.discard(handle.id()).await;

            let settle = self.config.settle_delay();
            debug!(handle = %handle, settle_secs = settle.as_secs(), "waiting for backend to settle");
            tokio::time::sleep(settle).await;

            info!(handle = %handle, "backend stopped");
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}
