//! # ciprom-backend
//!
//! Disposable time-series query backends for archived CI metrics.
//!
//! A backend serves one unpacked Prometheus TSDB directory on a loopback
//! port for the duration of a single run's query phase, then is torn down.
//! The [`QueryBackend`] trait is the only thing the collection engine
//! depends on; [`DockerBackend`] implements it with a `prom/prometheus`
//! container.
//!
//! ## Features
//!
//! - `docker` (default) - Docker runtime via bollard
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use ciprom_backend::{DockerBackend, PrometheusConfig, QueryBackend};
//!
//! # async fn example() -> Result<(), ciprom_backend::BackendError> {
//! let backend = DockerBackend::connect(PrometheusConfig::default())?;
//! let handle = backend.start(9090, Path::new("/data/promData/330/prometheus")).await?;
//! println!("querying {}", handle.endpoint());
//! backend.stop(&handle).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod config;
#[cfg(feature = "docker")]
pub mod docker;
pub mod error;

// Re-exports
pub use backend::QueryBackend;
pub use config::{DataMount, PrometheusConfig};
#[cfg(feature = "docker")]
pub use docker::DockerBackend;
pub use error::{BackendError, BackendHandle, BackendResult};
