//! Query backend capability.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::error::{BackendHandle, BackendResult};

/// A disposable time-series query engine.
///
/// Implementations provision one isolated instance per call to
/// [`start`](QueryBackend::start), serving the given data directory on a
/// loopback port, and release it again on [`stop`](QueryBackend::stop).
/// Instances are never reused across runs.
pub trait QueryBackend: Send + Sync {
    /// Provision an instance bound to `port` with `data_path` mounted
    /// read-write as its data source.
    ///
    /// # Errors
    ///
    /// Returns error if the instance cannot be created or started. Start
    /// failures are not retried.
    fn start<'a>(
        &'a self,
        port: u16,
        data_path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = BackendResult<BackendHandle>> + Send + 'a>>;

    /// Terminate the instance and wait until its resources are released.
    ///
    /// Returns only after the settle delay, so the port may be reused by the
    /// next call to `start`.
    ///
    /// # Errors
    ///
    /// Returns error if the instance cannot be stopped.
    fn stop<'a>(
        &'a self,
        handle: &'a BackendHandle,
    ) -> Pin<Box<dyn Future<Output = BackendResult<()>> + Send + 'a>>;

    /// Short backend name for logs (e.g. "docker").
    fn name(&self) -> &'static str;
}
