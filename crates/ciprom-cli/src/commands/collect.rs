//! Collect command implementation.
//!
//! Loads the configuration, wires the artifact store, the Docker backend and
//! the range query executor into a [`RunAggregator`], then writes every row
//! to a CSV file and prints a per-run summary.

use std::fs::File;
use std::future::Future;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tracing::{info, warn};

use ciprom_backend::{BackendError, BackendHandle, BackendResult, DockerBackend, QueryBackend};
use ciprom_engine::{ArchiveRetriever, RangeQuery, RangeQueryExecutor, RunAggregator, RunSource};

use crate::config::HarvestConfig;
use crate::error::CliError;
use crate::output::{write_csv, CollectSummary, OutputFormat};

/// Collect command executor.
#[derive(Debug, Clone)]
pub struct CollectCommand {
    config_path: PathBuf,
    output: Option<PathBuf>,
}

impl CollectCommand {
    /// Create a new collect command.
    #[must_use]
    pub fn new(config_path: impl Into<PathBuf>, output: Option<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            output,
        }
    }

    /// Execute the collect command.
    ///
    /// Individual run and metric failures are reported in the summary; only
    /// configuration, setup and output failures are errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the results
    /// cannot be written. An unreachable container runtime fails each run
    /// at backend start instead.
    pub async fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
    ) -> Result<(), CliError> {
        let config = HarvestConfig::from_file(&self.config_path)?;
        let work_dir = prepare_work_dir(&config.work_dir()).await?;

        let source = ArchiveRetriever::new(config.source.clone())?;
        let backend = RuntimeBackend::check(DockerBackend::connect(config.prometheus())).await;
        let query = RangeQueryExecutor::new(config.retry_policy()?)?;

        let aggregator = RunAggregator::new(source, backend, query, config.settings(work_dir)?);
        let summary = self.run(&aggregator, &config).await?;
        format.write(writer, &summary)?;
        Ok(())
    }

    /// Collect every configured run with `aggregator` and write the CSV.
    ///
    /// # Errors
    ///
    /// Returns an error if the results file cannot be written.
    pub async fn run<S, B, Q>(
        &self,
        aggregator: &RunAggregator<S, B, Q>,
        config: &HarvestConfig,
    ) -> Result<CollectSummary, CliError>
    where
        S: RunSource,
        B: QueryBackend,
        Q: RangeQuery,
    {
        info!(
            runs = config.test_ids.len(),
            metrics = config.metrics.len(),
            "starting collection"
        );
        let harvest = aggregator.collect(&config.test_ids).await;

        let path = self
            .output
            .clone()
            .unwrap_or_else(|| config.results_path());
        write_results(&path, &harvest.rows)?;
        info!(path = %path.display(), rows = harvest.rows.len(), "results written");

        Ok(CollectSummary::new(path.display().to_string(), &harvest))
    }
}

/// Docker backend, or the reason the runtime could not be reached.
///
/// Runs whose archives are size-gated never start a backend, so an
/// unreachable runtime only fails the runs that need it.
#[derive(Debug)]
pub enum RuntimeBackend {
    /// Connected and answering pings.
    Docker(DockerBackend),
    /// Connection or ping failed; every start reports this reason.
    Unavailable(String),
}

impl RuntimeBackend {
    /// Ping a freshly connected backend.
    pub async fn check(connected: BackendResult<DockerBackend>) -> Self {
        let backend = match connected {
            Ok(backend) => backend,
            Err(e) => {
                warn!(error = %e, "container runtime unavailable");
                return Self::Unavailable(e.to_string());
            }
        };
        match backend.ping().await {
            Ok(()) => Self::Docker(backend),
            Err(e) => {
                warn!(error = %e, "container runtime not answering");
                Self::Unavailable(e.to_string())
            }
        }
    }
}

impl QueryBackend for RuntimeBackend {
    fn start<'a>(
        &'a self,
        port: u16,
        data_path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = BackendResult<BackendHandle>> + Send + 'a>> {
        match self {
            Self::Docker(docker) => docker.start(port, data_path),
            Self::Unavailable(reason) => {
                Box::pin(async move { Err(BackendError::ConnectionFailed(reason.clone())) })
            }
        }
    }

    fn stop<'a>(
        &'a self,
        handle: &'a BackendHandle,
    ) -> Pin<Box<dyn Future<Output = BackendResult<()>> + Send + 'a>> {
        match self {
            Self::Docker(docker) => docker.stop(handle),
            Self::Unavailable(reason) => {
                Box::pin(async move { Err(BackendError::ConnectionFailed(reason.clone())) })
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Docker(docker) => docker.name(),
            Self::Unavailable(_) => "unavailable",
        }
    }
}

/// Create the work directory and return its absolute path.
///
/// Backends mount per-run directories by path, so relative paths are
/// resolved before any run starts.
async fn prepare_work_dir(work_dir: &Path) -> Result<PathBuf, CliError> {
    tokio::fs::create_dir_all(work_dir).await?;
    Ok(tokio::fs::canonicalize(work_dir).await?)
}

fn write_results(path: &Path, rows: &[ciprom_engine::FlatRow]) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = BufWriter::new(File::create(path)?);
    write_csv(&mut file, rows)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{TimeZone, Utc};
    use ciprom_backend::PrometheusConfig;
    use ciprom_engine::error::FetchResult;
    use ciprom_engine::{
        FetchError, FetchOutcome, QueryError, QueryResult, QuerySpec, RangeResult, RunMetadata,
        RunOutcome, RunStage, RunStatus,
    };
    use tempfile::TempDir;

    use crate::cli::Format;

    fn metadata(run_id: &str) -> RunMetadata {
        RunMetadata::new(
            run_id,
            Utc.timestamp_opt(1_569_934_191, 0).single().expect("start"),
            Utc.timestamp_opt(1_569_939_439, 0).single().expect("end"),
            RunOutcome::Passed,
        )
    }

    /// "404" fails, ids starting with "ready" get an (empty) tar archive,
    /// everything else is below the size gate.
    struct EmptySource;

    impl RunSource for EmptySource {
        fn fetch<'a>(
            &'a self,
            run_id: &'a str,
            dest: &'a Path,
        ) -> Pin<Box<dyn Future<Output = FetchResult<FetchOutcome>> + Send + 'a>> {
            Box::pin(async move {
                if run_id == "404" {
                    return Err(FetchError::Status {
                        url: format!("https://store.test/{run_id}/started.json"),
                        status: 404,
                    });
                }
                if run_id.starts_with("ready") {
                    std::fs::create_dir_all(dest).expect("run dir");
                    let archive = dest.join("prometheus.tar");
                    // Two zero blocks: a tar with no entries.
                    std::fs::write(&archive, [0u8; 1024]).expect("archive");
                    return Ok(FetchOutcome::Ready {
                        metadata: metadata(run_id),
                        archive,
                    });
                }
                Ok(FetchOutcome::Empty {
                    metadata: metadata(run_id),
                    archive_bytes: 10_240,
                })
            })
        }
    }

    /// Counts starts; never expected to be used for empty archives.
    #[derive(Default)]
    struct CountingBackend {
        starts: AtomicUsize,
    }

    impl QueryBackend for CountingBackend {
        fn start<'a>(
            &'a self,
            _port: u16,
            _data_path: &'a Path,
        ) -> Pin<Box<dyn Future<Output = BackendResult<BackendHandle>> + Send + 'a>> {
            Box::pin(async move {
                self.starts.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::ConnectionFailed("not available in tests".into()))
            })
        }

        fn stop<'a>(
            &'a self,
            _handle: &'a BackendHandle,
        ) -> Pin<Box<dyn Future<Output = BackendResult<()>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    struct NoQuery;

    impl RangeQuery for NoQuery {
        fn execute<'a>(
            &'a self,
            _endpoint: &'a str,
            spec: &'a QuerySpec,
        ) -> Pin<Box<dyn Future<Output = QueryResult<RangeResult>> + Send + 'a>> {
            Box::pin(async move {
                Err(QueryError::QueryFailed {
                    metric: spec.metric_name().to_string(),
                    attempts: 1,
                    last_error: "unreachable".into(),
                })
            })
        }
    }

    fn config_in(dir: &TempDir, ids: &[&str]) -> HarvestConfig {
        let mut config = HarvestConfig::new(ids.iter().map(ToString::to_string).collect());
        config.data_dir = dir.path().join("data");
        config
    }

    fn aggregator(
        config: &HarvestConfig,
    ) -> RunAggregator<EmptySource, CountingBackend, NoQuery> {
        let settings = config.settings(config.work_dir()).expect("settings");
        RunAggregator::new(EmptySource, CountingBackend::default(), NoQuery, settings)
    }

    // ========================================================================
    // Collection Tests
    // ========================================================================

    #[tokio::test]
    async fn collect_writes_metadata_rows_for_empty_archives() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_in(&dir, &["330", "331"]);
        let cmd = CollectCommand::new("unused.toml", None);

        let summary = cmd.run(&aggregator(&config), &config).await.expect("collect");

        assert_eq!(summary.rows, 2);
        assert_eq!(summary.runs.len(), 2);
        assert!(summary.runs.iter().all(|r| r.status.label() == "empty-archive"));

        let csv = std::fs::read_to_string(config.results_path()).expect("results");
        assert_eq!(
            csv,
            "330,,2019-10-01T12:49:51Z,2019-10-01T14:17:19Z,1m\n\
             331,,2019-10-01T12:49:51Z,2019-10-01T14:17:19Z,1m\n"
        );
    }

    #[tokio::test]
    async fn collect_continues_past_failed_runs() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_in(&dir, &["404", "330"]);
        let agg = aggregator(&config);
        let cmd = CollectCommand::new("unused.toml", None);

        let summary = cmd.run(&agg, &config).await.expect("collect");

        assert_eq!(summary.rows, 1);
        assert_eq!(summary.runs[0].status.label(), "failed");
        assert_eq!(summary.runs[1].status.label(), "empty-archive");

        let table = OutputFormat::new(Format::Table)
            .to_string(&summary)
            .expect("format");
        assert!(table.contains("fetching"));
        assert!(table.contains("Wrote 1 row(s) for 2 run(s)"));
    }

    #[tokio::test]
    async fn collect_honors_output_override() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_in(&dir, &["330"]);
        let out = dir.path().join("exports").join("etcd.csv");
        let cmd = CollectCommand::new("unused.toml", Some(out.clone()));

        let summary = cmd.run(&aggregator(&config), &config).await.expect("collect");

        assert_eq!(summary.output, out.display().to_string());
        let csv = std::fs::read_to_string(&out).expect("results");
        assert!(csv.starts_with("330,,"));
        assert!(!config.results_path().exists());
    }

    #[tokio::test]
    async fn collect_with_no_rows_writes_empty_file() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_in(&dir, &["404"]);
        let cmd = CollectCommand::new("unused.toml", None);

        let summary = cmd.run(&aggregator(&config), &config).await.expect("collect");

        assert_eq!(summary.rows, 0);
        let csv = std::fs::read_to_string(config.results_path()).expect("results");
        assert!(csv.is_empty());
    }

    #[tokio::test]
    async fn unreachable_runtime_only_fails_runs_that_need_a_backend() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_in(&dir, &["330", "ready-1", "331"]);
        let settings = config
            .settings(prepare_work_dir(&config.work_dir()).await.expect("work dir"))
            .expect("settings");
        let backend = RuntimeBackend::Unavailable("Socket not found: /var/run/docker.sock".into());
        let agg = RunAggregator::new(EmptySource, backend, NoQuery, settings);
        let cmd = CollectCommand::new("unused.toml", None);

        let summary = cmd.run(&agg, &config).await.expect("collect");

        assert_eq!(summary.rows, 2);
        let labels: Vec<_> = summary.runs.iter().map(|r| r.status.label()).collect();
        assert_eq!(labels, vec!["empty-archive", "failed", "empty-archive"]);
        match &summary.runs[1].status {
            RunStatus::Failed { stage, reason } => {
                assert_eq!(*stage, RunStage::BackendUp);
                assert!(reason.contains("Socket not found"));
            }
            other => panic!("expected backend-up failure, got {other:?}"),
        }

        let csv = std::fs::read_to_string(config.results_path()).expect("results");
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.starts_with("330,,"));
    }

    #[tokio::test]
    async fn unreachable_runtime_is_unavailable() {
        let backend = RuntimeBackend::check(DockerBackend::connect_with_url(
            "http://127.0.0.1:1",
            PrometheusConfig::default(),
        ))
        .await;

        assert!(matches!(backend, RuntimeBackend::Unavailable(_)));
        assert_eq!(backend.name(), "unavailable");
        let err = backend
            .start(9090, Path::new("/tmp/ciprom"))
            .await
            .expect_err("no runtime");
        assert!(matches!(err, BackendError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn execute_fails_on_missing_config() {
        let dir = TempDir::new().expect("tempdir");
        let cmd = CollectCommand::new(dir.path().join("missing.toml"), None);
        let mut out = Vec::new();

        let result = cmd.execute(&mut out, &OutputFormat::default()).await;

        assert!(matches!(result, Err(CliError::Config(_))));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn prepare_work_dir_returns_absolute_path() {
        let dir = TempDir::new().expect("tempdir");
        let work = dir.path().join("data").join("promData");

        let resolved = prepare_work_dir(&work).await.expect("prepare");

        assert!(resolved.is_absolute());
        assert!(resolved.is_dir());
    }
}
