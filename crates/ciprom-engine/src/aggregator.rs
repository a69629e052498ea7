//! Per-run control loop.
//!
//! Each run moves through
//! `Fetching → (EmptyArchive | Extracting) → BackendUp → Querying → BackendDown`.
//! Runs and metrics are processed one at a time, so a single fixed backend
//! port is reused across runs. Per-metric failures are recorded and the
//! remaining metrics still run; per-run failures end that run only.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use ciprom_backend::QueryBackend;

use crate::archive::{open_permissions, unpack, FetchOutcome, RunSource, UnpackStats};
use crate::error::{ExtractError, ExtractResult, MetricError, RunError};
use crate::flatten::{flatten, FlatRow};
use crate::query::RangeQuery;
use crate::types::{QuerySpec, QueryTemplate, RunMetadata, RunOutcome, Step};

/// Directory the archive is unpacked into, below a run's work dir.
pub const DATA_DIR_NAME: &str = "prometheus";

/// What to collect for every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorSettings {
    /// Parent of the per-run work directories.
    pub work_dir: PathBuf,
    /// Metrics to query, in order.
    pub metrics: Vec<String>,
    /// Query resolution.
    pub step: Step,
    /// Expression template.
    pub template: QueryTemplate,
    /// Loopback port the backend is bound to.
    pub port: u16,
}

impl AggregatorSettings {
    /// Work directory of one run.
    #[must_use]
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.work_dir.join(run_id)
    }
}

/// Stage of the per-run state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    /// Downloading metadata and archive.
    Fetching,
    /// Unpacking the archive.
    Extracting,
    /// Starting the query backend.
    BackendUp,
    /// Running metric queries.
    Querying,
    /// Stopping the query backend.
    BackendDown,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetching => write!(f, "fetching"),
            Self::Extracting => write!(f, "extracting"),
            Self::BackendUp => write!(f, "backend-up"),
            Self::Querying => write!(f, "querying"),
            Self::BackendDown => write!(f, "backend-down"),
        }
    }
}

/// A metric that produced no rows, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFailure {
    /// Metric name.
    pub metric: String,
    /// Failure description.
    pub reason: String,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every metric produced rows.
    Complete,
    /// Some metrics failed; the others produced rows.
    Partial {
        /// The failed metrics.
        failed_metrics: Vec<MetricFailure>,
    },
    /// The archive was below the size gate; one metadata-only row was
    /// emitted.
    EmptyArchive,
    /// The run was abandoned.
    Failed {
        /// Stage that failed.
        stage: RunStage,
        /// Failure description.
        reason: String,
    },
}

impl RunStatus {
    /// Short label for summaries.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial { .. } => "partial",
            Self::EmptyArchive => "empty-archive",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: String,
    /// CI outcome, once metadata was fetched.
    pub outcome: Option<RunOutcome>,
    /// Rows the run contributed.
    pub rows: usize,
    /// How processing ended.
    pub status: RunStatus,
}

impl RunReport {
    fn failed(run_id: &str, outcome: Option<RunOutcome>, stage: RunStage, err: &RunError) -> Self {
        Self {
            run_id: run_id.to_string(),
            outcome,
            rows: 0,
            status: RunStatus::Failed {
                stage,
                reason: err.to_string(),
            },
        }
    }
}

/// Rows from all runs plus a report per run, in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Harvest {
    /// All rows, grouped by run in request order.
    pub rows: Vec<FlatRow>,
    /// One report per requested run.
    pub reports: Vec<RunReport>,
}

impl Harvest {
    /// Number of runs that ended with the given status label.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.reports
            .iter()
            .filter(|r| r.status.label() == label)
            .count()
    }
}

/// Drives collection across runs.
pub struct RunAggregator<S, B, Q> {
    source: S,
    backend: B,
    query: Q,
    settings: AggregatorSettings,
}

impl<S, B, Q> fmt::Debug for RunAggregator<S, B, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunAggregator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Whether `run_id` can name a run.
///
/// Run identifiers become directory names, so they must be a single plain
/// path segment.
#[must_use]
pub fn is_valid_run_id(run_id: &str) -> bool {
    !run_id.is_empty()
        && run_id != "."
        && run_id != ".."
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

async fn extract(archive: &Path, dest: &Path) -> ExtractResult<UnpackStats> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let stats = unpack(&archive, &dest)?;
        open_permissions(&dest)?;
        Ok(stats)
    })
    .await
    .map_err(|e| ExtractError::Io(io::Error::other(e)))?
}

impl<S, B, Q> RunAggregator<S, B, Q>
where
    S: RunSource,
    B: QueryBackend,
    Q: RangeQuery,
{
    /// Creates an aggregator.
    #[must_use]
    pub fn new(source: S, backend: B, query: Q, settings: AggregatorSettings) -> Self {
        Self {
            source,
            backend,
            query,
            settings,
        }
    }

    /// Collection settings.
    #[must_use]
    pub const fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Process every run in order and gather their rows.
    ///
    /// Never fails as a whole: each run's fate is in its report.
    pub async fn collect(&self, run_ids: &[String]) -> Harvest {
        let mut harvest = Harvest::default();

        for run_id in run_ids {
            let report = self.process(run_id, &mut harvest.rows).await;
            log_report(&report);
            harvest.reports.push(report);
        }

        info!(
            runs = harvest.reports.len(),
            rows = harvest.rows.len(),
            complete = harvest.count("complete"),
            partial = harvest.count("partial"),
            empty = harvest.count("empty-archive"),
            failed = harvest.count("failed"),
            "collection finished"
        );
        harvest
    }

    async fn process(&self, run_id: &str, rows: &mut Vec<FlatRow>) -> RunReport {
        if !is_valid_run_id(run_id) {
            return RunReport {
                run_id: run_id.to_string(),
                outcome: None,
                rows: 0,
                status: RunStatus::Failed {
                    stage: RunStage::Fetching,
                    reason: format!("invalid run id {run_id:?}"),
                },
            };
        }

        let run_dir = self.settings.run_dir(run_id);
        info!(run_id, dir = %run_dir.display(), "fetching run");
        let (metadata, archive) = match self.source.fetch(run_id, &run_dir).await {
            Ok(FetchOutcome::Ready { metadata, archive }) => (metadata, archive),
            Ok(FetchOutcome::Empty {
                metadata,
                archive_bytes,
            }) => {
                debug!(run_id, archive_bytes, "recording metadata-only row");
                rows.push(FlatRow::metadata_only(&metadata, &self.settings.step));
                return RunReport {
                    run_id: run_id.to_string(),
                    outcome: Some(metadata.outcome),
                    rows: 1,
                    status: RunStatus::EmptyArchive,
                };
            }
            Err(e) => {
                return RunReport::failed(run_id, None, RunStage::Fetching, &RunError::from(e));
            }
        };
        let outcome = Some(metadata.outcome);

        let data_dir = run_dir.join(DATA_DIR_NAME);
        debug!(run_id, archive = %archive.display(), "extracting archive");
        match extract(&archive, &data_dir).await {
            Ok(stats) => {
                debug!(run_id, files = stats.files, bytes = stats.bytes, "archive extracted");
            }
            Err(e) => {
                return RunReport::failed(run_id, outcome, RunStage::Extracting, &RunError::from(e));
            }
        }

        let handle = match self.backend.start(self.settings.port, &data_dir).await {
            Ok(handle) => handle,
            Err(e) => {
                return RunReport::failed(run_id, outcome, RunStage::BackendUp, &RunError::from(e));
            }
        };
        info!(run_id, handle = %handle, backend = self.backend.name(), "backend up");

        let endpoint = handle.endpoint();
        let mut run_rows = Vec::new();
        let mut failed_metrics = Vec::new();
        for metric in &self.settings.metrics {
            match self.query_metric(&endpoint, metric, &metadata).await {
                Ok(metric_rows) => {
                    debug!(run_id, metric = %metric, rows = metric_rows.len(), "metric collected");
                    run_rows.extend(metric_rows);
                }
                Err(e) => {
                    warn!(run_id, metric = %metric, error = %e, "metric failed");
                    failed_metrics.push(MetricFailure {
                        metric: metric.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let stopped = self.backend.stop(&handle).await;

        let produced = run_rows.len();
        rows.extend(run_rows);

        let status = match stopped {
            Err(e) => RunStatus::Failed {
                stage: RunStage::BackendDown,
                reason: RunError::from(e).to_string(),
            },
            Ok(()) if failed_metrics.is_empty() => RunStatus::Complete,
            Ok(()) => RunStatus::Partial { failed_metrics },
        };

        RunReport {
            run_id: run_id.to_string(),
            outcome,
            rows: produced,
            status,
        }
    }

    async fn query_metric(
        &self,
        endpoint: &str,
        metric: &str,
        run: &RunMetadata,
    ) -> Result<Vec<FlatRow>, MetricError> {
        let spec = QuerySpec::for_run(metric, &self.settings.template, &self.settings.step, run)?;
        let result = self.query.execute(endpoint, &spec).await?;
        Ok(flatten(&result, run, &spec)?)
    }
}

fn log_report(report: &RunReport) {
    let run_id = report.run_id.as_str();
    match &report.status {
        RunStatus::Complete => info!(run_id, rows = report.rows, "run complete"),
        RunStatus::Partial { failed_metrics } => warn!(
            run_id,
            rows = report.rows,
            failed = failed_metrics.len(),
            "run partially collected"
        ),
        RunStatus::EmptyArchive => info!(run_id, "run has no metrics data"),
        RunStatus::Failed { stage, reason } => {
            error!(run_id, stage = %stage, reason = %reason, rows = report.rows, "run failed");
        }
    }
}
