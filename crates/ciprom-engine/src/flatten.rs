//! Reduction of range query results to node-attributed rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FlattenError, FlattenResult};
use crate::query::RangeResult;
use crate::types::{format_timestamp, QuerySpec, RunMetadata, Step};

/// Node kinds recognized in pod labels.
const NODE_KINDS: [&str; 2] = ["master", "worker"];

/// One output row: a whole series reduced to its values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRow {
    /// Run identifier.
    pub run_id: String,
    /// Metric the row was queried for; empty for metadata-only rows.
    pub metric_name: String,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run finish.
    pub finished_at: DateTime<Utc>,
    /// Query step.
    pub step: String,
    /// Node the series belongs to; `None` for metadata-only rows.
    pub node_label: Option<String>,
    /// Sample values in series order.
    pub values: Vec<f64>,
}

impl FlatRow {
    /// Row recording only a run's time bounds, used when the run had no
    /// metrics data.
    #[must_use]
    pub fn metadata_only(run: &RunMetadata, step: &Step) -> Self {
        Self {
            run_id: run.run_id.clone(),
            metric_name: String::new(),
            started_at: run.started_at,
            finished_at: run.finished_at,
            step: step.to_string(),
            node_label: None,
            values: Vec::new(),
        }
    }

    /// Whether this row carries no series data.
    #[must_use]
    pub const fn is_metadata_only(&self) -> bool {
        self.node_label.is_none()
    }

    /// Render as output columns:
    /// `[run, metric, started, finished, step, node, value_0, ...]`.
    ///
    /// Metadata-only rows stop after `step`.
    #[must_use]
    pub fn to_record(&self) -> Vec<String> {
        let mut record = Vec::with_capacity(6 + self.values.len());
        record.push(self.run_id.clone());
        record.push(self.metric_name.clone());
        record.push(format_timestamp(&self.started_at));
        record.push(format_timestamp(&self.finished_at));
        record.push(self.step.clone());
        if let Some(node) = &self.node_label {
            record.push(node.clone());
            record.extend(self.values.iter().map(f64::to_string));
        }
        record
    }
}

/// Resolve the node a pod runs on: the suffix of `pod` starting at the
/// first occurrence of `master` or `worker`.
///
/// ```
/// use ciprom_engine::flatten::node_label;
///
/// assert_eq!(node_label("etcd-master-2"), Some("master-2"));
/// assert_eq!(node_label("node-exporter-worker-03"), Some("worker-03"));
/// assert_eq!(node_label("kube-apiserver"), None);
/// ```
#[must_use]
pub fn node_label(pod: &str) -> Option<&str> {
    NODE_KINDS
        .iter()
        .filter_map(|kind| pod.find(kind))
        .min()
        .map(|start| &pod[start..])
}

/// Flatten a range result into one row per series.
///
/// # Errors
///
/// Returns `FlattenError::NodeResolution` if any series' pod label names no
/// node; no rows are returned in that case.
pub fn flatten(
    result: &RangeResult,
    run: &RunMetadata,
    spec: &QuerySpec,
) -> FlattenResult<Vec<FlatRow>> {
    result
        .series
        .iter()
        .map(|series| {
            let pod = &series.labels.pod;
            let node = node_label(pod).ok_or_else(|| FlattenError::NodeResolution {
                pod: pod.clone(),
            })?;
            Ok(FlatRow {
                run_id: run.run_id.clone(),
                metric_name: spec.metric_name().to_string(),
                started_at: run.started_at,
                finished_at: run.finished_at,
                step: spec.step().to_string(),
                node_label: Some(node.to_string()),
                values: series.values().collect(),
            })
        })
        .collect()
}
