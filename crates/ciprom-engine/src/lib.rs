//! Retrieval and aggregation of archived CI Prometheus metrics.
//!
//! `ciprom-engine` turns the Prometheus snapshots that CI runs leave behind
//! into a flat, node-attributed dataset. For every run it:
//!
//! - fetches the run's start/finish metadata and TSDB archive ([`archive`])
//! - unpacks the archive and serves it from a disposable query backend
//!   ([`ciprom_backend::QueryBackend`])
//! - issues one range query per metric with bounded retry ([`query`])
//! - flattens each returned series into a [`FlatRow`] keyed by node
//!   ([`flatten`])
//!
//! [`RunAggregator`] drives those steps run by run and reports how each run
//! ended.
//!
//! # Example
//!
//! ```no_run
//! use ciprom_backend::{DockerBackend, PrometheusConfig};
//! use ciprom_engine::{
//!     AggregatorSettings, ArchiveRetriever, ArtifactLayout, QueryTemplate, RangeQueryExecutor,
//!     RetryPolicy, RunAggregator, Step,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let aggregator = RunAggregator::new(
//!     ArchiveRetriever::new(ArtifactLayout::default())?,
//!     DockerBackend::connect(PrometheusConfig::default())?,
//!     RangeQueryExecutor::new(RetryPolicy::default())?,
//!     AggregatorSettings {
//!         work_dir: "/var/lib/ciprom/promData".into(),
//!         metrics: vec!["etcd_disk_wal_fsync_duration_seconds_bucket".to_string()],
//!         step: Step::parse("1m")?,
//!         template: QueryTemplate::default(),
//!         port: 9090,
//!     },
//! );
//!
//! let harvest = aggregator.collect(&["330".to_string()]).await;
//! for row in &harvest.rows {
//!     println!("{}", row.to_record().join(","));
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod aggregator;
pub mod archive;
pub mod error;
pub mod flatten;
pub mod query;
pub mod types;

// Re-export main types at crate root
pub use aggregator::{
    is_valid_run_id, AggregatorSettings, Harvest, MetricFailure, RunAggregator, RunReport,
    RunStage, RunStatus,
};
pub use archive::{ArchiveRetriever, ArtifactLayout, FetchOutcome, RunSource};
pub use error::{
    ExtractError, FetchError, FlattenError, MetricError, QueryError, QueryResult, RunError,
};
pub use flatten::{flatten, node_label, FlatRow};
pub use query::{RangeQuery, RangeQueryExecutor, RangeResult, RetryPolicy, Series};
pub use types::{QuerySpec, QueryTemplate, RunMetadata, RunOutcome, Step};
