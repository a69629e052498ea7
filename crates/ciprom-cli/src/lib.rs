//! # ciprom-cli
//!
//! Command-line interface for collecting archived CI Prometheus metrics.
//!
//! Provides commands for:
//! - Collecting metrics for a list of test runs into one CSV file
//! - Validating a configuration file
//! - Writing a sample configuration
//!
//! # Architecture
//!
//! The CLI loads a [`config::HarvestConfig`], wires the engine's artifact
//! retriever and range query executor to a Docker-hosted Prometheus, and
//! hands them to a [`ciprom_engine::RunAggregator`].
//!
//! ```text
//! ┌────────────┐  HTTP   ┌────────────────┐
//! │ ciprom-cli │────────►│ artifact store │
//! └─────┬──────┘         └────────────────┘
//!       │ Docker API + HTTP
//!       ▼
//! ┌────────────────────┐
//! │ prometheus (local) │
//! └────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod output;

pub use cli::{Cli, CollectArgs, Commands, Format};
pub use config::HarvestConfig;
pub use error::CliError;
pub use output::OutputFormat;
