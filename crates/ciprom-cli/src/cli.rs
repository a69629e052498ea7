//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "ciprom.toml";

/// ciprom - collect archived Prometheus metrics from CI runs.
#[derive(Parser, Debug, Clone)]
#[command(name = "ciprom")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(short, long, global = true, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Collect metrics for every configured test run and export them as CSV.
    Collect(CollectArgs),

    /// Load and validate a configuration file.
    Validate {
        /// Configuration file.
        #[arg(short, long, env = "CIPROM_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },

    /// Write a sample configuration file with default values.
    InitConfig {
        /// Destination file.
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Arguments for the collect command.
#[derive(Args, Debug, Clone)]
pub struct CollectArgs {
    /// Configuration file.
    #[arg(short, long, env = "CIPROM_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// CSV destination; defaults to `<data_dir>/results.csv`.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
