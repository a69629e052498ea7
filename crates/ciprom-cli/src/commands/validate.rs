//! Validate command implementation.

use std::io::Write;
use std::path::PathBuf;

use crate::config::HarvestConfig;
use crate::error::CliError;
use crate::output::{ConfigSummary, OutputFormat};

/// Validate command executor.
#[derive(Debug, Clone)]
pub struct ValidateCommand {
    config_path: PathBuf,
}

impl ValidateCommand {
    /// Create a new validate command.
    #[must_use]
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    /// Load the configuration and print what a collection would use.
    ///
    /// # Errors
    ///
    /// Returns an error listing every problem if the configuration is
    /// unreadable or invalid.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let config = HarvestConfig::from_file(&self.config_path)?;
        let summary = self.summarize(&config);
        format.write(writer, &summary)?;
        Ok(())
    }

    fn summarize(&self, config: &HarvestConfig) -> ConfigSummary {
        ConfigSummary {
            config: self.config_path.display().to_string(),
            test_ids: config.test_ids.len(),
            metrics: config.metrics.clone(),
            step: config.step.clone(),
            job_name: config.source.job_name.clone(),
            image: config.backend.image.clone(),
            results: config.results_path().display().to_string(),
        }
    }
}
