//! Init-config command implementation.

use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::HarvestConfig;
use crate::error::CliError;
use crate::output::{OutputFormat, TableDisplay};

const HEADER: &str = "\
# ciprom configuration
#
# Metrics are fetched for every entry of `test_ids`, queried against a
# throwaway Prometheus instance and written as CSV to `<data_dir>/results.csv`.

";

/// Sample run used in generated files.
const SAMPLE_TEST_ID: &str = "330";

/// Written configuration file.
#[derive(Debug, Clone, Serialize)]
pub struct InitSummary {
    /// Path of the new file.
    pub path: String,
}

impl TableDisplay for InitSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Wrote sample configuration to {}", self.path)?;
        Ok(())
    }
}

/// Init-config command executor.
#[derive(Debug, Clone)]
pub struct InitConfigCommand {
    output: PathBuf,
    force: bool,
}

impl InitConfigCommand {
    /// Create a new init-config command.
    #[must_use]
    pub fn new(output: impl Into<PathBuf>, force: bool) -> Self {
        Self {
            output: output.into(),
            force,
        }
    }

    /// Write a configuration with default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists and `force` is not set, or if
    /// writing fails.
    pub fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        if self.output.exists() && !self.force {
            return Err(CliError::Config(format!(
                "'{}' already exists; use --force to overwrite",
                self.output.display()
            )));
        }

        let config = HarvestConfig::new(vec![SAMPLE_TEST_ID.to_string()]);
        let content = format!("{HEADER}{}", config.to_toml()?);

        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.output, content)?;

        format.write(
            writer,
            &InitSummary {
                path: self.output.display().to_string(),
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_writes_loadable_config() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("ciprom.toml");
        let mut out = Vec::new();

        InitConfigCommand::new(&path, false)
            .execute(&mut out, &OutputFormat::default())
            .expect("init");

        let config = HarvestConfig::from_file(&path).expect("generated config loads");
        assert_eq!(config, HarvestConfig::new(vec!["330".to_string()]));

        let content = std::fs::read_to_string(&path).expect("read");
        assert!(content.starts_with("# ciprom configuration"));
        assert!(String::from_utf8(out).expect("utf8").contains("Wrote sample configuration"));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("ciprom.toml");
        std::fs::write(&path, "test_ids = [\"1\"]\n").expect("seed");

        let result = InitConfigCommand::new(&path, false).execute(&mut Vec::new(), &OutputFormat::default());

        assert!(matches!(result, Err(CliError::Config(msg)) if msg.contains("--force")));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "test_ids = [\"1\"]\n");
    }

    #[test]
    fn init_force_overwrites() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("ciprom.toml");
        std::fs::write(&path, "stale").expect("seed");

        InitConfigCommand::new(&path, true)
            .execute(&mut Vec::new(), &OutputFormat::default())
            .expect("init");

        assert!(HarvestConfig::from_file(&path).is_ok());
    }

    #[test]
    fn init_creates_parent_directories() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("conf").join("ciprom.toml");

        InitConfigCommand::new(&path, false)
            .execute(&mut Vec::new(), &OutputFormat::default())
            .expect("init");

        assert!(path.exists());
    }
}
