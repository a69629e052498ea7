//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats for summaries,
//! and CSV for the collected rows.

use std::borrow::Cow;
use std::io::{self, Write};

use serde::Serialize;

use ciprom_engine::{FlatRow, Harvest, RunReport, RunStatus};

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Get the current format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// Result of a `collect` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct CollectSummary {
    /// Where the rows were written.
    pub output: String,
    /// Rows written.
    pub rows: usize,
    /// One report per requested run.
    pub runs: Vec<RunReport>,
}

impl CollectSummary {
    /// Summarize a harvest written to `output`.
    #[must_use]
    pub fn new(output: impl Into<String>, harvest: &Harvest) -> Self {
        Self {
            output: output.into(),
            rows: harvest.rows.len(),
            runs: harvest.reports.clone(),
        }
    }
}

fn status_detail(status: &RunStatus) -> String {
    match status {
        RunStatus::Complete => String::new(),
        RunStatus::EmptyArchive => "no metrics data in archive".to_string(),
        RunStatus::Partial { failed_metrics } => failed_metrics
            .iter()
            .map(|f| format!("{}: {}", f.metric, f.reason))
            .collect::<Vec<_>>()
            .join("; "),
        RunStatus::Failed { stage, reason } => format!("{stage}: {reason}"),
    }
}

impl TableDisplay for CollectSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.runs.is_empty() {
            writeln!(writer, "No runs collected")?;
            return Ok(());
        }

        // Header
        writeln!(
            writer,
            "{:<12}  {:<8}  {:<13}  {:>6}  DETAIL",
            "RUN", "OUTCOME", "STATUS", "ROWS"
        )?;
        writeln!(writer, "{}", "─".repeat(72))?;

        // Rows
        for run in &self.runs {
            let outcome = run
                .outcome
                .map_or_else(|| "-".to_string(), |o| o.to_string());
            writeln!(
                writer,
                "{:<12}  {:<8}  {:<13}  {:>6}  {}",
                truncate(&run.run_id, 12),
                outcome,
                run.status.label(),
                run.rows,
                status_detail(&run.status)
            )?;
        }

        writeln!(writer)?;
        writeln!(
            writer,
            "Wrote {} row(s) for {} run(s) to {}",
            self.rows,
            self.runs.len(),
            self.output
        )?;
        Ok(())
    }
}

/// Result of a `validate` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    /// Configuration file.
    pub config: String,
    /// Number of test runs.
    pub test_ids: usize,
    /// Metrics per run.
    pub metrics: Vec<String>,
    /// Query step.
    pub step: String,
    /// Job in the artifact store.
    pub job_name: String,
    /// Backend image.
    pub image: String,
    /// Default CSV destination.
    pub results: String,
}

impl TableDisplay for ConfigSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Configuration OK: {}", self.config)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Test runs:        {}", self.test_ids)?;
        writeln!(writer, "Step:             {}", self.step)?;
        writeln!(writer, "Job:              {}", self.job_name)?;
        writeln!(writer, "Backend image:    {}", self.image)?;
        writeln!(writer, "Results:          {}", self.results)?;
        writeln!(writer)?;
        writeln!(writer, "Metrics")?;
        for metric in &self.metrics {
            writeln!(writer, "  {metric}")?;
        }
        Ok(())
    }
}

/// Truncate a string to a maximum length, adding "..." if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Quote a CSV field if it contains a delimiter, quote or line break.
fn csv_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\r', '\n']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Write rows as CSV, one record per row. Records may differ in length.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_csv<W: Write>(writer: &mut W, rows: &[FlatRow]) -> io::Result<()> {
    for row in rows {
        let record = row.to_record();
        let line = record
            .iter()
            .map(|field| csv_field(field))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(writer, "{line}")?;
    }
    writer.flush()
}
