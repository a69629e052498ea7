//! Core types for the collection engine.
//!
//! - [`RunMetadata`]: start/finish time and outcome of one CI run
//! - [`Step`]: a validated range query resolution such as `1m`
//! - [`QueryTemplate`]: the expression rendered per metric
//! - [`QuerySpec`]: one fully parameterized range query

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Regex for valid steps: an ASCII count followed by a single unit letter.
static STEP_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+[a-zA-Z]$").unwrap_or_else(|_| unreachable!()));

/// Outcome of a CI run as reported by its finish metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    /// The run succeeded.
    Passed,
    /// The run failed.
    Failed,
    /// The finish metadata does not say.
    Unknown,
}

impl RunOutcome {
    /// Derive the outcome from the `result` string, falling back to the
    /// `passed` flag.
    #[must_use]
    pub fn from_finished(result: Option<&str>, passed: Option<bool>) -> Self {
        match result.map(str::to_ascii_uppercase).as_deref() {
            Some("SUCCESS" | "PASSED") => Self::Passed,
            Some("FAILURE" | "FAILED") => Self::Failed,
            _ => match passed {
                Some(true) => Self::Passed,
                Some(false) => Self::Failed,
                None => Self::Unknown,
            },
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "PASSED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Metadata of one CI run. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Run identifier.
    pub run_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Pass/fail outcome.
    pub outcome: RunOutcome,
}

impl RunMetadata {
    /// Creates run metadata.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcome: RunOutcome,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            started_at,
            finished_at,
            outcome,
        }
    }
}

/// Formats a timestamp the way rows and query parameters carry it.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A validated range query step.
///
/// Steps must be one or more digits followed by exactly one ASCII letter
/// (`1m`, `30s`, `5h`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Step(String);

impl Step {
    /// Parses a step string.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidStep` if the string does not match
    /// `^[0-9]+[a-zA-Z]$` (ASCII digits only).
    pub fn parse(step: &str) -> QueryResult<Self> {
        if STEP_REGEX.is_match(step) {
            Ok(Self(step.to_string()))
        } else {
            Err(QueryError::InvalidStep {
                step: step.to_string(),
            })
        }
    }

    /// Returns the step as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Step {
    fn default() -> Self {
        Self("1m".to_string())
    }
}

impl TryFrom<String> for Step {
    type Error = QueryError;

    fn try_from(value: String) -> QueryResult<Self> {
        Self::parse(&value)
    }
}

impl From<Step> for String {
    fn from(step: Step) -> Self {
        step.0
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Expression template rendered once per metric.
///
/// `{metric}` is replaced by the metric name and `{step}` by the step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueryTemplate(String);

impl QueryTemplate {
    /// Placeholder for the metric name.
    pub const METRIC: &'static str = "{metric}";
    /// Placeholder for the step.
    pub const STEP: &'static str = "{step}";

    /// Creates a template.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidSpec` if the template lacks `{metric}`.
    pub fn new(template: impl Into<String>) -> QueryResult<Self> {
        let template = template.into();
        if !template.contains(Self::METRIC) {
            return Err(QueryError::InvalidSpec {
                reason: format!("query template must contain {}: {template}", Self::METRIC),
            });
        }
        Ok(Self(template))
    }

    /// Renders the expression for one metric.
    #[must_use]
    pub fn render(&self, metric: &str, step: &Step) -> String {
        self.0
            .replace(Self::METRIC, metric)
            .replace(Self::STEP, step.as_str())
    }

    /// Returns the raw template.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueryTemplate {
    fn default() -> Self {
        Self("histogram_quantile(0.99, rate({metric}[{step}]))".to_string())
    }
}

impl TryFrom<String> for QueryTemplate {
    type Error = QueryError;

    fn try_from(value: String) -> QueryResult<Self> {
        Self::new(value)
    }
}

impl From<QueryTemplate> for String {
    fn from(template: QueryTemplate) -> Self {
        template.0
    }
}

/// One range query: what to evaluate, over which window, at which step.
///
/// Immutable once built; yields exactly one HTTP-level range query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    metric_name: String,
    expression: String,
    step: Step,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl QuerySpec {
    /// Creates a query specification.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidSpec` if the metric name or expression is
    /// empty, or if `start` is after `end`.
    pub fn new(
        metric_name: impl Into<String>,
        expression: impl Into<String>,
        step: Step,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> QueryResult<Self> {
        let metric_name = metric_name.into();
        let expression = expression.into();

        if metric_name.trim().is_empty() {
            return Err(QueryError::InvalidSpec {
                reason: "metric name cannot be empty".to_string(),
            });
        }
        if expression.trim().is_empty() {
            return Err(QueryError::InvalidSpec {
                reason: "query expression cannot be empty".to_string(),
            });
        }
        if start > end {
            return Err(QueryError::InvalidSpec {
                reason: format!(
                    "start {} is after end {}",
                    format_timestamp(&start),
                    format_timestamp(&end)
                ),
            });
        }

        Ok(Self {
            metric_name,
            expression,
            step,
            start,
            end,
        })
    }

    /// Builds the query for `metric` over a run's time bounds.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidSpec` if the run finished before it started.
    pub fn for_run(
        metric: &str,
        template: &QueryTemplate,
        step: &Step,
        run: &RunMetadata,
    ) -> QueryResult<Self> {
        Self::new(
            metric,
            template.render(metric, step),
            step.clone(),
            run.started_at,
            run.finished_at,
        )
    }

    /// Metric name the query was built for.
    #[must_use]
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Fully rendered query expression.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Query resolution.
    #[must_use]
    pub const fn step(&self) -> &Step {
        &self.step
    }

    /// Window start.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Window end.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Request parameters in their fixed wire order.
    #[must_use]
    pub fn params(&self) -> [(&'static str, String); 4] {
        [
            ("query", self.expression.clone()),
            ("start", format_timestamp(&self.start)),
            ("end", format_timestamp(&self.end)),
            ("step", self.step.to_string()),
        ]
    }
}
