//! Range query response model and decoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{QueryError, QueryResult};

/// Labels of one series. Well-known target labels are broken out; anything
/// else lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesLabels {
    /// Pod the series was scraped from.
    pub pod: String,
    /// Pod namespace.
    pub namespace: String,
    /// Scrape job.
    pub job: String,
    /// Scrape target address.
    pub instance: String,
    /// Target endpoint name.
    pub endpoint: String,
    /// Service fronting the target.
    pub service: String,
    /// All other labels.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl SeriesLabels {
    /// Labels for a series scraped from `pod`.
    #[must_use]
    pub fn for_pod(pod: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            ..Self::default()
        }
    }
}

/// A single sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix timestamp in seconds.
    pub timestamp: f64,
    /// Sample value.
    pub value: f64,
}

/// One labeled, time-ascending sequence of samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Target labels.
    pub labels: SeriesLabels,
    /// Samples in timestamp order.
    pub samples: Vec<Sample>,
}

impl Series {
    /// Creates a series from labels and `(timestamp, value)` pairs.
    #[must_use]
    pub fn new(labels: SeriesLabels, samples: impl IntoIterator<Item = (f64, f64)>) -> Self {
        Self {
            labels,
            samples: samples
                .into_iter()
                .map(|(timestamp, value)| Sample { timestamp, value })
                .collect(),
        }
    }

    /// Sample values in order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.value)
    }
}

/// A decoded range query response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RangeResult {
    /// Whether the server reported success.
    pub success: bool,
    /// Matched series, in response order.
    pub series: Vec<Series>,
    /// Server-side error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(alias = "success")]
    status: String,
    #[serde(default)]
    data: Option<WireData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireData {
    #[serde(rename = "resultType", default)]
    result_type: String,
    #[serde(default)]
    result: Vec<WireSeries>,
}

#[derive(Debug, Deserialize)]
struct WireSeries {
    #[serde(default)]
    metric: SeriesLabels,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

fn decode_error(reason: impl Into<String>) -> QueryError {
    QueryError::Decode {
        reason: reason.into(),
    }
}

fn number(value: &Value, what: &str) -> QueryResult<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| decode_error(format!("{what} {n} is not representable"))),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| decode_error(format!("{what} {s:?} is not a number"))),
        other => Err(decode_error(format!("{what} has unexpected type: {other}"))),
    }
}

impl RangeResult {
    /// A successful result holding `series`.
    #[must_use]
    pub fn with_series(series: Vec<Series>) -> Self {
        Self {
            success: true,
            series,
            error: None,
        }
    }

    /// Decode a `query_range` response body.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Decode` if the body is not JSON of the expected
    /// shape, the result is not a matrix, or any sample is not a
    /// `[timestamp, value]` pair.
    pub fn decode(body: &[u8]) -> QueryResult<Self> {
        let wire: WireResponse =
            serde_json::from_slice(body).map_err(|e| decode_error(e.to_string()))?;
        let success = wire.status == "success";

        let Some(data) = wire.data else {
            if success {
                return Err(decode_error("successful response has no data"));
            }
            return Ok(Self {
                success,
                series: Vec::new(),
                error: wire.error,
            });
        };

        if !data.result_type.is_empty() && data.result_type != "matrix" {
            return Err(decode_error(format!(
                "expected matrix result, got {}",
                data.result_type
            )));
        }

        let mut series = Vec::with_capacity(data.result.len());
        for wire_series in data.result {
            let mut samples = Vec::with_capacity(wire_series.values.len());
            for pair in &wire_series.values {
                let [timestamp, value] = pair.as_slice() else {
                    return Err(decode_error(format!(
                        "sample for pod {:?} has {} elements, expected 2",
                        wire_series.metric.pod,
                        pair.len()
                    )));
                };
                samples.push(Sample {
                    timestamp: number(timestamp, "timestamp")?,
                    value: number(value, "value")?,
                });
            }
            series.push(Series {
                labels: wire_series.metric,
                samples,
            });
        }

        Ok(Self {
            success,
            series,
            error: wire.error,
        })
    }
}
