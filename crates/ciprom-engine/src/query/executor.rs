//! Range query execution with bounded retry.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use super::response::RangeResult;
use crate::error::{QueryError, QueryResult};
use crate::types::QuerySpec;

/// Path of the range query API below the backend endpoint.
pub const QUERY_RANGE_PATH: &str = "/api/v1/query_range";

/// Bounded, fixed-delay retry for range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Creates a retry policy.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidSpec` if `max_attempts` is zero or the
    /// attempt timeout is not strictly shorter than the delay.
    pub fn new(max_attempts: u32, delay: Duration, attempt_timeout: Duration) -> QueryResult<Self> {
        if max_attempts == 0 {
            return Err(QueryError::InvalidSpec {
                reason: "max_attempts must be at least 1".to_string(),
            });
        }
        if attempt_timeout.is_zero() || attempt_timeout >= delay {
            return Err(QueryError::InvalidSpec {
                reason: format!(
                    "attempt timeout ({attempt_timeout:?}) must be non-zero and shorter than the retry delay ({delay:?})"
                ),
            });
        }
        Ok(Self {
            max_attempts,
            delay,
            attempt_timeout,
        })
    }

    /// Total attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait between attempts.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Network timeout of a single attempt.
    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }
}

/// Executes range queries against a backend endpoint.
pub trait RangeQuery: Send + Sync {
    /// Run `spec` against `endpoint` (e.g. `http://127.0.0.1:9090`).
    ///
    /// # Errors
    ///
    /// Returns `QueryFailed` once retries are exhausted and `Decode` for a
    /// malformed response.
    fn execute<'a>(
        &'a self,
        endpoint: &'a str,
        spec: &'a QuerySpec,
    ) -> Pin<Box<dyn Future<Output = QueryResult<RangeResult>> + Send + 'a>>;
}

/// HTTP range query executor.
#[derive(Debug, Clone)]
pub struct RangeQueryExecutor {
    client: Client,
    policy: RetryPolicy,
}

impl RangeQueryExecutor {
    /// Creates an executor; every request is bounded by the policy's attempt
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(policy: RetryPolicy) -> QueryResult<Self> {
        let client = Client::builder()
            .timeout(policy.attempt_timeout())
            .build()
            .map_err(|e| QueryError::InvalidSpec {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, policy })
    }

    /// The retry policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Build the request URL with `query`, `start`, `end`, `step` encoded in
    /// that order.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidSpec` if the endpoint is not a valid URL.
    pub fn request_url(endpoint: &str, spec: &QuerySpec) -> QueryResult<Url> {
        let base = format!("{}{QUERY_RANGE_PATH}", endpoint.trim_end_matches('/'));
        Url::parse_with_params(&base, spec.params()).map_err(|e| QueryError::InvalidSpec {
            reason: format!("invalid endpoint {endpoint:?}: {e}"),
        })
    }

    /// One attempt. `Err` carries a retryable failure description.
    async fn attempt(&self, url: &Url) -> Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(format!("unexpected status {status}"));
        }

        response
            .bytes()
            .await
            .map(|body| body.to_vec())
            .map_err(|e| e.to_string())
    }

    /// Run a range query, retrying transport failures and non-200 responses.
    ///
    /// # Errors
    ///
    /// See [`RangeQuery::execute`].
    pub async fn query_range(&self, endpoint: &str, spec: &QuerySpec) -> QueryResult<RangeResult> {
        let url = Self::request_url(endpoint, spec)?;
        let metric = spec.metric_name();
        let max_attempts = self.policy.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(&url).await {
                Ok(body) => {
                    let result = RangeResult::decode(&body)?;
                    if !result.success {
                        return Err(QueryError::Decode {
                            reason: format!(
                                "server reported failure: {}",
                                result.error.as_deref().unwrap_or("no error message")
                            ),
                        });
                    }
                    debug!(metric, attempt, series = result.series.len(), "range query succeeded");
                    return Ok(result);
                }
                Err(reason) => {
                    warn!(metric, attempt, max_attempts, error = %reason, "range query attempt failed");
                    last_error = reason;
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.delay()).await;
                    }
                }
            }
        }

        Err(QueryError::QueryFailed {
            metric: metric.to_string(),
            attempts: max_attempts,
            last_error,
        })
    }
}

impl RangeQuery for RangeQueryExecutor {
    fn execute<'a>(
        &'a self,
        endpoint: &'a str,
        spec: &'a QuerySpec,
    ) -> Pin<Box<dyn Future<Output = QueryResult<RangeResult>> + Send + 'a>> {
        Box::pin(self.query_range(endpoint, spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::extract::{Query, State};
    use axum::http::StatusCode as HttpStatus;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tokio::net::TcpListener;

    use crate::types::Step;

    #[derive(Clone)]
    struct Endpoint {
        hits: Arc<AtomicU32>,
        fail_first: u32,
        body: serde_json::Value,
    }

    async fn query_range(
        State(endpoint): State<Endpoint>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        let n = endpoint.hits.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= endpoint.fail_first {
            return (HttpStatus::SERVICE_UNAVAILABLE, "warming up").into_response();
        }
        if params.get("step").map(String::as_str) != Some("1m") {
            return (HttpStatus::BAD_REQUEST, "missing step").into_response();
        }
        Json(endpoint.body.clone()).into_response()
    }

    async fn serve(fail_first: u32, body: serde_json::Value) -> (String, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let state = Endpoint {
            hits: Arc::clone(&hits),
            fail_first,
            body,
        };
        let router = Router::new()
            .route(QUERY_RANGE_PATH, get(query_range))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        (format!("http://{addr}"), hits)
    }

    fn matrix() -> serde_json::Value {
        json!({
            "status": "success",
            "data": {
                "resultType": "matrix",
                "result": [
                    {"metric": {"pod": "etcd-master-0"}, "values": [[1_569_934_191, "0.004"]]}
                ]
            }
        })
    }

    fn spec() -> QuerySpec {
        QuerySpec::new(
            "etcd_disk_wal_fsync_duration_seconds_bucket",
            "histogram_quantile(0.99, rate(etcd_disk_wal_fsync_duration_seconds_bucket[1m]))",
            Step::default(),
            Utc.timestamp_opt(1_569_934_191, 0).single().expect("start"),
            Utc.timestamp_opt(1_569_939_439, 0).single().expect("end"),
        )
        .expect("spec")
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(30), Duration::from_millis(20)).expect("policy")
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.delay(), Duration::from_secs(5));
        assert!(policy.attempt_timeout() < policy.delay());
    }

    #[test]
    fn test_policy_rejects_timeout_not_below_delay() {
        let secs = Duration::from_secs;
        assert!(RetryPolicy::new(5, secs(5), secs(5)).is_err());
        assert!(RetryPolicy::new(5, secs(5), secs(10)).is_err());
        assert!(RetryPolicy::new(0, secs(5), secs(4)).is_err());
        assert!(RetryPolicy::new(1, secs(5), Duration::ZERO).is_err());
    }

    #[test]
    fn test_request_url_encodes_params_in_order() {
        let url = RangeQueryExecutor::request_url("http://127.0.0.1:9090/", &spec()).expect("url");
        assert_eq!(url.path(), "/api/v1/query_range");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["query", "start", "end", "step"]);
        assert_eq!(pairs[0].1, spec().expression());
        assert_eq!(pairs[1].1, "2019-10-01T12:49:51Z");

        // Brackets, parentheses and commas never appear raw in the query string.
        let raw = url.query().expect("query");
        assert!(!raw.contains('['));
        assert!(!raw.contains(' '));
    }

    #[tokio::test]
    async fn test_succeeds_on_fifth_attempt() {
        let (endpoint, hits) = serve(4, matrix()).await;
        let executor = RangeQueryExecutor::new(fast_policy()).expect("executor");

        let result = executor.execute(&endpoint, &spec()).await.expect("query");
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        assert_eq!(result.series.len(), 1);
        assert_eq!(result.series[0].labels.pod, "etcd-master-0");
    }

    #[tokio::test]
    async fn test_fails_after_exactly_max_attempts() {
        let (endpoint, hits) = serve(u32::MAX, matrix()).await;
        let executor = RangeQueryExecutor::new(fast_policy()).expect("executor");

        let err = executor.execute(&endpoint, &spec()).await.expect_err("always failing");
        assert_eq!(hits.load(Ordering::SeqCst), 5);
        match err {
            QueryError::QueryFailed {
                metric,
                attempts,
                last_error,
            } => {
                assert_eq!(metric, "etcd_disk_wal_fsync_duration_seconds_bucket");
                assert_eq!(attempts, 5);
                assert!(last_error.contains("503"), "{last_error}");
            }
            other => panic!("expected QueryFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_decode_error_is_not_retried() {
        let body = json!({"status": "success", "data": {"resultType": "matrix", "result": [
            {"metric": {"pod": "etcd-master-0"}, "values": [[1, "2", "3"]]}
        ]}});
        let (endpoint, hits) = serve(0, body).await;
        let executor = RangeQueryExecutor::new(fast_policy()).expect("executor");

        let err = executor.execute(&endpoint, &spec()).await.expect_err("malformed");
        assert!(matches!(err, QueryError::Decode { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hung_attempt_times_out_and_retries() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            QUERY_RANGE_PATH,
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    "too late"
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        let policy =
            RetryPolicy::new(3, Duration::from_millis(30), Duration::from_millis(20)).expect("policy");
        let executor = RangeQueryExecutor::new(policy).expect("executor");
        let err = executor
            .execute(&format!("http://{addr}"), &spec())
            .await
            .expect_err("timeouts");
        assert!(matches!(err, QueryError::QueryFailed { attempts: 3, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_exhausts_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let executor = RangeQueryExecutor::new(fast_policy()).expect("executor");
        let err = executor
            .execute(&format!("http://{addr}"), &spec())
            .await
            .expect_err("refused");
        assert!(matches!(err, QueryError::QueryFailed { attempts: 5, .. }));
    }
}
