//! Range queries against a query backend.

mod executor;
mod response;

pub use executor::{RangeQuery, RangeQueryExecutor, RetryPolicy, QUERY_RANGE_PATH};
pub use response::{RangeResult, Sample, Series, SeriesLabels};
