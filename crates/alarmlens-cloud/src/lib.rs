pub mod cloudwatch;
pub mod error;
pub mod http;
pub mod sigv4;

use alarmlens_common::types::{AlarmDescriptor, Dimension, MetricDescriptor, Statistic};
use chrono::{DateTime, Utc};
use error::Result;
use serde::{Deserialize, Serialize};

pub use cloudwatch::CloudWatchClient;
pub use sigv4::AwsCredentials;

/// Maximum number of queries accepted by a single GetMetricData call.
pub const GET_METRIC_DATA_MAX_QUERIES: usize = 500;

/// One time-series query inside a batched data request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    /// Synthetic identifier, `m<index>`, unique within a batch.
    pub id: String,
    pub metric: MetricDescriptor,
    pub period_secs: u32,
    pub statistic: Statistic,
    pub return_data: bool,
}

/// Data points returned for one query, ascending by time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricDataResult {
    pub id: String,
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
}

impl MetricDataResult {
    /// The newest data point, if the series is non-empty and the last value
    /// has a paired timestamp.
    pub fn latest(&self) -> Option<(f64, DateTime<Utc>)> {
        let idx = self.values.len().checked_sub(1)?;
        let timestamp = self.timestamps.get(idx)?;
        Some((self.values[idx], *timestamp))
    }
}

/// One page of a metric catalog listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricPage {
    pub metrics: Vec<MetricDescriptor>,
    pub next_token: Option<String>,
}

/// Source of alarm definitions and their current state.
#[async_trait::async_trait]
pub trait AlarmSource: Send + Sync {
    /// `Ok(None)` when no alarm with this name exists.
    async fn fetch_alarm(&self, name: &str) -> Result<Option<AlarmDescriptor>>;
}

/// Paged listing of known metrics.
#[async_trait::async_trait]
pub trait MetricCatalog: Send + Sync {
    /// Fetch one page of metrics whose dimensions include every pair in
    /// `filter`. The caller drives pagination until `next_token` is `None`.
    async fn list_metrics(
        &self,
        namespace: &str,
        metric_name: &str,
        filter: &[Dimension],
        next_token: Option<&str>,
    ) -> Result<MetricPage>;
}

/// Batched time-series queries.
#[async_trait::async_trait]
pub trait MetricDataSource: Send + Sync {
    /// Run up to [`GET_METRIC_DATA_MAX_QUERIES`] queries over `[start, end)`.
    async fn query_recent_data(
        &self,
        queries: &[MetricQuery],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricDataResult>>;
}
