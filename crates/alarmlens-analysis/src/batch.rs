use crate::classifier::is_violating;
use crate::error::{cancellable, StageError};
use alarmlens_cloud::{MetricDataSource, MetricQuery, GET_METRIC_DATA_MAX_QUERIES};
use alarmlens_common::types::{AlarmDescriptor, MetricDescriptor, ViolatingMetric};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One query per candidate, identified by its index (`m0`, `m1`, ...).
pub fn build_queries(alarm: &AlarmDescriptor, candidates: &[MetricDescriptor]) -> Vec<MetricQuery> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, metric)| MetricQuery {
            id: format!("m{i}"),
            metric: metric.clone(),
            period_secs: alarm.period_secs,
            statistic: alarm.statistic.clone(),
            return_data: true,
        })
        .collect()
}

/// Runs candidate queries in sequential batches and classifies the newest
/// value of every series.
pub struct BatchEvaluator {
    source: Arc<dyn MetricDataSource>,
    batch_size: usize,
}

impl BatchEvaluator {
    pub fn new(source: Arc<dyn MetricDataSource>) -> Self {
        Self {
            source,
            batch_size: GET_METRIC_DATA_MAX_QUERIES,
        }
    }

    /// Use smaller batches than the provider limit. Clamped to `1..=500`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, GET_METRIC_DATA_MAX_QUERIES);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Evaluate every candidate over `[start, end)`.
    ///
    /// Batches run in order, one at a time. A failing batch fails the whole
    /// evaluation and results from earlier batches are discarded.
    pub async fn evaluate(
        &self,
        alarm: &AlarmDescriptor,
        candidates: &[MetricDescriptor],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ViolatingMetric>, StageError> {
        let queries = build_queries(alarm, candidates);
        let mut violating = Vec::new();

        for (batch, chunk) in queries.chunks(self.batch_size).enumerate() {
            let offset = batch * self.batch_size;
            let results = cancellable(cancel, self.source.query_recent_data(chunk, start, end)).await?;
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }

            tracing::debug!(
                batch,
                queries = chunk.len(),
                results = results.len(),
                "Metric batch returned"
            );

            let by_id: HashMap<&str, usize> = chunk
                .iter()
                .enumerate()
                .map(|(i, q)| (q.id.as_str(), offset + i))
                .collect();

            for (position, result) in results.iter().enumerate() {
                let index = if result.id.is_empty() {
                    offset + position
                } else {
                    match by_id.get(result.id.as_str()) {
                        Some(&index) => index,
                        None => {
                            tracing::warn!(id = %result.id, batch, "Ignoring result for unknown query id");
                            continue;
                        }
                    }
                };
                let Some(candidate) = candidates.get(index).filter(|_| index < offset + chunk.len()) else {
                    tracing::warn!(position, batch, "Ignoring result beyond the batch");
                    continue;
                };

                let Some((value, timestamp)) = result.latest() else {
                    tracing::debug!(id = %result.id, "No data points in window");
                    continue;
                };

                if is_violating(value, alarm.threshold, &alarm.comparison_operator) {
                    violating.push(ViolatingMetric {
                        value,
                        dimensions: candidate.dimension_map(),
                        timestamp,
                    });
                }
            }
        }

        Ok(violating)
    }
}
