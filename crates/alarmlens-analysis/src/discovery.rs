use crate::error::{cancellable, StageError};
use alarmlens_cloud::MetricCatalog;
use alarmlens_common::types::{Dimension, MetricDescriptor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Running reduction of a catalog scan to the metrics with the most dimensions.
///
/// Metrics with fewer dimensions than the current maximum are dropped. A metric
/// with more dimensions resets the set. The starting maximum is the size of the
/// alarm filter, so nothing coarser than the alarm itself is ever kept.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    max_dimensions: usize,
    candidates: Vec<MetricDescriptor>,
}

impl CandidateSet {
    pub fn new(filter_size: usize) -> Self {
        Self {
            max_dimensions: filter_size,
            candidates: Vec::new(),
        }
    }

    pub fn offer(&mut self, metric: MetricDescriptor) {
        let n = metric.dimension_count();
        if n < self.max_dimensions {
            return;
        }
        if n > self.max_dimensions {
            self.candidates.clear();
            self.max_dimensions = n;
        }
        self.candidates.push(metric);
    }

    pub fn max_dimensions(&self) -> usize {
        self.max_dimensions
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn into_candidates(self) -> Vec<MetricDescriptor> {
        self.candidates
    }
}

/// Finds the most dimension-specific metrics under an alarm's filter.
pub struct MetricDiscoverer {
    catalog: Arc<dyn MetricCatalog>,
}

impl MetricDiscoverer {
    pub fn new(catalog: Arc<dyn MetricCatalog>) -> Self {
        Self { catalog }
    }

    /// Scan every catalog page and keep the metrics at the richest
    /// dimension level. An empty result is valid.
    pub async fn discover(
        &self,
        namespace: &str,
        metric_name: &str,
        filter: &[Dimension],
        cancel: &CancellationToken,
    ) -> Result<Vec<MetricDescriptor>, StageError> {
        let mut set = CandidateSet::new(filter.len());
        let mut next_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = cancellable(
                cancel,
                self.catalog
                    .list_metrics(namespace, metric_name, filter, next_token.as_deref()),
            )
            .await?;
            pages += 1;

            for metric in page.metrics {
                set.offer(metric);
            }

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(
            namespace,
            metric_name,
            pages,
            candidates = set.len(),
            max_dimensions = set.max_dimensions(),
            "Metric discovery complete"
        );

        Ok(set.into_candidates())
    }
}
