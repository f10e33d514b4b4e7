use crate::batch::BatchEvaluator;
use crate::discovery::MetricDiscoverer;
use crate::error::{cancellable, EnrichError, Result};
use crate::period::EvaluationWindow;
use alarmlens_cloud::{AlarmSource, MetricCatalog, MetricDataSource};
use alarmlens_common::types::EnrichedResult;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Produces an [`EnrichedResult`] for a named alarm.
#[async_trait::async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, alarm_name: &str, cancel: &CancellationToken) -> Result<EnrichedResult>;
}

/// Enricher backed by an alarm source, a metric catalog and a time-series source.
pub struct AlarmEnricher {
    alarms: Arc<dyn AlarmSource>,
    discoverer: MetricDiscoverer,
    evaluator: BatchEvaluator,
    parent_span: Option<tracing::Span>,
}

impl AlarmEnricher {
    pub fn new(
        alarms: Arc<dyn AlarmSource>,
        catalog: Arc<dyn MetricCatalog>,
        data: Arc<dyn MetricDataSource>,
    ) -> Self {
        Self {
            alarms,
            discoverer: MetricDiscoverer::new(catalog),
            evaluator: BatchEvaluator::new(data),
            parent_span: None,
        }
    }

    /// Build from one client that serves all three roles.
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: AlarmSource + MetricCatalog + MetricDataSource + 'static,
    {
        Self::new(client.clone(), client.clone(), client)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.evaluator = self.evaluator.with_batch_size(batch_size);
        self
    }

    /// Nest every run's `enrich` span under `span` instead of the caller's
    /// current span.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.parent_span = Some(span);
        self
    }

    fn run_span(&self, alarm_name: &str) -> tracing::Span {
        match &self.parent_span {
            Some(parent) => tracing::info_span!(parent: parent, "enrich", alarm = %alarm_name),
            None => tracing::info_span!("enrich", alarm = %alarm_name),
        }
    }

    /// Enrich `alarm_name` as of `now`.
    pub async fn enrich_at(
        &self,
        alarm_name: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<EnrichedResult> {
        self.run(alarm_name, now, cancel)
            .instrument(self.run_span(alarm_name))
            .await
    }

    async fn run(
        &self,
        alarm_name: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<EnrichedResult> {
        let alarm = cancellable(cancel, self.alarms.fetch_alarm(alarm_name))
            .await
            .map_err(|e| {
                e.attribute(|source| EnrichError::AlarmLookup {
                    alarm: alarm_name.to_string(),
                    source,
                })
            })?
            .ok_or_else(|| EnrichError::AlarmNotFound(alarm_name.to_string()))?;

        if !alarm.is_in_alarm() {
            tracing::info!(state = %alarm.state, "Alarm is no longer firing, skipping analysis");
            return Ok(EnrichedResult::resolved(alarm, now));
        }

        let candidates = self
            .discoverer
            .discover(&alarm.namespace, &alarm.metric_name, &alarm.dimensions, cancel)
            .await
            .map_err(|e| {
                e.attribute(|source| EnrichError::Discovery {
                    alarm: alarm_name.to_string(),
                    source,
                })
            })?;

        if candidates.is_empty() {
            tracing::warn!(
                namespace = %alarm.namespace,
                metric = %alarm.metric_name,
                "No metrics found under the alarm dimensions"
            );
            return Ok(EnrichedResult::new(alarm, now));
        }

        let window = EvaluationWindow::for_alarm(&alarm, now);
        let violating = self
            .evaluator
            .evaluate(&alarm, &candidates, window.start, window.end, cancel)
            .await
            .map_err(|e| {
                e.attribute(|source| EnrichError::Evaluation {
                    alarm: alarm_name.to_string(),
                    source,
                })
            })?;

        if violating.is_empty() {
            tracing::warn!(
                candidates = candidates.len(),
                "Alarm is firing but no metric is over the threshold"
            );
        } else {
            tracing::info!(
                candidates = candidates.len(),
                violating = violating.len(),
                "Found violating metrics"
            );
        }

        let mut result = EnrichedResult::new(alarm, now);
        result.violating_metrics = violating;
        Ok(result)
    }
}

#[async_trait::async_trait]
impl Enricher for AlarmEnricher {
    async fn enrich(&self, alarm_name: &str, cancel: &CancellationToken) -> Result<EnrichedResult> {
        self.enrich_at(alarm_name, Utc::now(), cancel).await
    }
}
