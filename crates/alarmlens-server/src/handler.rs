use alarmlens_analysis::{EnrichError, Enricher};
use alarmlens_common::types::EnrichedResult;
use alarmlens_notify::error::NotifyError;
use alarmlens_notify::NotificationChannel;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// EventBridge "CloudWatch Alarm State Change" envelope. Only the fields the
/// handler reads are modelled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlarmEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "detail-type")]
    pub detail_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub detail: AlarmEventDetail,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlarmEventDetail {
    #[serde(default, rename = "alarmName")]
    pub alarm_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error(transparent)]
    Enrich(#[from] EnrichError),

    #[error("enrichment timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to dispatch result: {0}")]
    Dispatch(#[from] NotifyError),
}

/// Turns alarm state-change events into dispatched enrichment results.
pub struct EventHandler {
    enricher: Arc<dyn Enricher>,
    channel: Arc<dyn NotificationChannel>,
    timeout: Duration,
}

impl EventHandler {
    pub fn new(
        enricher: Arc<dyn Enricher>,
        channel: Arc<dyn NotificationChannel>,
        timeout: Duration,
    ) -> Self {
        Self {
            enricher,
            channel,
            timeout,
        }
    }

    pub fn channel_type(&self) -> &str {
        self.channel.channel_type()
    }

    /// Parse a raw event payload and handle it.
    pub async fn handle_json(
        &self,
        payload: &[u8],
        shutdown: &CancellationToken,
    ) -> Result<EnrichedResult, HandlerError> {
        let event: AlarmEvent = serde_json::from_slice(payload)
            .map_err(|e| HandlerError::InvalidEvent(format!("cannot parse event: {e}")))?;
        self.handle(&event, shutdown).await
    }

    /// Enrich the alarm named by `event` and dispatch the result, including
    /// results for alarms that have already resolved.
    pub async fn handle(
        &self,
        event: &AlarmEvent,
        shutdown: &CancellationToken,
    ) -> Result<EnrichedResult, HandlerError> {
        let alarm_name = event.detail.alarm_name.trim();
        if alarm_name.is_empty() {
            return Err(HandlerError::InvalidEvent(
                "alarm name is missing from event detail".to_string(),
            ));
        }

        let mut result = self.enrich(alarm_name, shutdown).await?;
        if !event.account.is_empty() {
            result.account_id = Some(event.account.clone());
        }

        self.channel.send(&result).await?;

        tracing::info!(
            alarm = %alarm_name,
            account = %event.account,
            channel = self.channel.channel_type(),
            violations = result.violating_metrics.len(),
            resolved = result.is_resolved(),
            "Event handled"
        );
        Ok(result)
    }

    /// Run the enricher under the handler's timeout, without dispatching.
    pub async fn enrich(
        &self,
        alarm_name: &str,
        shutdown: &CancellationToken,
    ) -> Result<EnrichedResult, HandlerError> {
        let cancel = shutdown.child_token();
        match tokio::time::timeout(self.timeout, self.enricher.enrich(alarm_name, &cancel)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                cancel.cancel();
                tracing::warn!(alarm = %alarm_name, timeout = ?self.timeout, "Enrichment timed out");
                Err(HandlerError::Timeout(self.timeout))
            }
        }
    }
}
