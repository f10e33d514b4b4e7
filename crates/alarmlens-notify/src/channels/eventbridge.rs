use crate::error::{NotifyError, Result};
use crate::formatter::{JsonFormatter, MessageFormatter};
use crate::plugin::{ChannelContext, ChannelPlugin};
use crate::NotificationChannel;
use alarmlens_cloud::http::SignedHttpClient;
use alarmlens_common::types::EnrichedResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SERVICE: &str = "events";
pub const DEFAULT_SOURCE: &str = "cloudwatch.alarm.enricher";
pub const DEFAULT_DETAIL_TYPE: &str = "Alarm Enriched";

/// Puts the JSON rendering of a result onto an EventBridge bus.
pub struct EventBridgeChannel {
    http: SignedHttpClient,
    event_bus_arn: String,
    source: String,
    detail_type: String,
    formatter: JsonFormatter,
}

impl EventBridgeChannel {
    pub fn new(http: SignedHttpClient, event_bus_arn: &str) -> Self {
        Self {
            http,
            event_bus_arn: event_bus_arn.to_string(),
            source: DEFAULT_SOURCE.to_string(),
            detail_type: DEFAULT_DETAIL_TYPE.to_string(),
            formatter: JsonFormatter,
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub fn with_detail_type(mut self, detail_type: &str) -> Self {
        self.detail_type = detail_type.to_string();
        self
    }

    fn request(&self, detail: String) -> PutEventsRequest {
        PutEventsRequest {
            entries: vec![PutEventsEntry {
                source: self.source.clone(),
                detail_type: self.detail_type.clone(),
                detail,
                event_bus_name: self.event_bus_arn.clone(),
            }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsRequest {
    entries: Vec<PutEventsEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsEntry {
    source: String,
    detail_type: String,
    detail: String,
    event_bus_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsResponse {
    #[serde(default)]
    failed_entry_count: u32,
    #[serde(default)]
    entries: Vec<PutEventsResultEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsResultEntry {
    event_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
}

/// Interpret a PutEvents response body. Any failed entry is an error.
fn check_response(body: &str) -> Result<Option<String>> {
    let response: PutEventsResponse = if body.trim().is_empty() {
        PutEventsResponse::default()
    } else {
        serde_json::from_str(body)?
    };

    if response.failed_entry_count > 0 {
        let failed = response.entries.iter().find(|e| e.error_code.is_some());
        return Err(NotifyError::Rejected {
            service: SERVICE.to_string(),
            code: failed
                .and_then(|e| e.error_code.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            message: failed
                .and_then(|e| e.error_message.clone())
                .unwrap_or_default(),
        });
    }

    Ok(response.entries.into_iter().find_map(|e| e.event_id))
}

#[async_trait]
impl NotificationChannel for EventBridgeChannel {
    async fn send(&self, result: &EnrichedResult) -> Result<()> {
        let detail = self.formatter.format(result)?;
        let body = serde_json::to_vec(&self.request(detail))?;
        let headers = vec![
            ("content-type".to_string(), "application/x-amz-json-1.1".to_string()),
            ("x-amz-target".to_string(), "AWSEvents.PutEvents".to_string()),
        ];

        let response = self.http.post(headers, body).await?;
        let event_id = check_response(&response)?;

        tracing::info!(
            event_bus = %self.event_bus_arn,
            alarm = %result.alarm.name,
            event_id = event_id.as_deref().unwrap_or("-"),
            "Put enrichment event"
        );
        Ok(())
    }

    fn channel_type(&self) -> &str {
        "eventbridge"
    }
}

// Plugin

#[derive(Deserialize)]
struct EventBridgeConfig {
    event_bus_arn: String,
    endpoint: Option<String>,
    source: Option<String>,
    detail_type: Option<String>,
}

fn parse_config(config: &Value) -> Result<EventBridgeConfig> {
    let cfg: EventBridgeConfig = serde_json::from_value(config.clone())
        .map_err(|e| NotifyError::InvalidConfig(format!("Invalid eventbridge config: {e}")))?;
    if cfg.event_bus_arn.trim().is_empty() {
        return Err(NotifyError::InvalidConfig(
            "event_bus_arn must not be empty".to_string(),
        ));
    }
    Ok(cfg)
}

pub struct EventBridgePlugin;

impl ChannelPlugin for EventBridgePlugin {
    fn name(&self) -> &str {
        "eventbridge"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        parse_config(config).map(|_| ())
    }

    fn create_channel(
        &self,
        ctx: &ChannelContext,
        config: &Value,
    ) -> Result<Box<dyn NotificationChannel>> {
        let cfg = parse_config(config)?;
        let http = SignedHttpClient::new(
            ctx.credentials.clone(),
            &ctx.region,
            SERVICE,
            cfg.endpoint.as_deref(),
        )?;

        let mut channel = EventBridgeChannel::new(http, &cfg.event_bus_arn);
        if let Some(source) = &cfg.source {
            channel = channel.with_source(source);
        }
        if let Some(detail_type) = &cfg.detail_type {
            channel = channel.with_detail_type(detail_type);
        }
        Ok(Box::new(channel))
    }
}
