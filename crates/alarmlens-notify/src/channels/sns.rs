use crate::error::{NotifyError, Result};
use crate::formatter::{MessageFormatter, TextFormatter};
use crate::plugin::{ChannelContext, ChannelPlugin};
use crate::utils::{truncate_chars, truncate_string, MAX_LOGGED_BODY};
use crate::NotificationChannel;
use alarmlens_cloud::http::SignedHttpClient;
use alarmlens_common::types::EnrichedResult;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

const SERVICE: &str = "sns";
const API_VERSION: &str = "2010-03-31";
/// SNS subjects must be shorter than 100 characters.
const SUBJECT_MAX_CHARS: usize = 99;

/// Publishes the text rendering of a result to an SNS topic.
pub struct SnsChannel {
    http: SignedHttpClient,
    topic_arn: String,
    formatter: TextFormatter,
}

impl SnsChannel {
    pub fn new(http: SignedHttpClient, topic_arn: &str) -> Self {
        Self {
            http,
            topic_arn: topic_arn.to_string(),
            formatter: TextFormatter,
        }
    }

    pub fn topic_arn(&self) -> &str {
        &self.topic_arn
    }
}

pub fn subject_for(alarm_name: &str) -> String {
    truncate_chars(&format!("CloudWatch Alarm - {alarm_name}"), SUBJECT_MAX_CHARS)
}

/// Form-encoded body of an SNS `Publish` call.
pub fn publish_body(topic_arn: &str, subject: &str, message: &str) -> String {
    [
        ("Action", "Publish"),
        ("Version", API_VERSION),
        ("TopicArn", topic_arn),
        ("Subject", subject),
        ("Message", message),
    ]
    .iter()
    .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
    .collect::<Vec<_>>()
    .join("&")
}

#[async_trait]
impl NotificationChannel for SnsChannel {
    async fn send(&self, result: &EnrichedResult) -> Result<()> {
        let message = self.formatter.format(result)?;
        let subject = subject_for(&result.alarm.name);
        let body = publish_body(&self.topic_arn, &subject, &message);

        tracing::debug!(
            topic_arn = %self.topic_arn,
            message = %truncate_string(&message, MAX_LOGGED_BODY),
            "Publishing to SNS"
        );

        let headers = vec![(
            "content-type".to_string(),
            "application/x-www-form-urlencoded; charset=utf-8".to_string(),
        )];
        self.http.post(headers, body.into_bytes()).await?;

        tracing::info!(
            topic_arn = %self.topic_arn,
            alarm = %result.alarm.name,
            "Published enrichment to SNS"
        );
        Ok(())
    }

    fn channel_type(&self) -> &str {
        "sns"
    }
}

// Plugin

#[derive(Deserialize)]
struct SnsConfig {
    topic_arn: String,
    endpoint: Option<String>,
}

fn parse_config(config: &Value) -> Result<SnsConfig> {
    let cfg: SnsConfig = serde_json::from_value(config.clone())
        .map_err(|e| NotifyError::InvalidConfig(format!("Invalid sns config: {e}")))?;
    if !cfg.topic_arn.starts_with("arn:") {
        return Err(NotifyError::InvalidConfig(format!(
            "topic_arn is not an ARN: {}",
            cfg.topic_arn
        )));
    }
    Ok(cfg)
}

pub struct SnsPlugin;

impl ChannelPlugin for SnsPlugin {
    fn name(&self) -> &str {
        "sns"
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
        Ok(Box::new(SnsChannel::new(http, &cfg.topic_arn)))
    }
}
