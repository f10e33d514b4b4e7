use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Upper bound for one enrichment run, in seconds.
    #[serde(default = "default_enrich_timeout_secs")]
    pub enrich_timeout_secs: u64,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsConfig {
    /// Required, either here or through `AWS_REGION`.
    #[serde(default)]
    pub region: String,
    /// CloudWatch endpoint override.
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub target: DispatchTarget,
    #[serde(default)]
    pub sns_topic_arn: Option<String>,
    #[serde(default)]
    pub sns_endpoint: Option<String>,
    #[serde(default)]
    pub event_bus_arn: Option<String>,
    #[serde(default)]
    pub events_endpoint: Option<String>,
    /// EventBridge `Source` override.
    #[serde(default)]
    pub source: Option<String>,
    /// EventBridge `DetailType` override.
    #[serde(default)]
    pub detail_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchTarget {
    #[default]
    Sns,
    EventBridge,
}

impl DispatchTarget {
    /// Name of the channel plugin serving this target.
    pub fn channel_type(&self) -> &'static str {
        match self {
            Self::Sns => "sns",
            Self::EventBridge => "eventbridge",
        }
    }
}

impl FromStr for DispatchTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sns" => Ok(Self::Sns),
            "eventbridge" => Ok(Self::EventBridge),
            other => Err(anyhow::anyhow!("invalid dispatch target: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(anyhow::anyhow!("invalid log format: {other}")),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            enrich_timeout_secs: default_enrich_timeout_secs(),
            log_format: LogFormat::default(),
            aws: AwsConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_enrich_timeout_secs() -> u64 {
    30
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{path}'"))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{path}'"))?;
        Ok(config)
    }

    /// Load `path` when given, otherwise start from defaults; then overlay
    /// the process environment and validate.
    pub fn resolve(path: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay settings from environment variables. Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(region) = get("AWS_REGION") {
            self.aws.region = region;
        }
        if let Some(endpoint) = get("ALARMLENS_CLOUDWATCH_ENDPOINT") {
            self.aws.endpoint = Some(endpoint);
        }
        if let Some(target) = get("ALARM_DESTINATION") {
            self.dispatch.target = target.parse()?;
        }
        if let Some(arn) = get("SNS_TOPIC_ARN") {
            self.dispatch.sns_topic_arn = Some(arn);
        }
        if let Some(arn) = get("EVENT_BUS_ARN") {
            self.dispatch.event_bus_arn = Some(arn);
        }
        if let Some(port) = get("ALARMLENS_HTTP_PORT") {
            self.http_port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid ALARMLENS_HTTP_PORT: {port}"))?;
        }
        if let Some(format) = get("ALARMLENS_LOG_FORMAT") {
            self.log_format = format.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.aws.region.trim().is_empty() {
            anyhow::bail!("AWS region is required (aws.region or AWS_REGION)");
        }
        if self.enrich_timeout_secs == 0 {
            anyhow::bail!("enrich_timeout_secs must be positive");
        }
        match self.dispatch.target {
            DispatchTarget::Sns if is_blank(&self.dispatch.sns_topic_arn) => {
                anyhow::bail!("SNS topic ARN is required for sns dispatch (SNS_TOPIC_ARN)")
            }
            DispatchTarget::EventBridge if is_blank(&self.dispatch.event_bus_arn) => {
                anyhow::bail!(
                    "Event bus ARN is required for eventbridge dispatch (EVENT_BUS_ARN)"
                )
            }
            _ => Ok(()),
        }
    }

    pub fn enrich_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.enrich_timeout_secs)
    }

    /// Channel plugin name and JSON config for the configured dispatch target.
    pub fn channel_config(&self) -> (&'static str, serde_json::Value) {
        let d = &self.dispatch;
        let config = match d.target {
            DispatchTarget::Sns => serde_json::json!({
                "topic_arn": d.sns_topic_arn,
                "endpoint": d.sns_endpoint,
            }),
            DispatchTarget::EventBridge => serde_json::json!({
                "event_bus_arn": d.event_bus_arn,
                "endpoint": d.events_endpoint,
                "source": d.source,
                "detail_type": d.detail_type,
            }),
        };
        (d.target.channel_type(), config)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}
