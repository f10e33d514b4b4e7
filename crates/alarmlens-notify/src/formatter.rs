use crate::error::Result;
use alarmlens_common::types::{format_dimensions, EnrichedResult};
use chrono::SecondsFormat;

/// Renders an enrichment result into a message body.
pub trait MessageFormatter: Send + Sync {
    fn format(&self, result: &EnrichedResult) -> Result<String>;
}

/// Human-readable text for email and chat subscribers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFormatter;

impl MessageFormatter for TextFormatter {
    fn format(&self, result: &EnrichedResult) -> Result<String> {
        let alarm = &result.alarm;
        let mut msg = String::new();

        msg.push_str("🚨 CloudWatch Alarm: ");
        msg.push_str(&alarm.name);
        msg.push_str("\nState: ");
        msg.push_str(&alarm.state.to_string());
        msg.push_str("\nAccountID: ");
        msg.push_str(result.account_id.as_deref().unwrap_or_default());
        msg.push_str("\nReason: ");
        msg.push_str(alarm.state_reason.as_deref().unwrap_or_default());
        msg.push_str("\n\n");

        if result.is_resolved() {
            msg.push_str("Alarm is no longer in ALARM state, no violation analysis was performed.\n");
        } else if result.violating_metrics.is_empty() {
            msg.push_str("No specific services currently violating the threshold.\n");
        } else {
            let op_name = alarm.comparison_operator.to_string();
            let symbol = alarm.comparison_operator.symbol().unwrap_or(op_name.as_str());
            msg.push_str(&format!(
                "Metrics currently violating ({symbol} {:.1}) threshold:\n",
                alarm.threshold
            ));
            for (i, metric) in result.violating_metrics.iter().enumerate() {
                msg.push_str(&format!(
                    "{}. {}, Value: {:.2}\t\n",
                    i + 1,
                    format_dimensions(&metric.dimensions),
                    metric.value
                ));
            }
        }

        msg.push_str("\nTimestamp: ");
        msg.push_str(&result.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true));

        Ok(msg)
    }
}

/// The full result as JSON, for machine consumers.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl MessageFormatter for JsonFormatter {
    fn format(&self, result: &EnrichedResult) -> Result<String> {
        Ok(serde_json::to_string(result)?)
    }
}
