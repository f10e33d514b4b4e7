#![allow(dead_code)]

use alarmlens_analysis::error::Result as EnrichResult;
use alarmlens_analysis::{EnrichError, Enricher};
use alarmlens_cloud::error::CloudError;
use alarmlens_common::types::{
    AlarmDescriptor, AlarmState, ComparisonOperator, EnrichedResult, Statistic, ViolatingMetric,
};
use alarmlens_notify::error::NotifyError;
use alarmlens_notify::NotificationChannel;
use alarmlens_server::app;
use alarmlens_server::handler::EventHandler;
use alarmlens_server::state::AppState;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

pub fn make_alarm(name: &str, state: AlarmState) -> AlarmDescriptor {
    AlarmDescriptor {
        name: name.to_string(),
        namespace: "App/Errors".to_string(),
        metric_name: "ErrorRate".to_string(),
        dimensions: vec![],
        statistic: Statistic::Average,
        period_secs: 60,
        evaluation_periods: 1,
        threshold: 10.0,
        comparison_operator: ComparisonOperator::GreaterThan,
        state,
        state_reason: Some("Threshold Crossed".to_string()),
    }
}

/// Enricher answering from canned alarm names:
/// `missing` is not found, `broken` fails upstream, `slow` never finishes,
/// `recovered` is resolved, anything else has one violating service.
pub struct ScriptedEnricher;

#[async_trait]
impl Enricher for ScriptedEnricher {
    async fn enrich(
        &self,
        alarm_name: &str,
        cancel: &CancellationToken,
    ) -> EnrichResult<EnrichedResult> {
        let now = Utc.with_ymd_and_hms(2025, 10, 2, 12, 0, 0).unwrap();
        match alarm_name {
            "missing" => Err(EnrichError::AlarmNotFound(alarm_name.to_string())),
            "broken" => Err(EnrichError::Discovery {
                alarm: alarm_name.to_string(),
                source: CloudError::Throttled {
                    service: "monitoring".to_string(),
                },
            }),
            "slow" => {
                cancel.cancelled().await;
                Err(EnrichError::Cancelled)
            }
            "recovered" => Ok(EnrichedResult::resolved(
                make_alarm(alarm_name, AlarmState::Ok),
                now,
            )),
            _ => {
                let mut result = EnrichedResult::new(make_alarm(alarm_name, AlarmState::Alarm), now);
                result.violating_metrics.push(ViolatingMetric {
                    value: 15.5,
                    dimensions: HashMap::from([(
                        "ServiceName".to_string(),
                        "api-service".to_string(),
                    )]),
                    timestamp: now,
                });
                Ok(result)
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<EnrichedResult>>,
    pub fail: bool,
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send(&self, result: &EnrichedResult) -> alarmlens_notify::error::Result<()> {
        if self.fail {
            return Err(NotifyError::Rejected {
                service: "sns".to_string(),
                code: "AuthorizationError".to_string(),
                message: "not allowed".to_string(),
            });
        }
        self.sent.lock().unwrap().push(result.clone());
        Ok(())
    }

    fn channel_type(&self) -> &str {
        "recording"
    }
}

pub struct TestContext {
    pub app: axum::Router,
    pub channel: Arc<RecordingChannel>,
    pub shutdown: CancellationToken,
}

pub fn build_test_context(channel: RecordingChannel) -> TestContext {
    let channel = Arc::new(channel);
    let handler = EventHandler::new(
        Arc::new(ScriptedEnricher),
        channel.clone(),
        Duration::from_millis(100),
    );
    let shutdown = CancellationToken::new();
    let state = AppState::new(Arc::new(handler), shutdown.clone());

    TestContext {
        app: app::build_http_app(state),
        channel,
        shutdown,
    }
}

pub fn alarm_event(account: &str, alarm_name: &str) -> Value {
    serde_json::json!({
        "version": "0",
        "id": "c4c1c1c9-6542-e61b-6ef0-8c4d36933a92",
        "detail-type": "CloudWatch Alarm State Change",
        "source": "aws.cloudwatch",
        "account": account,
        "time": "2025-10-02T12:00:00Z",
        "region": "us-east-1",
        "detail": {
            "alarmName": alarm_name,
            "state": {"value": "ALARM", "reason": "Threshold Crossed"}
        }
    })
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };

    (status, json, trace_id)
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    let req_body = body.unwrap_or(Value::Null).to_string();
    request_raw(app, method, uri, req_body.into_bytes()).await
}

pub async fn request_raw(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Vec<u8>,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}
