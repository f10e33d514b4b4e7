use crate::error::{CloudError, Result};
use crate::http::SignedHttpClient;
use crate::sigv4::AwsCredentials;
use crate::{AlarmSource, MetricCatalog, MetricDataResult, MetricDataSource, MetricPage, MetricQuery};
use alarmlens_common::types::{
    AlarmDescriptor, AlarmState, ComparisonOperator, Dimension, MetricDescriptor, Statistic,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const SERVICE: &str = "monitoring";
const TARGET_PREFIX: &str = "GraniteServiceVersion20100801";
const CONTENT_TYPE: &str = "application/x-amz-json-1.0";

/// CloudWatch client speaking the AWS JSON 1.0 protocol.
pub struct CloudWatchClient {
    http: SignedHttpClient,
}

impl CloudWatchClient {
    pub fn new(credentials: AwsCredentials, region: &str, endpoint: Option<&str>) -> Result<Self> {
        Ok(Self {
            http: SignedHttpClient::new(credentials, region, SERVICE, endpoint)?,
        })
    }

    async fn call<Req, Resp>(&self, action: &str, request: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request)?;
        let headers = vec![
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            ("x-amz-target".to_string(), format!("{TARGET_PREFIX}.{action}")),
        ];

        tracing::debug!(action, region = self.http.region(), "Calling CloudWatch");
        let text = self.http.post(headers, body).await?;
        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        Ok(serde_json::from_str(text)?)
    }
}

#[async_trait::async_trait]
impl AlarmSource for CloudWatchClient {
    async fn fetch_alarm(&self, name: &str) -> Result<Option<AlarmDescriptor>> {
        let request = DescribeAlarmsRequest {
            alarm_names: [name],
            max_records: 1,
        };
        let response: DescribeAlarmsResponse = self.call("DescribeAlarms", &request).await?;

        response
            .metric_alarms
            .into_iter()
            .next()
            .map(alarm_from_wire)
            .transpose()
    }
}

#[async_trait::async_trait]
impl MetricCatalog for CloudWatchClient {
    async fn list_metrics(
        &self,
        namespace: &str,
        metric_name: &str,
        filter: &[Dimension],
        next_token: Option<&str>,
    ) -> Result<MetricPage> {
        let request = ListMetricsRequest {
            namespace,
            metric_name,
            dimensions: filter.iter().map(WireDimension::from).collect(),
            next_token,
        };
        let response: ListMetricsResponse = self.call("ListMetrics", &request).await?;
        Ok(page_from_wire(response))
    }
}

#[async_trait::async_trait]
impl MetricDataSource for CloudWatchClient {
    async fn query_recent_data(
        &self,
        queries: &[MetricQuery],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricDataResult>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let mut merged = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let request = GetMetricDataRequest {
                metric_data_queries: queries.iter().map(WireQuery::from).collect(),
                start_time: start.timestamp(),
                end_time: end.timestamp(),
                scan_by: "TimestampAscending",
                next_token: next_token.take(),
            };
            let response: GetMetricDataResponse = self.call("GetMetricData", &request).await?;
            merge_results(&mut merged, response.metric_data_results)?;

            match response.next_token.filter(|t| !t.is_empty()) {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(merged)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireDimension {
    name: String,
    value: String,
}

impl From<&Dimension> for WireDimension {
    fn from(d: &Dimension) -> Self {
        Self {
            name: d.name.clone(),
            value: d.value.clone(),
        }
    }
}

impl From<WireDimension> for Dimension {
    fn from(d: WireDimension) -> Self {
        Dimension::new(d.name, d.value)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeAlarmsRequest<'a> {
    alarm_names: [&'a str; 1],
    max_records: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeAlarmsResponse {
    #[serde(default)]
    metric_alarms: Vec<MetricAlarm>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetricAlarm {
    alarm_name: String,
    namespace: Option<String>,
    metric_name: Option<String>,
    #[serde(default)]
    dimensions: Vec<WireDimension>,
    statistic: Option<String>,
    extended_statistic: Option<String>,
    period: Option<u32>,
    evaluation_periods: Option<u32>,
    threshold: Option<f64>,
    comparison_operator: Option<String>,
    state_value: Option<String>,
    state_reason: Option<String>,
    /// Metric-math and anomaly-detection alarms describe their inputs here.
    #[serde(default)]
    metrics: Vec<AlarmMetricQuery>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AlarmMetricQuery {
    metric_stat: Option<AlarmMetricStat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AlarmMetricStat {
    metric: WireMetric,
    period: Option<u32>,
    stat: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListMetricsRequest<'a> {
    namespace: &'a str,
    metric_name: &'a str,
    dimensions: Vec<WireDimension>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListMetricsResponse {
    #[serde(default)]
    metrics: Vec<WireMetric>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireMetric {
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    metric_name: String,
    #[serde(default)]
    dimensions: Vec<WireDimension>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetMetricDataRequest<'a> {
    metric_data_queries: Vec<WireQuery<'a>>,
    start_time: i64,
    end_time: i64,
    scan_by: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireQuery<'a> {
    id: &'a str,
    metric_stat: WireMetricStat<'a>,
    return_data: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireMetricStat<'a> {
    metric: WireMetricRef<'a>,
    period: u32,
    stat: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireMetricRef<'a> {
    namespace: &'a str,
    metric_name: &'a str,
    dimensions: Vec<WireDimension>,
}

impl<'a> From<&'a MetricQuery> for WireQuery<'a> {
    fn from(q: &'a MetricQuery) -> Self {
        Self {
            id: &q.id,
            metric_stat: WireMetricStat {
                metric: WireMetricRef {
                    namespace: &q.metric.namespace,
                    metric_name: &q.metric.metric_name,
                    dimensions: q.metric.dimensions.iter().map(WireDimension::from).collect(),
                },
                period: q.period_secs,
                stat: q.statistic.to_string(),
            },
            return_data: q.return_data,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetMetricDataResponse {
    #[serde(default)]
    metric_data_results: Vec<WireResult>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireResult {
    #[serde(default)]
    id: String,
    #[serde(default)]
    timestamps: Vec<f64>,
    #[serde(default)]
    values: Vec<f64>,
}

/// The one metric an alarm watches.
#[derive(Default)]
struct AlarmMetric {
    namespace: String,
    metric_name: String,
    dimensions: Vec<Dimension>,
    statistic: Option<Statistic>,
    period: Option<u32>,
}

/// Resolve the watched metric from the classic top-level fields, or from the
/// only `MetricStat` input of an anomaly-detection alarm. `None` when the
/// alarm combines several metrics.
fn single_metric(alarm: &MetricAlarm) -> Option<AlarmMetric> {
    if let (Some(ns), Some(name)) = (&alarm.namespace, &alarm.metric_name) {
        if !ns.is_empty() && !name.is_empty() {
            return Some(AlarmMetric {
                namespace: ns.clone(),
                metric_name: name.clone(),
                dimensions: alarm.dimensions.iter().cloned().map(Dimension::from).collect(),
                statistic: alarm
                    .statistic
                    .clone()
                    .or_else(|| alarm.extended_statistic.clone())
                    .map(Statistic::from),
                period: alarm.period,
            });
        }
    }

    let mut stats = alarm.metrics.iter().filter_map(|q| q.metric_stat.as_ref());
    let stat = stats.next()?;
    if stats.next().is_some() || stat.metric.namespace.is_empty() || stat.metric.metric_name.is_empty()
    {
        return None;
    }
    Some(AlarmMetric {
        namespace: stat.metric.namespace.clone(),
        metric_name: stat.metric.metric_name.clone(),
        dimensions: stat.metric.dimensions.iter().cloned().map(Dimension::from).collect(),
        statistic: stat.stat.clone().map(Statistic::from),
        period: stat.period.or(alarm.period),
    })
}

/// Build a descriptor. Alarms that are not firing are returned whatever
/// their shape, since analysis stops at their state; a firing alarm must
/// resolve to one metric with a statistic and a period.
fn alarm_from_wire(alarm: MetricAlarm) -> Result<AlarmDescriptor> {
    let state = alarm
        .state_value
        .clone()
        .map(AlarmState::from)
        .unwrap_or(AlarmState::InsufficientData);
    let firing = state == AlarmState::Alarm;
    let unsupported = |reason: &str| CloudError::UnsupportedAlarm {
        alarm: alarm.alarm_name.clone(),
        reason: reason.to_string(),
    };

    let metric = match single_metric(&alarm) {
        Some(metric) => metric,
        None if firing => return Err(unsupported("alarm is not based on a single metric")),
        None => AlarmMetric::default(),
    };
    let statistic = match metric.statistic {
        Some(statistic) => statistic,
        None if firing => return Err(unsupported("alarm has no statistic")),
        None => Statistic::Other(String::new()),
    };
    let period_secs = match metric.period.filter(|p| *p > 0) {
        Some(period) => period,
        None if firing => return Err(unsupported("alarm has no period")),
        None => 0,
    };

    Ok(AlarmDescriptor {
        namespace: metric.namespace,
        metric_name: metric.metric_name,
        dimensions: metric.dimensions,
        statistic,
        period_secs,
        evaluation_periods: alarm.evaluation_periods.unwrap_or(1).max(1),
        threshold: alarm.threshold.unwrap_or_default(),
        comparison_operator: ComparisonOperator::from(
            alarm.comparison_operator.unwrap_or_default(),
        ),
        state,
        state_reason: alarm.state_reason,
        name: alarm.alarm_name,
    })
}

fn page_from_wire(response: ListMetricsResponse) -> MetricPage {
    MetricPage {
        metrics: response
            .metrics
            .into_iter()
            .map(|m| MetricDescriptor {
                namespace: m.namespace,
                metric_name: m.metric_name,
                dimensions: m.dimensions.into_iter().map(Dimension::from).collect(),
            })
            .collect(),
        next_token: response.next_token.filter(|t| !t.is_empty()),
    }
}

/// Append one response page to the accumulated results, joining series that
/// continue across pages by query id.
fn merge_results(merged: &mut Vec<MetricDataResult>, page: Vec<WireResult>) -> Result<()> {
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i))
        .collect();

    for wire in page {
        let timestamps = wire
            .timestamps
            .iter()
            .map(|secs| {
                epoch_to_datetime(*secs).ok_or_else(|| CloudError::MalformedResponse {
                    service: SERVICE.to_string(),
                    reason: format!("timestamp {secs} out of range"),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        match index.get(&wire.id) {
            Some(&i) if !wire.id.is_empty() => {
                merged[i].timestamps.extend(timestamps);
                merged[i].values.extend(wire.values);
            }
            _ => {
                index.insert(wire.id.clone(), merged.len());
                merged.push(MetricDataResult {
                    id: wire.id,
                    timestamps,
                    values: wire.values,
                });
            }
        }
    }

    Ok(())
}

fn epoch_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
}
