use crate::batch::{build_queries, BatchEvaluator};
use crate::discovery::{CandidateSet, MetricDiscoverer};
use crate::enricher::{AlarmEnricher, Enricher};
use crate::error::EnrichError;
use alarmlens_cloud::error::{CloudError, Result as CloudResult};
use alarmlens_cloud::{
    AlarmSource, MetricCatalog, MetricDataResult, MetricDataSource, MetricPage, MetricQuery,
};
use alarmlens_common::types::{
    AlarmDescriptor, AlarmState, ComparisonOperator, Dimension, MetricDescriptor, Statistic,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

type ValueFn = Box<dyn Fn(&MetricQuery) -> Vec<f64> + Send + Sync>;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 7, 45).unwrap()
}

fn make_alarm(state: AlarmState, filter: &[(&str, &str)], threshold: f64) -> AlarmDescriptor {
    AlarmDescriptor {
        name: "web-cpu-high".to_string(),
        namespace: "AWS/EC2".to_string(),
        metric_name: "CPUUtilization".to_string(),
        dimensions: filter.iter().map(|(k, v)| Dimension::new(*k, *v)).collect(),
        statistic: Statistic::Average,
        period_secs: 300,
        evaluation_periods: 2,
        threshold,
        comparison_operator: ComparisonOperator::GreaterThan,
        state,
        state_reason: Some("Threshold Crossed: 1 datapoint [60.0] was greater than 50.0".to_string()),
    }
}

fn make_metric(dims: &[(&str, &str)]) -> MetricDescriptor {
    MetricDescriptor {
        namespace: "AWS/EC2".to_string(),
        metric_name: "CPUUtilization".to_string(),
        dimensions: dims.iter().map(|(k, v)| Dimension::new(*k, *v)).collect(),
    }
}

fn dim_value<'a>(query: &'a MetricQuery, name: &str) -> Option<&'a str> {
    query
        .metric
        .dimensions
        .iter()
        .find(|d| d.name == name)
        .map(|d| d.value.as_str())
}

struct MockAlarms {
    alarm: Option<AlarmDescriptor>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockAlarms {
    fn returning(alarm: Option<AlarmDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            alarm,
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl AlarmSource for MockAlarms {
    async fn fetch_alarm(&self, _name: &str) -> CloudResult<Option<AlarmDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CloudError::Throttled {
                service: "monitoring".to_string(),
            });
        }
        Ok(self.alarm.clone())
    }
}

/// Serves `pages` in order; page `n` is requested with token `page-n`.
struct MockCatalog {
    pages: Vec<Vec<MetricDescriptor>>,
    fail: bool,
    tokens: Mutex<Vec<Option<String>>>,
}

impl MockCatalog {
    fn with_pages(pages: Vec<Vec<MetricDescriptor>>) -> Arc<Self> {
        Arc::new(Self {
            pages,
            fail: false,
            tokens: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl MetricCatalog for MockCatalog {
    async fn list_metrics(
        &self,
        _namespace: &str,
        _metric_name: &str,
        _filter: &[Dimension],
        next_token: Option<&str>,
    ) -> CloudResult<MetricPage> {
        self.tokens.lock().unwrap().push(next_token.map(str::to_string));
        if self.fail {
            return Err(CloudError::HttpError {
                service: "monitoring".to_string(),
                status: 500,
                body: "boom".to_string(),
            });
        }

        let index = next_token
            .and_then(|t| t.strip_prefix("page-"))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);
        let next_token = (index + 1 < self.pages.len()).then(|| format!("page-{}", index + 1));

        Ok(MetricPage {
            metrics: self.pages.get(index).cloned().unwrap_or_default(),
            next_token,
        })
    }
}

struct MockData {
    values: ValueFn,
    fail_on_batch: Option<usize>,
    blank_ids: bool,
    reverse: bool,
    extra_result: Option<MetricDataResult>,
    cancel_on_first: Option<CancellationToken>,
    batches: Mutex<Vec<Vec<String>>>,
    windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl MockData {
    fn new(values: impl Fn(&MetricQuery) -> Vec<f64> + Send + Sync + 'static) -> Self {
        Self {
            values: Box::new(values),
            fail_on_batch: None,
            blank_ids: false,
            reverse: false,
            extra_result: None,
            cancel_on_first: None,
            batches: Mutex::new(Vec::new()),
            windows: Mutex::new(Vec::new()),
        }
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }
}

#[async_trait::async_trait]
impl MetricDataSource for MockData {
    async fn query_recent_data(
        &self,
        queries: &[MetricQuery],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CloudResult<Vec<MetricDataResult>> {
        let batch = {
            let mut batches = self.batches.lock().unwrap();
            batches.push(queries.iter().map(|q| q.id.clone()).collect());
            batches.len() - 1
        };
        self.windows.lock().unwrap().push((start, end));

        if let Some(token) = &self.cancel_on_first {
            token.cancel();
        }
        if self.fail_on_batch == Some(batch) {
            return Err(CloudError::Throttled {
                service: "monitoring".to_string(),
            });
        }

        let mut results: Vec<MetricDataResult> = queries
            .iter()
            .map(|q| {
                let values = (self.values)(q);
                let timestamps = (0..values.len())
                    .map(|i| start + Duration::seconds(i as i64 * i64::from(q.period_secs)))
                    .collect();
                MetricDataResult {
                    id: if self.blank_ids { String::new() } else { q.id.clone() },
                    timestamps,
                    values,
                }
            })
            .collect();

        if self.reverse {
            results.reverse();
        }
        if let Some(extra) = &self.extra_result {
            results.push(extra.clone());
        }
        Ok(results)
    }
}

fn enricher(
    alarms: Arc<MockAlarms>,
    catalog: Arc<MockCatalog>,
    data: Arc<MockData>,
) -> AlarmEnricher {
    AlarmEnricher::new(alarms, catalog, data)
}

fn numbered_metrics(n: usize) -> Vec<MetricDescriptor> {
    (0..n)
        .map(|i| {
            let id = i.to_string();
            make_metric(&[("AutoScalingGroupName", "web"), ("InstanceId", id.as_str())])
        })
        .collect()
}

fn instance_index(query: &MetricQuery) -> f64 {
    dim_value(query, "InstanceId")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_report_single_instance_over_threshold() {
    let alarms = MockAlarms::returning(Some(make_alarm(
        AlarmState::Alarm,
        &[("AutoScalingGroupName", "web")],
        50.0,
    )));
    let catalog = MockCatalog::with_pages(vec![vec![
        make_metric(&[("AutoScalingGroupName", "web")]),
        make_metric(&[("AutoScalingGroupName", "web"), ("InstanceId", "i-1")]),
        make_metric(&[("AutoScalingGroupName", "web"), ("InstanceId", "i-2")]),
    ]]);
    let data = Arc::new(MockData::new(|q| match dim_value(q, "InstanceId") {
        Some("i-1") => vec![10.0, 60.0],
        Some("i-2") => vec![5.0, 8.0],
        _ => vec![],
    }));

    let result = enricher(alarms, catalog, data.clone())
        .enrich_at("web-cpu-high", now(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.is_resolved());
    assert_eq!(result.timestamp, now());
    assert_eq!(result.violating_metrics.len(), 1);
    let metric = &result.violating_metrics[0];
    assert_eq!(metric.value, 60.0);
    assert_eq!(metric.dimensions.len(), 2);
    assert_eq!(metric.dimensions["InstanceId"], "i-1");
    assert_eq!(metric.dimensions["AutoScalingGroupName"], "web");

    let (start, _) = data.windows.lock().unwrap()[0];
    assert_eq!(metric.timestamp, start + Duration::seconds(300));
    assert_eq!(data.batch_sizes(), vec![2]);
}

#[tokio::test]
async fn should_short_circuit_when_alarm_is_no_longer_firing() {
    let alarms = MockAlarms::returning(Some(make_alarm(AlarmState::Ok, &[], 50.0)));
    let catalog = MockCatalog::with_pages(vec![vec![make_metric(&[("InstanceId", "i-1")])]]);
    let data = Arc::new(MockData::new(|_| vec![99.0]));

    let result = enricher(alarms, catalog.clone(), data.clone())
        .enrich_at("web-cpu-high", now(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.is_resolved());
    assert!(result.violating_metrics.is_empty());
    assert_eq!(catalog.calls(), 0);
    assert!(data.batch_sizes().is_empty());
}

#[tokio::test]
async fn should_treat_insufficient_data_as_resolved() {
    let alarms = MockAlarms::returning(Some(make_alarm(AlarmState::InsufficientData, &[], 50.0)));
    let catalog = MockCatalog::with_pages(vec![]);
    let data = Arc::new(MockData::new(|_| vec![]));

    let result = enricher(alarms, catalog.clone(), data)
        .enrich_at("web-cpu-high", now(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.is_resolved());
    assert_eq!(catalog.calls(), 0);
}

#[tokio::test]
async fn should_fail_when_alarm_does_not_exist() {
    let alarms = MockAlarms::returning(None);
    let catalog = MockCatalog::with_pages(vec![]);
    let data = Arc::new(MockData::new(|_| vec![]));

    let err = enricher(alarms, catalog, data)
        .enrich_at("missing", now(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EnrichError::AlarmNotFound(name) if name == "missing"));
}

#[tokio::test]
async fn should_wrap_alarm_lookup_failures() {
    let alarms = Arc::new(MockAlarms {
        alarm: None,
        fail: true,
        calls: AtomicUsize::new(0),
    });
    let catalog = MockCatalog::with_pages(vec![]);
    let data = Arc::new(MockData::new(|_| vec![]));

    let err = enricher(alarms.clone(), catalog, data)
        .enrich_at("web-cpu-high", now(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        EnrichError::AlarmLookup { alarm, source } => {
            assert_eq!(alarm, "web-cpu-high");
            assert!(source.is_throttled());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(alarms.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn should_wrap_discovery_failures() {
    let alarms = MockAlarms::returning(Some(make_alarm(AlarmState::Alarm, &[], 50.0)));
    let catalog = Arc::new(MockCatalog {
        pages: vec![],
        fail: true,
        tokens: Mutex::new(Vec::new()),
    });
    let data = Arc::new(MockData::new(|_| vec![]));

    let err = enricher(alarms, catalog, data.clone())
        .enrich_at("web-cpu-high", now(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EnrichError::Discovery { .. }));
    assert!(data.batch_sizes().is_empty());
}

#[tokio::test]
async fn should_succeed_with_no_violations_when_series_are_empty() {
    let alarms = MockAlarms::returning(Some(make_alarm(
        AlarmState::Alarm,
        &[("AutoScalingGroupName", "web")],
        50.0,
    )));
    let catalog = MockCatalog::with_pages(vec![numbered_metrics(3)]);
    let data = Arc::new(MockData::new(|_| vec![]));

    let result = enricher(alarms, catalog, data.clone())
        .enrich_at("web-cpu-high", now(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.violating_metrics.is_empty());
    assert!(!result.is_resolved());
    assert_eq!(data.batch_sizes(), vec![3]);
}

#[tokio::test]
async fn should_succeed_without_queries_when_no_metric_matches_filter() {
    let alarms = MockAlarms::returning(Some(make_alarm(
        AlarmState::Alarm,
        &[("AutoScalingGroupName", "web"), ("InstanceType", "m5.large")],
        50.0,
    )));
    let catalog = MockCatalog::with_pages(vec![vec![make_metric(&[("AutoScalingGroupName", "web")])]]);
    let data = Arc::new(MockData::new(|_| vec![99.0]));

    let result = enricher(alarms, catalog, data.clone())
        .enrich_at("web-cpu-high", now(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.violating_metrics.is_empty());
    assert!(data.batch_sizes().is_empty());
}

#[tokio::test]
async fn should_report_account_level_metric_with_no_dimensions() {
    let mut alarm = make_alarm(AlarmState::Alarm, &[], 100.0);
    alarm.namespace = "AWS/Lambda".to_string();
    alarm.metric_name = "ConcurrentExecutions".to_string();
    let alarms = MockAlarms::returning(Some(alarm));
    let catalog = MockCatalog::with_pages(vec![vec![make_metric(&[])]]);
    let data = Arc::new(MockData::new(|_| vec![120.0, 150.0]));

    let result = enricher(alarms, catalog, data)
        .enrich_at("web-cpu-high", now(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.violating_metrics.len(), 1);
    assert_eq!(result.violating_metrics[0].value, 150.0);
    assert!(result.violating_metrics[0].dimensions.is_empty());
}

#[tokio::test]
async fn should_query_period_aligned_window_covering_all_evaluation_periods() {
    let alarms = MockAlarms::returning(Some(make_alarm(AlarmState::Alarm, &[], 50.0)));
    let catalog = MockCatalog::with_pages(vec![vec![make_metric(&[("InstanceId", "i-1")])]]);
    let data = Arc::new(MockData::new(|_| vec![1.0]));

    enricher(alarms, catalog, data.clone())
        .enrich_at("web-cpu-high", now(), &CancellationToken::new())
        .await
        .unwrap();

    let (start, end) = data.windows.lock().unwrap()[0];
    assert_eq!(end, Utc.with_ymd_and_hms(2024, 6, 1, 12, 5, 0).unwrap());
    assert_eq!(start, Utc.with_ymd_and_hms(2024, 6, 1, 11, 55, 0).unwrap());
}

#[tokio::test]
async fn should_clamp_window_for_huge_evaluation_period_counts() {
    let mut alarm = make_alarm(AlarmState::Alarm, &[], 50.0);
    alarm.period_secs = 86_400;
    alarm.evaluation_periods = u32::MAX;
    let alarms = MockAlarms::returning(Some(alarm));
    let catalog = MockCatalog::with_pages(vec![vec![make_metric(&[("InstanceId", "i-1")])]]);
    let data = Arc::new(MockData::new(|_| vec![75.0]));

    let result = enricher(alarms, catalog, data.clone())
        .enrich_at("web-cpu-high", now(), &CancellationToken::new())
        .await
        .unwrap();

    let (start, end) = data.windows.lock().unwrap()[0];
    assert_eq!(start, DateTime::<Utc>::MIN_UTC);
    assert_eq!(end, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
    assert_eq!(result.violating_metrics.len(), 1);
}

#[tokio::test]
async fn should_flag_every_series_with_data_for_unrecognized_operator() {
    let mut alarm = make_alarm(AlarmState::Alarm, &[], 50.0);
    alarm.comparison_operator =
        ComparisonOperator::Other("GreaterThanUpperThreshold".to_string());
    let alarms = MockAlarms::returning(Some(alarm));
    let catalog = MockCatalog::with_pages(vec![vec![
        make_metric(&[("InstanceId", "i-1")]),
        make_metric(&[("InstanceId", "i-2")]),
    ]]);
    let data = Arc::new(MockData::new(|q| match dim_value(q, "InstanceId") {
        Some("i-1") => vec![0.0],
        _ => vec![],
    }));

    let result = enricher(alarms, catalog, data)
        .enrich_at("web-cpu-high", now(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.violating_metrics.len(), 1);
    assert_eq!(result.violating_metrics[0].dimensions["InstanceId"], "i-1");
}

#[tokio::test]
async fn should_serve_as_trait_object() {
    let alarms = MockAlarms::returning(Some(make_alarm(AlarmState::Ok, &[], 50.0)));
    let catalog = MockCatalog::with_pages(vec![]);
    let data = Arc::new(MockData::new(|_| vec![]));
    let enricher: Arc<dyn Enricher> = Arc::new(
        enricher(alarms, catalog, data).with_span(tracing::info_span!("handler", source = "test")),
    );

    let result = enricher
        .enrich("web-cpu-high", &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.is_resolved());
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[test]
fn candidate_set_keeps_only_richest_metrics_regardless_of_order() {
    let metrics = vec![
        make_metric(&[("A", "1")]),
        make_metric(&[("A", "1"), ("B", "1")]),
        make_metric(&[("A", "1"), ("B", "2"), ("C", "1")]),
        make_metric(&[("A", "1"), ("B", "3")]),
        make_metric(&[("A", "1"), ("B", "4"), ("C", "2")]),
    ];

    let orders: Vec<Vec<usize>> = vec![
        vec![0, 1, 2, 3, 4],
        vec![4, 3, 2, 1, 0],
        vec![2, 0, 4, 1, 3],
        vec![1, 4, 0, 3, 2],
    ];

    for order in orders {
        let mut set = CandidateSet::new(1);
        for &i in &order {
            set.offer(metrics[i].clone());
        }
        assert_eq!(set.max_dimensions(), 3, "order {order:?}");
        let mut got: Vec<String> = set
            .into_candidates()
            .iter()
            .map(|m| m.dimension_map()["C"].clone())
            .collect();
        got.sort();
        assert_eq!(got, vec!["1", "2"], "order {order:?}");
    }
}

#[test]
fn candidate_set_never_keeps_metrics_coarser_than_filter() {
    let mut set = CandidateSet::new(2);
    set.offer(make_metric(&[]));
    set.offer(make_metric(&[("A", "1")]));
    assert!(set.is_empty());
    assert_eq!(set.max_dimensions(), 2);

    set.offer(make_metric(&[("A", "1"), ("B", "1")]));
    assert_eq!(set.len(), 1);
}

#[tokio::test]
async fn discovery_follows_every_page_token() {
    let catalog = MockCatalog::with_pages(vec![
        vec![make_metric(&[("A", "1")])],
        vec![make_metric(&[("A", "1"), ("B", "1")])],
        vec![make_metric(&[("A", "1"), ("B", "2")])],
    ]);
    let discoverer = MetricDiscoverer::new(catalog.clone());

    let candidates = discoverer
        .discover(
            "AWS/EC2",
            "CPUUtilization",
            &[Dimension::new("A", "1")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(candidates.len(), 2);
    assert_eq!(
        *catalog.tokens.lock().unwrap(),
        vec![None, Some("page-1".to_string()), Some("page-2".to_string())]
    );
}

// ---------------------------------------------------------------------------
// Batching
// ---------------------------------------------------------------------------

#[test]
fn build_queries_assigns_sequential_ids_and_alarm_settings() {
    let alarm = make_alarm(AlarmState::Alarm, &[], 50.0);
    let queries = build_queries(&alarm, &numbered_metrics(3));

    let ids: Vec<&str> = queries.iter().map(|q| q.id.as_str()).collect();
    assert_eq!(ids, vec!["m0", "m1", "m2"]);
    assert!(queries.iter().all(|q| q.period_secs == 300
        && q.statistic == Statistic::Average
        && q.return_data));
}

#[tokio::test]
async fn should_split_large_candidate_sets_into_ordered_batches() {
    let alarm = make_alarm(AlarmState::Alarm, &[("AutoScalingGroupName", "web")], -1.0);
    let candidates = numbered_metrics(1001);
    let data = Arc::new(MockData::new(|q| vec![instance_index(q)]));
    let evaluator = BatchEvaluator::new(data.clone());

    let violating = evaluator
        .evaluate(&alarm, &candidates, now(), now(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(data.batch_sizes(), vec![500, 500, 1]);
    let batches = data.batches.lock().unwrap();
    assert_eq!(batches[0][0], "m0");
    assert_eq!(batches[1][0], "m500");
    assert_eq!(batches[2][0], "m1000");

    assert_eq!(violating.len(), 1001);
    for (k, metric) in violating.iter().enumerate() {
        assert_eq!(metric.value, k as f64);
        assert_eq!(metric.dimensions["InstanceId"], k.to_string());
    }
}

#[tokio::test]
async fn should_correlate_results_by_id_when_returned_out_of_order() {
    let alarm = make_alarm(AlarmState::Alarm, &[], -1.0);
    let candidates = numbered_metrics(10);
    let mut data = MockData::new(|q| vec![instance_index(q)]);
    data.reverse = true;
    let evaluator = BatchEvaluator::new(Arc::new(data)).with_batch_size(4);

    let violating = evaluator
        .evaluate(&alarm, &candidates, now(), now(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(violating.len(), 10);
    for metric in &violating {
        assert_eq!(metric.dimensions["InstanceId"], format!("{}", metric.value as usize));
    }
}

#[tokio::test]
async fn should_correlate_results_by_position_when_ids_are_blank() {
    let alarm = make_alarm(AlarmState::Alarm, &[], -1.0);
    let candidates = numbered_metrics(7);
    let mut data = MockData::new(|q| vec![instance_index(q)]);
    data.blank_ids = true;
    let evaluator = BatchEvaluator::new(Arc::new(data)).with_batch_size(3);

    let violating = evaluator
        .evaluate(&alarm, &candidates, now(), now(), &CancellationToken::new())
        .await
        .unwrap();

    let ids: Vec<String> = violating
        .iter()
        .map(|m| m.dimensions["InstanceId"].clone())
        .collect();
    assert_eq!(ids, vec!["0", "1", "2", "3", "4", "5", "6"]);
}

#[tokio::test]
async fn should_ignore_results_with_unknown_ids() {
    let alarm = make_alarm(AlarmState::Alarm, &[], -1.0);
    let candidates = numbered_metrics(2);
    let mut data = MockData::new(|q| vec![instance_index(q)]);
    data.extra_result = Some(MetricDataResult {
        id: "m999".to_string(),
        timestamps: vec![now()],
        values: vec![1e9],
    });
    let evaluator = BatchEvaluator::new(Arc::new(data));

    let violating = evaluator
        .evaluate(&alarm, &candidates, now(), now(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(violating.len(), 2);
    assert!(violating.iter().all(|m| m.value < 2.0));
}

#[tokio::test]
async fn should_discard_earlier_batches_when_a_later_batch_fails() {
    let alarms = MockAlarms::returning(Some(make_alarm(
        AlarmState::Alarm,
        &[("AutoScalingGroupName", "web")],
        -1.0,
    )));
    let catalog = MockCatalog::with_pages(vec![numbered_metrics(1200)]);
    let mut data = MockData::new(|q| vec![instance_index(q)]);
    data.fail_on_batch = Some(1);
    let data = Arc::new(data);

    let err = enricher(alarms, catalog, data.clone())
        .enrich_at("web-cpu-high", now(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        EnrichError::Evaluation { alarm, source } => {
            assert_eq!(alarm, "web-cpu-high");
            assert!(source.is_throttled());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(data.batch_sizes(), vec![500, 500]);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_not_call_collaborators_when_already_cancelled() {
    let alarms = MockAlarms::returning(Some(make_alarm(AlarmState::Alarm, &[], 50.0)));
    let catalog = MockCatalog::with_pages(vec![]);
    let data = Arc::new(MockData::new(|_| vec![]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = enricher(alarms.clone(), catalog, data)
        .enrich_at("web-cpu-high", now(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, EnrichError::Cancelled));
    assert_eq!(alarms.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn should_stop_between_batches_when_cancelled() {
    let cancel = CancellationToken::new();
    let alarms = MockAlarms::returning(Some(make_alarm(AlarmState::Alarm, &[], -1.0)));
    let catalog = MockCatalog::with_pages(vec![numbered_metrics(1001)]);
    let mut data = MockData::new(|q| vec![instance_index(q)]);
    data.cancel_on_first = Some(cancel.clone());
    let data = Arc::new(data);

    let err = enricher(alarms, catalog, data.clone())
        .enrich_at("web-cpu-high", now(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, EnrichError::Cancelled));
    assert_eq!(data.batch_sizes(), vec![500]);
}

#[tokio::test]
async fn should_discard_last_batch_when_cancelled_while_it_runs() {
    let cancel = CancellationToken::new();
    let alarms = MockAlarms::returning(Some(make_alarm(AlarmState::Alarm, &[], 50.0)));
    let catalog = MockCatalog::with_pages(vec![vec![make_metric(&[("InstanceId", "i-1")])]]);
    let mut data = MockData::new(|_| vec![90.0]);
    data.cancel_on_first = Some(cancel.clone());
    let data = Arc::new(data);

    let err = enricher(alarms, catalog, data.clone())
        .enrich_at("web-cpu-high", now(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, EnrichError::Cancelled));
    assert_eq!(data.batch_sizes(), vec![1]);
}
