use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key describing how an enrichment run ended.
pub const STATUS_KEY: &str = "status";
/// Value of [`STATUS_KEY`] when the alarm was no longer firing at enrichment time.
pub const STATUS_RESOLVED: &str = "resolved";

/// A single name/value pair narrowing a metric to a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Aggregation applied to raw samples within each period.
///
/// # Examples
///
/// ```
/// use alarmlens_common::types::Statistic;
///
/// let stat: Statistic = "Average".parse().unwrap();
/// assert_eq!(stat, Statistic::Average);
/// assert_eq!(Statistic::Other("p99".into()).to_string(), "p99");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Statistic {
    Average,
    Sum,
    Minimum,
    Maximum,
    SampleCount,
    /// Extended statistics such as `p99` or `tm90`.
    Other(String),
}

impl std::fmt::Display for Statistic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Average => write!(f, "Average"),
            Self::Sum => write!(f, "Sum"),
            Self::Minimum => write!(f, "Minimum"),
            Self::Maximum => write!(f, "Maximum"),
            Self::SampleCount => write!(f, "SampleCount"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

impl From<String> for Statistic {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Average" => Self::Average,
            "Sum" => Self::Sum,
            "Minimum" => Self::Minimum,
            "Maximum" => Self::Maximum,
            "SampleCount" => Self::SampleCount,
            _ => Self::Other(s),
        }
    }
}

impl From<Statistic> for String {
    fn from(stat: Statistic) -> Self {
        stat.to_string()
    }
}

impl std::str::FromStr for Statistic {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

/// How an alarm compares its statistic against the threshold.
///
/// Only the four ordering comparisons are modelled; anomaly-band operators
/// and anything newer end up in [`ComparisonOperator::Other`] with the raw
/// provider name preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComparisonOperator {
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Other(String),
}

impl ComparisonOperator {
    /// Mathematical symbol for the modelled operators.
    pub fn symbol(&self) -> Option<&'static str> {
        match self {
            Self::GreaterThan => Some(">"),
            Self::GreaterThanOrEqual => Some(">="),
            Self::LessThan => Some("<"),
            Self::LessThanOrEqual => Some("<="),
            Self::Other(_) => None,
        }
    }
}

impl std::fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GreaterThan => write!(f, "GreaterThanThreshold"),
            Self::GreaterThanOrEqual => write!(f, "GreaterThanOrEqualToThreshold"),
            Self::LessThan => write!(f, "LessThanThreshold"),
            Self::LessThanOrEqual => write!(f, "LessThanOrEqualToThreshold"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

impl From<String> for ComparisonOperator {
    fn from(s: String) -> Self {
        match s.as_str() {
            "GreaterThanThreshold" => Self::GreaterThan,
            "GreaterThanOrEqualToThreshold" => Self::GreaterThanOrEqual,
            "LessThanThreshold" => Self::LessThan,
            "LessThanOrEqualToThreshold" => Self::LessThanOrEqual,
            _ => Self::Other(s),
        }
    }
}

impl From<ComparisonOperator> for String {
    fn from(op: ComparisonOperator) -> Self {
        op.to_string()
    }
}

/// Alarm state as reported by the alarm source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlarmState {
    Ok,
    Alarm,
    InsufficientData,
    Other(String),
}

impl std::fmt::Display for AlarmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Alarm => write!(f, "ALARM"),
            Self::InsufficientData => write!(f, "INSUFFICIENT_DATA"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

impl From<String> for AlarmState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "OK" => Self::Ok,
            "ALARM" => Self::Alarm,
            "INSUFFICIENT_DATA" => Self::InsufficientData,
            _ => Self::Other(s),
        }
    }
}

impl From<AlarmState> for String {
    fn from(state: AlarmState) -> Self {
        state.to_string()
    }
}

/// Snapshot of a threshold alarm definition and its current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmDescriptor {
    pub name: String,
    /// Empty, like `metric_name`, for a non-firing alarm that combines
    /// several metrics.
    pub namespace: String,
    pub metric_name: String,
    /// Dimension filter of the alarm, in provider order. Empty for
    /// account-level metrics.
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    pub statistic: Statistic,
    pub period_secs: u32,
    pub evaluation_periods: u32,
    pub threshold: f64,
    pub comparison_operator: ComparisonOperator,
    pub state: AlarmState,
    #[serde(default)]
    pub state_reason: Option<String>,
}

impl AlarmDescriptor {
    pub fn is_in_alarm(&self) -> bool {
        self.state == AlarmState::Alarm
    }

    pub fn period(&self) -> Duration {
        Duration::seconds(i64::from(self.period_secs))
    }

    /// `period * evaluation_periods`, the lookback used for violation analysis.
    /// Saturates at [`Duration::MAX`].
    pub fn evaluation_window(&self) -> Duration {
        i64::from(self.period_secs)
            .checked_mul(i64::from(self.evaluation_periods))
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

/// A metric known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    pub namespace: String,
    pub metric_name: String,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
}

impl MetricDescriptor {
    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    /// Dimensions as a plain lookup map. A repeated name keeps its last value.
    pub fn dimension_map(&self) -> HashMap<String, String> {
        self.dimensions
            .iter()
            .map(|d| (d.name.clone(), d.value.clone()))
            .collect()
    }
}

/// A resource found to be over (or under) the alarm threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolatingMetric {
    pub value: f64,
    pub dimensions: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedResult {
    pub alarm: AlarmDescriptor,
    /// When enrichment ran.
    pub timestamp: DateTime<Utc>,
    /// Account that emitted the alarm event, filled in by the event handler.
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub violating_metrics: Vec<ViolatingMetric>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl EnrichedResult {
    pub fn new(alarm: AlarmDescriptor, timestamp: DateTime<Utc>) -> Self {
        Self {
            alarm,
            timestamp,
            account_id: None,
            violating_metrics: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Result for an alarm that was no longer firing when enrichment ran.
    pub fn resolved(alarm: AlarmDescriptor, timestamp: DateTime<Utc>) -> Self {
        let mut result = Self::new(alarm, timestamp);
        result
            .metadata
            .insert(STATUS_KEY.to_string(), STATUS_RESOLVED.to_string());
        result
    }

    pub fn is_resolved(&self) -> bool {
        self.metadata.get(STATUS_KEY).map(String::as_str) == Some(STATUS_RESOLVED)
    }
}

/// Format a dimension map as `name=value` pairs sorted by name.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use alarmlens_common::types::format_dimensions;
///
/// let mut dims = HashMap::new();
/// dims.insert("ZZZ".to_string(), "last".to_string());
/// dims.insert("AAA".to_string(), "first".to_string());
/// assert_eq!(format_dimensions(&dims), "AAA=first, ZZZ=last");
/// ```
pub fn format_dimensions(dimensions: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = dimensions.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join(", ")
}
