use alarmlens_common::types::ComparisonOperator;

/// Whether `value` breaches `threshold` under `operator`.
///
/// Operators other than the four ordering comparisons (anomaly bands and
/// anything newer) always count as violating. This over-reports rather than
/// hiding a resource that may be the cause of the alarm.
pub fn is_violating(value: f64, threshold: f64, operator: &ComparisonOperator) -> bool {
    match operator {
        ComparisonOperator::GreaterThan => value > threshold,
        ComparisonOperator::GreaterThanOrEqual => value >= threshold,
        ComparisonOperator::LessThan => value < threshold,
        ComparisonOperator::LessThanOrEqual => value <= threshold,
        ComparisonOperator::Other(_) => true,
    }
}
