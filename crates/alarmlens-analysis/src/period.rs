use alarmlens_common::types::AlarmDescriptor;
use chrono::{DateTime, Duration, Utc};

const SECONDS_PER_DAY: i64 = 86_400;

/// Align `instant` to the start of the aggregation period containing it.
///
/// Periods of a day or longer align to midnight UTC of the same calendar day.
/// Shorter periods floor the epoch seconds to a multiple of the period. A
/// non-positive period only drops sub-second precision.
///
/// # Examples
///
/// ```
/// use alarmlens_analysis::period::align_to_period;
/// use chrono::{Duration, TimeZone, Utc};
///
/// let t = Utc.with_ymd_and_hms(2024, 3, 5, 14, 37, 21).unwrap();
/// let aligned = align_to_period(t, Duration::minutes(5));
/// assert_eq!(aligned, Utc.with_ymd_and_hms(2024, 3, 5, 14, 35, 0).unwrap());
/// ```
pub fn align_to_period(instant: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    let secs = instant.timestamp();
    let step = period.num_seconds().min(SECONDS_PER_DAY);
    let aligned = if step > 0 { secs - secs.rem_euclid(step) } else { secs };

    DateTime::from_timestamp(aligned, 0).unwrap_or(instant)
}

/// Query window for a violation analysis: `[start, end)` where `end` is the
/// current period boundary and the span covers every evaluation period.
/// A span reaching past the earliest representable instant starts there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EvaluationWindow {
    pub fn for_alarm(alarm: &AlarmDescriptor, now: DateTime<Utc>) -> Self {
        let end = align_to_period(now, alarm.period());
        Self {
            start: end
                .checked_sub_signed(alarm.evaluation_window())
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}
