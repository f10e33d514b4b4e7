//! Violation analysis for fired threshold alarms.
//!
//! Given an alarm, the [`enricher::AlarmEnricher`] finds the most
//! dimension-specific metrics under the alarm's filter, queries their recent
//! data in batches over a period-aligned window, and reports which of them
//! currently breach the alarm threshold.

pub mod batch;
pub mod classifier;
pub mod discovery;
pub mod enricher;
pub mod error;
pub mod period;

#[cfg(test)]
mod tests;

pub use enricher::{AlarmEnricher, Enricher};
pub use error::EnrichError;
