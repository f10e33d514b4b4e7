//! Delivery of enrichment results.
//!
//! An [`EnrichedResult`] is rendered by a [`formatter::MessageFormatter`] and
//! sent through a [`NotificationChannel`]. Built-in channels publish to an
//! SNS topic (plain text) or an EventBridge bus (JSON) and are created from
//! configuration through the [`plugin::ChannelRegistry`].

pub mod channels;
pub mod error;
pub mod formatter;
pub mod plugin;
pub mod utils;


use alarmlens_common::types::EnrichedResult;
use async_trait::async_trait;
use error::Result;

/// A delivery target for enrichment results.
///
/// Implementations are created by the corresponding [`plugin::ChannelPlugin`].
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver one result. No retries are attempted here.
    async fn send(&self, result: &EnrichedResult) -> Result<()>;

    /// Returns the channel type name (e.g., `"sns"`, `"eventbridge"`).
    fn channel_type(&self) -> &str;
}
