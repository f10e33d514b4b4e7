use crate::handler::EventHandler;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<EventHandler>,
    pub start_time: DateTime<Utc>,
    /// Cancelled on process shutdown; in-flight enrichments derive from it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(handler: Arc<EventHandler>, shutdown: CancellationToken) -> Self {
        Self {
            handler,
            start_time: Utc::now(),
            shutdown,
        }
    }
}
