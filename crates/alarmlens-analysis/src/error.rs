use alarmlens_cloud::error::CloudError;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Errors returned by an enrichment run.
///
/// Degenerate outcomes (no candidate metrics, no violations, empty series)
/// are not errors.
///
/// # Examples
///
/// ```rust
/// use alarmlens_analysis::error::EnrichError;
///
/// let err = EnrichError::AlarmNotFound("cpu-high".to_string());
/// assert!(err.to_string().contains("cpu-high"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("alarm not found: {0}")]
    AlarmNotFound(String),

    #[error("failed to fetch alarm {alarm}: {source}")]
    AlarmLookup { alarm: String, source: CloudError },

    #[error("failed to discover metrics for alarm {alarm}: {source}")]
    Discovery { alarm: String, source: CloudError },

    #[error("failed to evaluate metrics for alarm {alarm}: {source}")]
    Evaluation { alarm: String, source: CloudError },

    #[error("enrichment cancelled")]
    Cancelled,
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, EnrichError>;

/// Failure of a single pipeline stage, before it is attributed to an alarm.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("cancelled")]
    Cancelled,
}

impl StageError {
    pub(crate) fn attribute<F>(self, wrap: F) -> EnrichError
    where
        F: FnOnce(CloudError) -> EnrichError,
    {
        match self {
            Self::Cloud(e) => wrap(e),
            Self::Cancelled => EnrichError::Cancelled,
        }
    }
}

/// Run a collaborator call unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    call: F,
) -> std::result::Result<T, StageError>
where
    F: Future<Output = alarmlens_cloud::error::Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(StageError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StageError::Cancelled),
        result = call => result.map_err(StageError::from),
    }
}
