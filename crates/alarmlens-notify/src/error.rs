use alarmlens_cloud::error::CloudError;

/// Errors that can occur while formatting or delivering a result.
///
/// # Examples
///
/// ```rust
/// use alarmlens_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("missing topic_arn".to_string());
/// assert!(err.to_string().contains("topic_arn"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The channel type is not registered in the plugin registry.
    #[error("Notify: unknown channel type '{0}'")]
    UnknownChannelType(String),

    /// The AWS call carrying the message failed.
    #[error("Notify: {0}")]
    Cloud(#[from] CloudError),

    /// JSON serialization or deserialization failed.
    #[error("Notify: JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The service accepted the request but rejected the entry.
    #[error("Notify: {service} rejected the message: code={code}, message={message}")]
    Rejected {
        service: String,
        code: String,
        message: String,
    },
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
