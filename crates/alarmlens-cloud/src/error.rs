/// Errors that can occur when calling an AWS API.
///
/// # Examples
///
/// ```rust
/// use alarmlens_cloud::error::CloudError;
///
/// let err = CloudError::UnsupportedAlarm {
///     alarm: "composite".to_string(),
///     reason: "no single metric".to_string(),
/// };
/// assert!(err.to_string().contains("composite"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    /// Non-2xx status code whose body carried no recognizable AWS error.
    #[error("{service} API HTTP error: status={status}, body={body}")]
    HttpError {
        service: String,
        status: u16,
        body: String,
    },

    /// AWS error payload (`__type`/`message` for JSON protocols, `<Code>` for query).
    #[error("{service} API error: code={code}, message={message}")]
    ApiResponseError {
        service: String,
        code: String,
        message: String,
    },

    /// Request was throttled. Callers may retry after backoff.
    #[error("{service} API throttled, retry after backoff")]
    Throttled { service: String },

    /// HMAC signing failed (invalid key length).
    #[error("Signing error: {0}")]
    SigningError(String),

    /// An underlying HTTP transport error from `reqwest`.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// JSON serialization or deserialization failure.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The response decoded but is missing something the caller needs.
    #[error("Malformed {service} response: {reason}")]
    MalformedResponse { service: String, reason: String },

    /// The alarm exists but is not a single-metric threshold alarm.
    #[error("Alarm {alarm} is not supported: {reason}")]
    UnsupportedAlarm { alarm: String, reason: String },

    /// Credentials, region or endpoint configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl CloudError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, CloudError>;

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
];

/// Map a failed AWS response to a [`CloudError`].
///
/// JSON protocol bodies carry `__type` (optionally prefixed with a shape
/// namespace ending in `#`) and `message`/`Message`. Query protocol bodies
/// carry an XML `<Code>`/`<Message>` pair.
pub fn parse_error_response(service: &str, status: u16, body: &str) -> CloudError {
    let (code, message) = match json_error(body).or_else(|| xml_error(body)) {
        Some(pair) => pair,
        None if status == 429 => {
            return CloudError::Throttled {
                service: service.to_string(),
            }
        }
        None => {
            return CloudError::HttpError {
                service: service.to_string(),
                status,
                body: body.to_string(),
            }
        }
    };

    if status == 429 || THROTTLING_CODES.contains(&code.as_str()) {
        return CloudError::Throttled {
            service: service.to_string(),
        };
    }

    CloudError::ApiResponseError {
        service: service.to_string(),
        code,
        message,
    }
}

fn json_error(body: &str) -> Option<(String, String)> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let raw_type = value
        .get("__type")
        .or_else(|| value.get("code"))
        .and_then(|v| v.as_str())?;
    let code = raw_type.rsplit('#').next().unwrap_or(raw_type).to_string();
    let message = value
        .get("message")
        .or_else(|| value.get("Message"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Some((code, message))
}

fn xml_error(body: &str) -> Option<(String, String)> {
    let code = xml_tag(body, "Code")?;
    let message = xml_tag(body, "Message").unwrap_or_default();
    Some((code, message))
}

fn xml_tag(body: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim().to_string())
}
