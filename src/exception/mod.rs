use thiserror::Error;

/// Unified error taxonomy for the report engine.
///
/// Every variant carries owned, clonable payloads: a single fetch result is
/// fanned out to every single-flight waiter, so the error must be `Clone`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream rejected the client credentials: {0}")]
    Unauthorized(String),

    #[error("failed to acquire bearer token: {0}")]
    TokenAcquireFailed(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("rate limited by upstream (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("upstream query error: {message}")]
    UpstreamQuery {
        message: String,
        path: Option<String>,
    },

    #[error("event pagination stalled for {data_type} at {at_ms}ms")]
    PaginationStalled { data_type: String, at_ms: i64 },

    #[error("report '{code}' not found upstream")]
    ReportNotFound { code: String },

    #[error("job was canceled")]
    Canceled,

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn report_not_found(code: impl Into<String>) -> Self {
        Self::ReportNotFound { code: code.into() }
    }

    /// Whether a retry with identical inputs could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable(_) | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::UpstreamUnavailable(e.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("JSON processing failed: {}", e))
    }
}
