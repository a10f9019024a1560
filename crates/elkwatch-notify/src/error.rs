/// Errors from webhook notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The HTTP request to the webhook endpoint failed after all retries.
    #[error("Notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The webhook answered, but not with HTTP 200 + `code == 0`.
    #[error("Notify: webhook API error: status={status}, body={body}")]
    ApiError { status: u16, body: String },

    /// The webhook response body was not parseable JSON.
    #[error("Notify: invalid webhook response: {0}")]
    InvalidResponse(String),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
