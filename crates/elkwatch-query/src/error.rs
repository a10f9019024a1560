/// Errors from query construction and Elasticsearch retrieval.
///
/// Retrieval errors are terminal for the current tick: the evaluator skips
/// the rule without advancing its time cursor, and the next tick retries
/// the same window. Retrying here would double-charge the worker slot.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The data source configuration cannot produce a usable client.
    #[error("Query: invalid data source configuration: {0}")]
    InvalidConfig(String),

    /// A condition uses an operator outside the supported set.
    #[error("Query: unsupported operator '{0}'")]
    UnsupportedOperator(String),

    /// A condition value does not fit its operator.
    #[error("Query: invalid condition value for field '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Transport-level failure talking to Elasticsearch.
    #[error("Query: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Elasticsearch answered with a non-success status.
    #[error("Query: search failed with status {status}: {body}")]
    SearchFailed { status: u16, body: String },

    /// The whole query exceeded its time budget.
    #[error("Query: timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Convenience `Result` alias for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
