/// Errors that fail a single evaluation tick.
///
/// Notification failures are deliberately absent: they surface as
/// `alert.status = failed` on the persisted alert, never as a tick error.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Missing or inconsistent rule configuration (no webhook, disabled
    /// data source). The tick is skipped and the time cursor stays put.
    #[error("Exec: rule configuration error: {0}")]
    Config(String),

    /// Elasticsearch retrieval failed. The time cursor stays put so the
    /// next tick retries the same window.
    #[error(transparent)]
    Query(#[from] elkwatch_query::QueryError),

    /// Storage failure while loading referenced configuration.
    #[error("Exec: storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// What one evaluation tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The interval gate decided it is not yet time to run.
    Skipped,
    /// The query ran; `matches` documents were found (alert dispatch is
    /// detached and may still be in flight).
    Completed { matches: usize },
}
