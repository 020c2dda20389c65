use thiserror::Error;

/// Failures surfaced by the index/search pipeline.
///
/// Corrupt persisted data and symbol-extractor failures are deliberately NOT
/// represented here: both are recovered silently (empty maps / plain-text
/// chunking fallback) and never reach a caller.
#[derive(Debug, Error)]
pub enum RagError {
    /// Cooperative abort via the caller's cancellation token. Indexing
    /// transactions stop before the persistence step, so on-disk state is
    /// left exactly as it was.
    #[error("indexing cancelled")]
    Cancelled,

    #[error("scan failed: {0}")]
    Scanner(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    /// The embedding provider rejected a batch. Retry policy is the
    /// provider's concern; the orchestrator fails the transaction.
    #[error("embedding provider failed: {0}")]
    Embedding(String),
}

pub type Result<T> = std::result::Result<T, RagError>;
