use thiserror::Error;

/// Recoverable failures surfaced by the segment cache index.
///
/// `Failed` index entries hold one of these; a later `request_load` for the
/// same region may retry the fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("segment load failed: {0}")]
    LoadFailed(String),
    #[error("segment was invalidated while loading")]
    Stale,
}

/// Failures that can abort an evaluation.
///
/// "No value in this context" is never an error; it is represented by the
/// per-type null sentinels (see [`crate::value`]). Structural programmer
/// errors (cursor misuse, tuple arity mismatch, irreconcilable compile types)
/// panic instead, since they indicate a bug rather than a data condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Cooperative cancellation, checked at iteration boundaries. A
    /// distinguished abort signal; generic handlers must not swallow it.
    #[error("query execution was cancelled")]
    Cancelled,
    /// The execution deadline passed; checked at the same boundaries as
    /// cancellation.
    #[error("query execution timed out")]
    Timeout,
    /// A segment fetch this evaluation depended on failed.
    #[error(transparent)]
    CellLoad(#[from] CacheError),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Whether this error is a cooperative abort (cancellation or timeout)
    /// rather than a data-load failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, EngineError::Cancelled | EngineError::Timeout)
    }
}
