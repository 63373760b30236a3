//! Error taxonomy shared by `master` and `agent`, following §7's
//! classification: validation errors never retry, transient I/O and timeout
//! are retryable, tool failures and cancellation are terminal, data
//! invariant violations quarantine the offending record and continue.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("tool failure: {0}")]
    ToolFailure(String),

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("data invariant violation: {0}")]
    DataInvariant(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    /// Transient errors and timeouts are retried per stage policy; all
    /// other variants bubble up to the task result without auto-retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::TransientIo(_) | CoreError::Timeout)
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
