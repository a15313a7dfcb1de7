use thiserror::Error;

/// Every failure a queue operation can report.
///
/// `Validation` and `NotFound` are caller mistakes and carry the exact message
/// shown to the caller. `Store` wraps the database error untouched.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("invalid queue configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] sqlx::Error),

    /// Backend failure from a store that is not SQL-backed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl QueueError {
    pub fn payload_missing() -> Self {
        Self::Validation("payload missing".to_string())
    }

    pub fn not_a_reference() -> Self {
        Self::Validation("not a valid referenced document".to_string())
    }

    pub fn job_not_found() -> Self {
        Self::NotFound("job id invalid, job not found".to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Storage(_))
    }
}
