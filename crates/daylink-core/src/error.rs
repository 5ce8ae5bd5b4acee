use crate::model::RecordId;

/// Failure reported by a [`crate::RemoteStore`] implementation.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("remote api error (status {status}, code {code}): {message}")]
    Api { status: u16, code: String, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("schema error: {0}")]
    Schema(String),
}

impl StoreError {
    /// Errors that are not scoped to a single record. A run cannot make progress
    /// past them, so the driver aborts instead of skipping the item.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ReconcileError {
    #[error("candidate selection failed: {0}")]
    Selection(#[source] StoreError),
    #[error("run aborted while processing source {source_id}: {error}")]
    Aborted { source_id: RecordId, error: StoreError },
}
