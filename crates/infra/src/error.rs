use thiserror::Error;

/// Failure of a persistence capability (session or identity storage).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A unique key (email, provider id, token) is already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("record not found")]
    NotFound,

    /// The backend failed (connection, IO, lock poisoning, bad row).
    #[error("storage backend failure: {0}")]
    Backend(String),

    /// The operation did not finish before its deadline; outcome unknown.
    #[error("storage operation timed out")]
    Timeout,
}

impl StoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub(crate) fn poisoned() -> Self {
        Self::Backend("lock poisoned".to_string())
    }
}
