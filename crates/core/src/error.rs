//! Errors shared by the identity and session model.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Rejections that depend only on the values involved, never on storage.
///
/// Messages are shown to callers, so they must not echo secrets
/// (passwords, tokens) back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input: bad email, name out of range, unknown role.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A record would break an identity or session rule
    /// (e.g. a LOCAL identity without a password hash).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
