use serde::Serialize;
use thiserror::Error;

use warden_auth::{AuthzError, CredentialError, IdentityError, TokenError};
use warden_core::DomainError;

use crate::{ProviderError, StoreError};

/// Closed set of failures returned by every orchestrator operation.
///
/// Callers branch on the variant (or on [`AuthError::kind`]); the external
/// collapse into a few public codes is [`AuthError::public`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("weak password: {0}")]
    WeakPassword(String),

    #[error("email already registered")]
    DuplicateEmail,

    #[error("invalid credentials")]
    InvalidCredentials,

    /// The account has no password; it must sign in through its provider.
    #[error("account requires federated login")]
    FederatedLoginRequired,

    #[error("federated email is not verified")]
    UnverifiedEmail,

    #[error("identity provider error: {0}")]
    Provider(ProviderError),

    #[error("invalid refresh token: {0}")]
    InvalidRefreshToken(TokenError),

    #[error("refresh token revoked or expired")]
    RevokedOrExpired,

    #[error("identity not found")]
    IdentityNotFound,

    #[error("invalid access token: {0}")]
    InvalidAccessToken(TokenError),

    #[error("{0}")]
    Forbidden(AuthzError),

    #[error("identity is already an admin")]
    AlreadyAdmin,

    #[error("identity is already a regular user")]
    AlreadyUser,

    #[error("storage failure: {0}")]
    Storage(StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Caller-facing error payload: stable code plus a message free of secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl ErrorBody {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl AuthError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Fine-grained kind for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "validation",
            AuthError::WeakPassword(_) => "weak_password",
            AuthError::DuplicateEmail => "duplicate_email",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::FederatedLoginRequired => "federated_login_required",
            AuthError::UnverifiedEmail => "unverified_email",
            AuthError::Provider(_) => "provider_error",
            AuthError::InvalidRefreshToken(TokenError::Expired) => "refresh_token_expired",
            AuthError::InvalidRefreshToken(TokenError::WrongKind { .. }) => "refresh_token_wrong_kind",
            AuthError::InvalidRefreshToken(_) => "refresh_token_invalid",
            AuthError::RevokedOrExpired => "revoked_or_expired",
            AuthError::IdentityNotFound => "identity_not_found",
            AuthError::InvalidAccessToken(TokenError::Expired) => "access_token_expired",
            AuthError::InvalidAccessToken(TokenError::WrongKind { .. }) => "access_token_wrong_kind",
            AuthError::InvalidAccessToken(_) => "access_token_invalid",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::AlreadyAdmin => "already_admin",
            AuthError::AlreadyUser => "already_user",
            AuthError::Storage(StoreError::Timeout) => "storage_timeout",
            AuthError::Storage(_) => "storage",
            AuthError::Internal(_) => "internal",
        }
    }

    /// External view. Authentication failures are indistinguishable, as are
    /// token failures, so callers cannot probe which check failed.
    pub fn public(&self) -> ErrorBody {
        match self {
            AuthError::Validation(_)
            | AuthError::WeakPassword(_)
            | AuthError::AlreadyAdmin
            | AuthError::AlreadyUser => ErrorBody::new("VALIDATION_ERROR", self.to_string()),
            AuthError::DuplicateEmail => {
                ErrorBody::new("EMAIL_ALREADY_EXISTS", "Email is already registered")
            }
            AuthError::InvalidCredentials
            | AuthError::FederatedLoginRequired
            | AuthError::UnverifiedEmail
            | AuthError::Provider(ProviderError::InvalidCode | ProviderError::BadProfile(_)) => {
                ErrorBody::new("INVALID_CREDENTIALS", "Invalid credentials")
            }
            AuthError::InvalidRefreshToken(_)
            | AuthError::RevokedOrExpired
            | AuthError::InvalidAccessToken(_) => {
                ErrorBody::new("INVALID_TOKEN", "Invalid or expired token")
            }
            AuthError::IdentityNotFound => ErrorBody::new("NOT_FOUND", "Identity not found"),
            AuthError::Forbidden(_) => ErrorBody::new("FORBIDDEN", "Insufficient permissions"),
            AuthError::Provider(ProviderError::Unavailable(_))
            | AuthError::Storage(_)
            | AuthError::Internal(_) => {
                ErrorBody::new("INTERNAL_ERROR", "An internal error occurred")
            }
        }
    }
}

impl From<DomainError> for AuthError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg)
            | DomainError::InvariantViolation(msg)
            | DomainError::InvalidId(msg) => AuthError::Validation(msg),
        }
    }
}

impl From<IdentityError> for AuthError {
    fn from(value: IdentityError) -> Self {
        match value {
            IdentityError::Domain(err) => err.into(),
            IdentityError::AlreadyAdmin => AuthError::AlreadyAdmin,
            IdentityError::AlreadyUser => AuthError::AlreadyUser,
            IdentityError::PasswordNotAllowed => AuthError::Validation(value.to_string()),
        }
    }
}

impl From<CredentialError> for AuthError {
    fn from(value: CredentialError) -> Self {
        match value {
            CredentialError::WeakPassword(msg) => AuthError::WeakPassword(msg),
            CredentialError::Mismatch => AuthError::InvalidCredentials,
            CredentialError::Hashing(msg) => AuthError::Internal(msg),
        }
    }
}

impl From<AuthzError> for AuthError {
    fn from(value: AuthzError) -> Self {
        AuthError::Forbidden(value)
    }
}

impl From<ProviderError> for AuthError {
    fn from(value: ProviderError) -> Self {
        AuthError::Provider(value)
    }
}

impl From<StoreError> for AuthError {
    fn from(value: StoreError) -> Self {
        AuthError::Storage(value)
    }
}
