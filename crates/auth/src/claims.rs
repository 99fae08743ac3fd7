use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use warden_core::{IdentityId, TokenId};

use crate::Role;

/// Which half of a token pair a token is.
///
/// Embedded in every token so one kind never validates as the other.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl core::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried by access and refresh tokens.
///
/// Timestamps are unix seconds, as on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the identity the token was issued to.
    pub sub: IdentityId,
    pub email: String,
    pub role: Role,
    pub kind: TokenKind,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    /// Unique per token, so two tokens minted in the same second differ.
    pub jti: TokenId,
    pub iss: String,
}

impl TokenClaims {
    pub fn identity_id(&self) -> IdentityId {
        self.sub
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        from_unix(self.exp)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        from_unix(self.iat)
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Malformed, badly signed, foreign issuer, or outside its validity window
    /// in a way other than plain expiry.
    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("token has expired")]
    Expired,

    #[error("wrong token kind: expected {expected}, found {found}")]
    WrongKind { expected: TokenKind, found: TokenKind },

    #[error("token could not be signed: {0}")]
    Signing(String),
}

/// Deterministically validate decoded claims against `now`.
///
/// Signature checks happen before this, in [`crate::TokenIssuer`].
pub fn validate_claims(
    claims: &TokenClaims,
    expected: TokenKind,
    now: DateTime<Utc>,
) -> Result<(), TokenError> {
    if claims.exp <= claims.iat {
        return Err(TokenError::Invalid("expiry is not after issue time".into()));
    }
    let now = now.timestamp();
    if now < claims.nbf {
        return Err(TokenError::Invalid("token is not yet valid".into()));
    }
    if now >= claims.exp {
        return Err(TokenError::Expired);
    }
    if claims.kind != expected {
        return Err(TokenError::WrongKind {
            expected,
            found: claims.kind,
        });
    }
    Ok(())
}
