//! HS256 token issuing and validation.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use warden_core::{IdentityId, TokenId};

use crate::{Role, TokenClaims, TokenError, TokenKind, validate_claims};

/// Lifetimes and issuer name for issued tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSettings {
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            issuer: "warden".to_string(),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
        }
    }
}

/// A signed token together with the claims it carries.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

impl IssuedToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.expires_at()
    }
}

impl core::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"<redacted>")
            .field("claims", &self.claims)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Mints and verifies access/refresh tokens with a symmetric secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    settings: TokenSettings,
}

impl core::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(secret: &[u8], settings: TokenSettings) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::Signing("signing secret is empty".into()));
        }
        if settings.access_ttl <= Duration::zero() || settings.refresh_ttl <= Duration::zero() {
            return Err(TokenError::Signing("token lifetimes must be positive".into()));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            settings,
        })
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    pub fn expiry_for(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.settings.access_ttl,
            TokenKind::Refresh => self.settings.refresh_ttl,
        }
    }

    pub fn issue_access(
        &self,
        identity_id: IdentityId,
        email: &str,
        role: Role,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(TokenKind::Access, identity_id, email, role, Utc::now())
    }

    pub fn issue_refresh(
        &self,
        identity_id: IdentityId,
        email: &str,
        role: Role,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(TokenKind::Refresh, identity_id, email, role, Utc::now())
    }

    pub fn issue_pair_at(
        &self,
        identity_id: IdentityId,
        email: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access: self.issue_at(TokenKind::Access, identity_id, email, role, now)?,
            refresh: self.issue_at(TokenKind::Refresh, identity_id, email, role, now)?,
        })
    }

    pub fn issue_at(
        &self,
        kind: TokenKind,
        identity_id: IdentityId,
        email: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let issued = now.timestamp();
        let claims = TokenClaims {
            sub: identity_id,
            email: email.to_string(),
            role,
            kind,
            iat: issued,
            nbf: issued,
            exp: (now + self.expiry_for(kind)).timestamp(),
            jti: TokenId::new(),
            iss: self.settings.issuer.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken { token, claims })
    }

    pub fn validate_access(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.validate_at(token, TokenKind::Access, Utc::now())
    }

    pub fn validate_refresh(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.validate_at(token, TokenKind::Refresh, Utc::now())
    }

    /// Verify signature and issuer, then the time window and kind against `now`.
    pub fn validate_at(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time checks run in `validate_claims` against the caller's clock.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss"]);
        validation.set_issuer(&[self.settings.issuer.as_str()]);

        let data = decode::<TokenClaims>(token, &self.decoding, &validation).map_err(|e| {
            let reason = describe(e.kind());
            tracing::debug!(reason, kind = %expected, "token rejected");
            TokenError::Invalid(reason.to_string())
        })?;

        validate_claims(&data.claims, expected, now)?;
        Ok(data.claims)
    }
}

// Decoder errors can echo payload fragments, so only a fixed reason is kept.
fn describe(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidSignature => "signature mismatch",
        ErrorKind::InvalidIssuer => "unexpected issuer",
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => "unexpected algorithm",
        ErrorKind::MissingRequiredClaim(_) => "missing required claim",
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => "malformed token",
        ErrorKind::Json(_) => "malformed claims",
        _ => "token rejected",
    }
}
