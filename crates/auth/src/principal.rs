use serde::{Deserialize, Serialize};

use warden_core::IdentityId;

use crate::{Role, TokenClaims};

/// The authenticated caller behind an access token.
///
/// Derived from validated claims only; access tokens are stateless, so no
/// store lookup backs this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub identity_id: IdentityId,
    pub email: String,
    pub role: Role,
}

impl From<TokenClaims> for Principal {
    fn from(claims: TokenClaims) -> Self {
        Self {
            identity_id: claims.sub,
            email: claims.email,
            role: claims.role,
        }
    }
}

impl From<&TokenClaims> for Principal {
    fn from(claims: &TokenClaims) -> Self {
        Self {
            identity_id: claims.sub,
            email: claims.email.clone(),
            role: claims.role,
        }
    }
}
