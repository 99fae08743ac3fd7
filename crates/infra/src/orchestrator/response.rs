use serde::Serialize;

use warden_auth::{Identity, IdentitySummary, TokenPair};

pub const TOKEN_TYPE: &str = "Bearer";

/// Result of every flow that mints a token pair.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct AuthSession {
    pub identity: IdentitySummary,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
}

impl AuthSession {
    pub(crate) fn new(identity: &Identity, pair: TokenPair) -> Self {
        let expires_in = pair.access.claims.exp - pair.access.claims.iat;
        Self {
            identity: identity.summary(),
            access_token: pair.access.token,
            refresh_token: pair.refresh.token,
            token_type: TOKEN_TYPE,
            expires_in,
        }
    }
}

impl core::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthSession")
            .field("identity", &self.identity)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// One page of identities plus the total count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityPage {
    pub items: Vec<IdentitySummary>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

/// Fields a profile update may change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub avatar: Option<String>,
}
