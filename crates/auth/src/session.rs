//! Refresh-token session records.

use chrono::{DateTime, Duration, Utc};

use warden_core::{IdentityId, SessionId};

/// How far into the past a revoked session's expiry is moved.
///
/// Revocation leaves the row in place (audit trail) until a purge removes it.
pub const REVOCATION_BACKDATE: Duration = Duration::hours(1);

/// A persisted refresh token owned by one identity.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub identity_id: IdentityId,
    /// Opaque secret; never logged.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity_id", &self.identity_id)
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl Session {
    pub fn new(
        identity_id: IdentityId,
        token: impl Into<String>,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            identity_id,
            token: token.into(),
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Active means unexpired and not revoked (revocation backdates the expiry).
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Tombstone the session by moving its expiry into the past.
    ///
    /// Already-expired sessions keep their original expiry.
    pub fn revoke(&mut self, now: DateTime<Utc>) {
        if self.is_active(now) {
            self.expires_at = now - REVOCATION_BACKDATE;
            self.updated_at = now;
        }
    }
}
