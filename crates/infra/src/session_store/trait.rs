use async_trait::async_trait;
use chrono::{DateTime, Utc};

use warden_auth::Session;
use warden_core::IdentityId;

use crate::StoreError;

/// Session persistence port.
///
/// Time-dependent operations take `now` so callers (and tests) own the clock.
/// The compound operations (`claim`, `rotate`, `start_exclusive`) must be
/// atomic in every implementation.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: Session) -> Result<(), StoreError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<Session>, StoreError>;

    /// All sessions of an identity, oldest first, including revoked ones.
    async fn find_by_identity(&self, identity_id: IdentityId) -> Result<Vec<Session>, StoreError>;

    /// Remove the record for `token`. Absent tokens are not an error.
    async fn delete_by_token(&self, token: &str) -> Result<(), StoreError>;

    /// Tombstone every active session of the identity; returns how many changed.
    async fn revoke_all_for_identity(
        &self,
        identity_id: IdentityId,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn is_active(&self, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Delete expired and revoked records; returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Delete the record only if it is active.
    ///
    /// Returns whether this caller removed it: of N concurrent claimants of the
    /// same token exactly one observes `true`.
    async fn claim(&self, token: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Claim `old_token` and insert `replacement` as one step.
    ///
    /// `false` means the old token was already gone or inactive and nothing
    /// was inserted.
    async fn rotate(
        &self,
        old_token: &str,
        replacement: Session,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Revoke every session of the owner, then insert `session`, as one step.
    ///
    /// Concurrent calls for the same identity are serialised, so at most one
    /// of the inserted sessions stays active.
    async fn start_exclusive(&self, session: Session, now: DateTime<Utc>) -> Result<(), StoreError>;
}
