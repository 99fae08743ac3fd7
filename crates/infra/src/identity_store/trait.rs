use async_trait::async_trait;

use warden_auth::{Identity, Provider};
use warden_core::IdentityId;

use crate::StoreError;

/// Identity persistence port.
///
/// Emails are compared case-insensitively; `(provider, external_id)` is
/// unique when an external id is present. Violations surface as
/// [`StoreError::Conflict`].
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn find_by_id(&self, id: IdentityId) -> Result<Option<Identity>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError>;

    async fn find_by_provider_id(
        &self,
        provider: &Provider,
        external_id: &str,
    ) -> Result<Option<Identity>, StoreError>;

    async fn create(&self, identity: Identity) -> Result<(), StoreError>;

    /// Replace a stored identity. Fails [`StoreError::NotFound`] if absent.
    async fn update(&self, identity: Identity) -> Result<(), StoreError>;

    /// Fails [`StoreError::NotFound`] if absent.
    async fn delete(&self, id: IdentityId) -> Result<(), StoreError>;

    /// Newest first.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Identity>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}
