use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use warden_auth::{Identity, Provider, normalize_email};
use warden_core::IdentityId;

use super::r#trait::IdentityRepository;
use crate::StoreError;

/// In-memory identity repository.
///
/// Intended for tests/dev. Uniqueness checks and writes share one write lock.
#[derive(Debug, Default)]
pub struct InMemoryIdentityRepository {
    identities: RwLock<HashMap<IdentityId, Identity>>,
}

impl InMemoryIdentityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_unique(
        identities: &HashMap<IdentityId, Identity>,
        candidate: &Identity,
    ) -> Result<(), StoreError> {
        for existing in identities.values().filter(|i| i.id != candidate.id) {
            if existing.email == candidate.email {
                return Err(StoreError::conflict("email already exists"));
            }
            if candidate.external_id.is_some()
                && existing.provider == candidate.provider
                && existing.external_id == candidate.external_id
            {
                return Err(StoreError::conflict("provider identity already linked"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityRepository for InMemoryIdentityRepository {
    async fn find_by_id(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        let identities = self.identities.read().map_err(|_| StoreError::poisoned())?;
        Ok(identities.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        let email = normalize_email(email);
        let identities = self.identities.read().map_err(|_| StoreError::poisoned())?;
        Ok(identities.values().find(|i| i.email == email).cloned())
    }

    async fn find_by_provider_id(
        &self,
        provider: &Provider,
        external_id: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let identities = self.identities.read().map_err(|_| StoreError::poisoned())?;
        Ok(identities
            .values()
            .find(|i| &i.provider == provider && i.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn create(&self, identity: Identity) -> Result<(), StoreError> {
        let mut identities = self.identities.write().map_err(|_| StoreError::poisoned())?;
        if identities.contains_key(&identity.id) {
            return Err(StoreError::conflict("identity id already exists"));
        }
        Self::ensure_unique(&identities, &identity)?;
        identities.insert(identity.id, identity);
        Ok(())
    }

    async fn update(&self, identity: Identity) -> Result<(), StoreError> {
        let mut identities = self.identities.write().map_err(|_| StoreError::poisoned())?;
        if !identities.contains_key(&identity.id) {
            return Err(StoreError::NotFound);
        }
        Self::ensure_unique(&identities, &identity)?;
        identities.insert(identity.id, identity);
        Ok(())
    }

    async fn delete(&self, id: IdentityId) -> Result<(), StoreError> {
        let mut identities = self.identities.write().map_err(|_| StoreError::poisoned())?;
        identities.remove(&id).map(|_| ()).ok_or(StoreError::NotFound)
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Identity>, StoreError> {
        let identities = self.identities.read().map_err(|_| StoreError::poisoned())?;
        let mut all: Vec<Identity> = identities.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let identities = self.identities.read().map_err(|_| StoreError::poisoned())?;
        Ok(identities.len() as u64)
    }
}
