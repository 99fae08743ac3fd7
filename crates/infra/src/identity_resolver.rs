//! Finds or creates identities by local credential or federated linkage.
//!
//! Federated resolution order:
//! 1. `(provider, external_id)` match: use it.
//! 2. Email match under a different provider: merge the federated linkage into it
//!    (password and role kept, avatar adopted only if missing, email verified).
//!    Email match under the same provider: use it unchanged.
//! 3. No match: create a new federated identity (`USER`, verified, no password).
//!
//! An unverified provider email is rejected before any lookup.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use warden_auth::{Identity, Provider, normalize_email, validate_email};
use warden_core::IdentityId;

use crate::deadline::within;
use crate::{AuthError, FederatedProfile, IdentityRepository, ProviderError, StoreError};

/// How a federated login was matched to an identity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FederatedResolution {
    Linked,
    Merged,
    Created,
}

impl FederatedResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            FederatedResolution::Linked => "linked",
            FederatedResolution::Merged => "merged",
            FederatedResolution::Created => "created",
        }
    }
}

#[derive(Clone)]
pub struct IdentityResolver {
    identities: Arc<dyn IdentityRepository>,
    store_timeout: Duration,
}

impl IdentityResolver {
    pub fn new(identities: Arc<dyn IdentityRepository>, store_timeout: Duration) -> Self {
        Self {
            identities,
            store_timeout,
        }
    }

    pub async fn find_by_id(&self, id: IdentityId) -> Result<Option<Identity>, AuthError> {
        Ok(within(self.store_timeout, "find_identity_by_id", self.identities.find_by_id(id)).await?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, AuthError> {
        let email = normalize_email(email);
        Ok(within(
            self.store_timeout,
            "find_identity_by_email",
            self.identities.find_by_email(&email),
        )
        .await?)
    }

    pub async fn find_by_provider_id(
        &self,
        provider: &Provider,
        external_id: &str,
    ) -> Result<Option<Identity>, AuthError> {
        Ok(within(
            self.store_timeout,
            "find_identity_by_provider_id",
            self.identities.find_by_provider_id(provider, external_id),
        )
        .await?)
    }

    /// Fails `DuplicateEmail` when the normalised email is taken, including
    /// when a concurrent registration wins the unique index.
    #[instrument(skip(self, email, name, password_hash), err(level = "info", Display))]
    pub async fn create_local(
        &self,
        email: &str,
        name: &str,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Result<Identity, AuthError> {
        let identity = Identity::new_local(email, name, password_hash, now)?;
        if self.find_by_email(&identity.email).await?.is_some() {
            return Err(AuthError::DuplicateEmail);
        }
        self.insert(identity).await
    }

    pub async fn create_federated(
        &self,
        provider: Provider,
        profile: &FederatedProfile,
        now: DateTime<Utc>,
    ) -> Result<Identity, AuthError> {
        let identity = Identity::new_federated(
            &profile.email,
            &profile.name,
            provider,
            &profile.external_id,
            profile.avatar.clone(),
            now,
        )?;
        self.insert(identity).await
    }

    /// Attach federated linkage to an existing identity and persist it.
    pub async fn merge_into_federated(
        &self,
        mut identity: Identity,
        provider: Provider,
        external_id: &str,
        avatar: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Identity, AuthError> {
        identity.link_provider(provider, external_id, avatar, now)?;
        self.save(identity).await
    }

    pub async fn promote(&self, mut identity: Identity, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        identity.promote(now)?;
        self.save(identity).await
    }

    pub async fn demote(&self, mut identity: Identity, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        identity.demote(now)?;
        self.save(identity).await
    }

    /// Persist changes to an existing identity.
    pub async fn save(&self, identity: Identity) -> Result<Identity, AuthError> {
        match within(
            self.store_timeout,
            "update_identity",
            self.identities.update(identity.clone()),
        )
        .await
        {
            Ok(()) => Ok(identity),
            Err(StoreError::NotFound) => Err(AuthError::IdentityNotFound),
            Err(StoreError::Conflict(_)) => Err(AuthError::DuplicateEmail),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete(&self, id: IdentityId) -> Result<(), AuthError> {
        match within(self.store_timeout, "delete_identity", self.identities.delete(id)).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(AuthError::IdentityNotFound),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn list(&self, limit: usize, offset: usize) -> Result<(Vec<Identity>, u64), AuthError> {
        let items = within(self.store_timeout, "list_identities", self.identities.list(limit, offset)).await?;
        let total = within(self.store_timeout, "count_identities", self.identities.count()).await?;
        Ok((items, total))
    }

    /// Resolve a verified provider profile to an identity, creating or merging as needed.
    #[instrument(
        skip(self, profile),
        fields(provider = %provider, resolution = tracing::field::Empty),
        err(level = "info", Display)
    )]
    pub async fn resolve_federated(
        &self,
        provider: Provider,
        profile: &FederatedProfile,
        now: DateTime<Utc>,
    ) -> Result<(Identity, FederatedResolution), AuthError> {
        if !profile.email_verified {
            return Err(AuthError::UnverifiedEmail);
        }
        if provider.is_local() {
            return Err(AuthError::Validation("LOCAL is not a federated provider".into()));
        }
        let external_id = profile.external_id.trim();
        if external_id.is_empty() {
            return Err(AuthError::Provider(ProviderError::BadProfile(
                "profile has no external id".into(),
            )));
        }
        validate_email(&normalize_email(&profile.email))?;

        let (identity, resolution) = self.resolve_verified(provider, external_id, profile, now).await?;
        tracing::Span::current().record("resolution", resolution.as_str());
        info!(identity_id = %identity.id, resolution = resolution.as_str(), "federated identity resolved");
        Ok((identity, resolution))
    }

    async fn resolve_verified(
        &self,
        provider: Provider,
        external_id: &str,
        profile: &FederatedProfile,
        now: DateTime<Utc>,
    ) -> Result<(Identity, FederatedResolution), AuthError> {
        if let Some(identity) = self.find_by_provider_id(&provider, external_id).await? {
            return Ok((identity, FederatedResolution::Linked));
        }

        if let Some(existing) = self.find_by_email(&profile.email).await? {
            if existing.provider == provider {
                // Already linked to this provider under another subject id: the
                // email owner logs in and the stored linkage is left as is.
                return Ok((existing, FederatedResolution::Linked));
            }
            let merged = self
                .merge_into_federated(existing, provider, external_id, profile.avatar.clone(), now)
                .await?;
            return Ok((merged, FederatedResolution::Merged));
        }

        match self.create_federated(provider.clone(), profile, now).await {
            Ok(identity) => Ok((identity, FederatedResolution::Created)),
            // A concurrent first login for the same subject won the insert.
            Err(AuthError::DuplicateEmail) => match self.find_by_provider_id(&provider, external_id).await? {
                Some(identity) => Ok((identity, FederatedResolution::Linked)),
                None => Err(AuthError::DuplicateEmail),
            },
            Err(err) => Err(err),
        }
    }

    async fn insert(&self, identity: Identity) -> Result<Identity, AuthError> {
        match within(
            self.store_timeout,
            "create_identity",
            self.identities.create(identity.clone()),
        )
        .await
        {
            Ok(()) => Ok(identity),
            Err(StoreError::Conflict(_)) => Err(AuthError::DuplicateEmail),
            Err(err) => Err(err.into()),
        }
    }
}
