//! Federated identity provider port.
//!
//! The OAuth protocol exchange happens behind [`FederatedIdentityProvider`];
//! this crate consumes only the verified profile it yields.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use warden_auth::Provider;

/// Verified identity data returned by a provider after its own exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedProfile {
    #[serde(alias = "id")]
    pub external_id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "picture")]
    pub avatar: Option<String>,
    #[serde(default, alias = "verified_email")]
    pub email_verified: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The authorization code was rejected (expired, reused, forged).
    #[error("authorization code rejected")]
    InvalidCode,

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider returned an unusable profile: {0}")]
    BadProfile(String),
}

#[async_trait]
pub trait FederatedIdentityProvider: Send + Sync {
    /// Which provider this adapter speaks for (e.g. `GOOGLE`).
    fn provider(&self) -> Provider;

    /// Trade an authorization code for a verified profile.
    async fn exchange(&self, code: &str) -> Result<FederatedProfile, ProviderError>;
}

/// Provider backed by a fixed code -> profile table. Each code is single-use.
///
/// Useful for tests and local development where no real provider is reachable.
#[derive(Debug)]
pub struct StaticFederatedProvider {
    provider: Provider,
    profiles: RwLock<HashMap<String, FederatedProfile>>,
}

impl StaticFederatedProvider {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            profiles: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_profile(self, code: impl Into<String>, profile: FederatedProfile) -> Self {
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.insert(code.into(), profile);
        }
        self
    }
}

#[async_trait]
impl FederatedIdentityProvider for StaticFederatedProvider {
    fn provider(&self) -> Provider {
        self.provider.clone()
    }

    async fn exchange(&self, code: &str) -> Result<FederatedProfile, ProviderError> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| ProviderError::Unavailable("lock poisoned".into()))?;
        profiles.remove(code).ok_or(ProviderError::InvalidCode)
    }
}
